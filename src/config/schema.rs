use serde::Deserialize;

/// The TOML file structure for parley.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub server: Option<ServerConfig>,
    pub oracle: Option<OracleConfig>,
    pub delegation: Option<DelegationConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub shared_secret: Option<String>,
    /// Size of the anti-buffering prelude written before the first SSE
    /// event. Zero disables padding.
    pub padding_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct OracleConfig {
    pub url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DelegationConfig {
    pub max_depth: Option<usize>,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub shared_secret: String,
    pub padding_bytes: usize,
    pub oracle_url: String,
    pub model: String,
    pub max_delegation_depth: usize,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub bind_addr: Option<String>,
    pub shared_secret: Option<String>,
    pub padding_bytes: Option<usize>,
    pub oracle_url: Option<String>,
    pub model: Option<String>,
    pub max_delegation_depth: Option<usize>,
}

impl ConfigFile {
    pub fn to_partial(&self) -> PartialConfig {
        PartialConfig {
            bind_addr: self.server.as_ref().and_then(|s| s.bind.clone()),
            shared_secret: self.server.as_ref().and_then(|s| s.shared_secret.clone()),
            padding_bytes: self.server.as_ref().and_then(|s| s.padding_bytes),
            oracle_url: self.oracle.as_ref().and_then(|o| o.url.clone()),
            model: self.oracle.as_ref().and_then(|o| o.model.clone()),
            max_delegation_depth: self.delegation.as_ref().and_then(|d| d.max_depth),
        }
    }
}
