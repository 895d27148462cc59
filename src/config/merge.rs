use super::schema::{AppConfig, PartialConfig};
use crate::delegation::MAX_DELEGATION_DEPTH;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            bind_addr: self.bind_addr.or(fallback.bind_addr),
            shared_secret: self.shared_secret.or(fallback.shared_secret),
            padding_bytes: self.padding_bytes.or(fallback.padding_bytes),
            oracle_url: self.oracle_url.or(fallback.oracle_url),
            model: self.model.or(fallback.model),
            max_delegation_depth: self.max_delegation_depth.or(fallback.max_delegation_depth),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        AppConfig {
            bind_addr: self
                .bind_addr
                .unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            shared_secret: self
                .shared_secret
                .unwrap_or_else(|| "parley-dev".to_string()),
            padding_bytes: self.padding_bytes.unwrap_or(4096),
            oracle_url: self
                .oracle_url
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: self.model.unwrap_or_else(|| "llama3.2".to_string()),
            max_delegation_depth: self.max_delegation_depth.unwrap_or(MAX_DELEGATION_DEPTH),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_values_win() {
        let cli = PartialConfig {
            model: Some("qwen2.5:7b".to_string()),
            ..Default::default()
        };
        let file = PartialConfig {
            model: Some("llama3.2".to_string()),
            bind_addr: Some("0.0.0.0:9000".to_string()),
            ..Default::default()
        };

        let config = cli.with_fallback(file).finalize();
        assert_eq!(config.model, "qwen2.5:7b");
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
    }

    #[test]
    fn finalize_fills_every_gap() {
        let config = PartialConfig::default().finalize();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.oracle_url, "http://localhost:11434");
        assert_eq!(config.padding_bytes, 4096);
        assert_eq!(config.max_delegation_depth, MAX_DELEGATION_DEPTH);
    }
}
