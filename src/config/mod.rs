pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::{Cli, Commands};
use crate::error::ConfigError;
use std::path::Path;

/// Load configuration by merging global, explicit-file, and CLI sources.
/// Precedence: CLI > --config file > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply).
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Global config (~/.config/parley/parley.toml or platform equivalent)
    let global = load_global_config();

    // Layer 2: Explicit --config path, if given.
    let explicit = cli_config_path(cli)
        .and_then(|p| load_toml_file(&p))
        .unwrap_or_default();

    // Layer 3: CLI args (converted to PartialConfig)
    let cli_partial = cli_to_partial(cli);

    // Merge: CLI > explicit file > global > defaults
    let config = cli_partial
        .with_fallback(explicit)
        .with_fallback(global)
        .finalize();

    Ok(config)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found.
fn load_global_config() -> PartialConfig {
    let path = global_config_path();
    match path {
        Some(p) => load_toml_file(&p).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns None on file-not-found; logs read/parse errors and falls back.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match read_toml_file(path) {
        Ok(partial) => partial,
        Err(e) => {
            tracing::warn!("Config error: {e}");
            None
        }
    }
}

/// Read and parse one config file. File-not-found is `Ok(None)` (defaults
/// apply); everything else is a [`ConfigError`].
fn read_toml_file(path: &Path) -> Result<Option<PartialConfig>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(None);
        }
        Err(e) => return Err(ConfigError::IoError(e)),
    };

    let config_file =
        toml::from_str::<ConfigFile>(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(Some(config_file.to_partial()))
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/parley/parley.toml
/// macOS: ~/Library/Application Support/parley/parley.toml
fn global_config_path() -> Option<std::path::PathBuf> {
    directories::ProjectDirs::from("", "", "parley")
        .map(|dirs| dirs.config_dir().join("parley.toml"))
}

/// Extract the explicit config path from CLI args.
fn cli_config_path(cli: &Cli) -> Option<std::path::PathBuf> {
    match &cli.command {
        Commands::Serve { config, .. } => config.clone(),
    }
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    match &cli.command {
        Commands::Serve {
            bind,
            secret,
            oracle_url,
            model,
            max_depth,
            config: _,
        } => PartialConfig {
            bind_addr: bind.clone(),
            shared_secret: secret.clone(),
            oracle_url: oracle_url.clone(),
            model: model.clone(),
            max_delegation_depth: *max_depth,
            ..Default::default()
        },
    }
}
