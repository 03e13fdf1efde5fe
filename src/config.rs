//! Service configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `PILOSA_*` environment variables (e.g. `PILOSA_PORT_HTTP=15001`).

use crate::error::{PilosaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable prefix
const ENV_PREFIX: &str = "PILOSA";

/// Default archive location for captured `set_bits` traffic
pub const DEFAULT_REQUEST_LOG_PATH: &str = "/tmp/set_bit_log";

/// Configuration for the HTTP boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Port the HTTP listener binds to
    pub port_http: u16,

    /// Identifier of this process, used in archive file names
    pub id: String,

    /// Database used by `/query` when the request names none
    #[serde(default)]
    pub default_db: String,

    /// Base directory of the request archive
    pub request_log_path: PathBuf,

    /// Capture `/set_bits` requests into the archive
    #[serde(default)]
    pub log_set_bit_request: bool,

    /// Host name this process advertises to peers
    pub host: String,

    /// Version string reported by `/version`
    pub version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port_http: 15000,
            id: "pilosa".to_string(),
            default_db: String::new(),
            request_log_path: PathBuf::from(DEFAULT_REQUEST_LOG_PATH),
            log_set_bit_request: false,
            host: "127.0.0.1".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = ServiceConfig::default();

        let mut builder = config::Config::builder()
            .set_default("port_http", i64::from(defaults.port_http))?
            .set_default("id", defaults.id.clone())?
            .set_default("default_db", defaults.default_db.clone())?
            .set_default(
                "request_log_path",
                defaults.request_log_path.to_string_lossy().to_string(),
            )?
            .set_default("log_set_bit_request", defaults.log_set_bit_request)?
            .set_default("host", defaults.host.clone())?
            .set_default("version", defaults.version.clone())?;

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: ServiceConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.port_http == 0 {
            return Err(PilosaError::Config(config::ConfigError::Message(
                "port_http must be greater than 0".to_string(),
            )));
        }

        // The id ends up in file names
        if self.id.is_empty() || self.id.contains(std::path::MAIN_SEPARATOR) {
            return Err(PilosaError::Config(config::ConfigError::Message(format!(
                "id must be a non-empty file name component, got '{}'",
                self.id
            ))));
        }

        if self.request_log_path.as_os_str().is_empty() {
            return Err(PilosaError::Config(config::ConfigError::Message(
                "request_log_path cannot be empty".to_string(),
            )));
        }

        Ok(())
    }
}
