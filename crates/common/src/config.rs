//! Service configuration
//!
//! Read from an INI file with a `[Scouter]` section:
//!
//! ```ini
//! [Scouter]
//! api_secret = change-me
//! max_test_count = 50
//! max_process_count = 8
//! ```

use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{ScouterError, ScouterResult};

pub const DEFAULT_RECEIPT_TTL_SECS: u64 = 600;
pub const DEFAULT_ASN_DATABASE: &str = "mmdb/GeoLite2-ASN.mmdb";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Value every API request must present in its `Authorization` header.
    pub api_secret: String,
    /// Ceiling on total probes per batch.
    pub max_test_count: usize,
    /// Ceiling on parallel probe workers per batch.
    pub max_process_count: usize,
    pub receipt_ttl: Duration,
    pub asn_database: String,
    pub listen: String,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(alias = "Scouter")]
    scouter: Option<Section>,
}

#[derive(Debug, Deserialize)]
struct Section {
    api_secret: Option<String>,
    max_test_count: Option<usize>,
    max_process_count: Option<usize>,
    receipt_ttl_secs: Option<u64>,
    asn_database: Option<String>,
    listen: Option<String>,
}

impl ServiceConfig {
    /// Load and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> ScouterResult<Self> {
        let path = path.as_ref();
        let source = path
            .to_str()
            .ok_or_else(|| ScouterError::Configuration(format!("invalid path {path:?}")))?;
        let settings = Config::builder()
            .add_source(File::new(source, FileFormat::Ini))
            .build()
            .map_err(|e| ScouterError::Configuration(e.to_string()))?;
        Self::from_config(settings)
    }

    /// Parse configuration from INI text.
    pub fn from_ini(text: &str) -> ScouterResult<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Ini))
            .build()
            .map_err(|e| ScouterError::Configuration(e.to_string()))?;
        Self::from_config(settings)
    }

    fn from_config(settings: Config) -> ScouterResult<Self> {
        let file: ConfigFile = settings
            .try_deserialize()
            .map_err(|e| ScouterError::Configuration(e.to_string()))?;
        let section = file
            .scouter
            .ok_or_else(|| ScouterError::Configuration("missing [Scouter] section".into()))?;

        let api_secret = section
            .api_secret
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("api_secret"))?;
        let max_test_count = section.max_test_count.ok_or_else(|| missing("max_test_count"))?;
        let max_process_count = section
            .max_process_count
            .ok_or_else(|| missing("max_process_count"))?;
        if max_test_count == 0 || max_process_count == 0 {
            return Err(ScouterError::Configuration(
                "max_test_count and max_process_count must be greater than zero".into(),
            ));
        }

        Ok(Self {
            api_secret,
            max_test_count,
            max_process_count,
            receipt_ttl: Duration::from_secs(
                section.receipt_ttl_secs.unwrap_or(DEFAULT_RECEIPT_TTL_SECS),
            ),
            asn_database: section
                .asn_database
                .unwrap_or_else(|| DEFAULT_ASN_DATABASE.to_string()),
            listen: section.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
        })
    }
}

fn missing(option: &str) -> ScouterError {
    ScouterError::Configuration(format!("missing required option '{option}' in [Scouter]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_file() {
        let cfg = ServiceConfig::from_ini(
            "[Scouter]\napi_secret = hunter2\nmax_test_count = 20\nmax_process_count = 4\n",
        )
        .unwrap();
        assert_eq!(cfg.api_secret, "hunter2");
        assert_eq!(cfg.max_test_count, 20);
        assert_eq!(cfg.max_process_count, 4);
        assert_eq!(cfg.receipt_ttl, Duration::from_secs(600));
        assert_eq!(cfg.asn_database, DEFAULT_ASN_DATABASE);
        assert_eq!(cfg.listen, DEFAULT_LISTEN);
    }

    #[test]
    fn optional_keys_override_defaults() {
        let cfg = ServiceConfig::from_ini(
            "[Scouter]\napi_secret = s\nmax_test_count = 1\nmax_process_count = 1\n\
             receipt_ttl_secs = 30\nlisten = 127.0.0.1:9000\n",
        )
        .unwrap();
        assert_eq!(cfg.receipt_ttl, Duration::from_secs(30));
        assert_eq!(cfg.listen, "127.0.0.1:9000");
    }

    #[test]
    fn missing_required_option_is_configuration_error() {
        let err = ServiceConfig::from_ini("[Scouter]\napi_secret = s\nmax_test_count = 5\n")
            .unwrap_err();
        assert!(matches!(err, ScouterError::Configuration(_)));
        assert!(err.to_string().contains("max_process_count"));
    }

    #[test]
    fn missing_section_is_configuration_error() {
        let err = ServiceConfig::from_ini("[Other]\nkey = value\n").unwrap_err();
        assert!(matches!(err, ScouterError::Configuration(_)));
    }

    #[test]
    fn zero_ceilings_rejected() {
        let err = ServiceConfig::from_ini(
            "[Scouter]\napi_secret = s\nmax_test_count = 0\nmax_process_count = 2\n",
        )
        .unwrap_err();
        assert!(matches!(err, ScouterError::Configuration(_)));
    }
}
