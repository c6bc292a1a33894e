//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::StartOptions;
    use crate::net::tls::{AlpnProtocol, CertificateSource, ClientAuth};

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.listener.port, 0);
        assert!(config.tls.is_none());
        assert_eq!(config.log_level(), "info");
    }

    #[test]
    fn full_config_maps_to_start_options() {
        let config = parse_config(
            r#"
            feature_path = "mocks/cats.feature"
            workers = 4

            [listener]
            host = "127.0.0.1"
            port = 8443

            [tls]
            self_signed = true
            client_auth = "OPTIONAL"
            alpn_protocols = ["http/1.1"]

            [variables]
            status = 201
            name = "cats"
            "#,
        )
        .unwrap();

        let options = StartOptions::from(&config);
        assert_eq!(options.bind_host, "127.0.0.1");
        assert_eq!(options.port, 8443);
        assert_eq!(options.workers, Some(4));
        let tls = options.tls.unwrap();
        assert_eq!(tls.source, CertificateSource::SelfSigned);
        assert_eq!(tls.client_auth, ClientAuth::Optional);
        assert_eq!(tls.alpn_protocols, vec![AlpnProtocol::Http11]);
        assert_eq!(options.backend.variables["status"], 201);
        assert_eq!(
            options.backend.source.as_deref(),
            Some(Path::new("mocks/cats.feature"))
        );
    }

    #[test]
    fn unknown_client_auth_converts_to_none() {
        let config =
            parse_config("[tls]\nself_signed = true\nclient_auth = \"sometimes\"\n").unwrap();
        let tls = StartOptions::from(&config).tls.unwrap();
        assert_eq!(tls.client_auth, ClientAuth::None);
    }

    #[test]
    fn invalid_config_reports_validation_errors() {
        let err = parse_config("[tls]\ncert_path = \"only-cert.pem\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref e) if e.len() == 1));
        assert!(err.to_string().starts_with("Validation failed"));
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        assert!(matches!(parse_config("listener = ["), Err(ConfigError::Parse(_))));
    }
}
