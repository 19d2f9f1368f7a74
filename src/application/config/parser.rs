use crate::application::config::models::Config;
use crate::common::error::{GatewayError, Result};
use std::fs;
use std::path::Path;

/// Parse configuration from a TOML file
pub fn parse_config_file(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| {
        GatewayError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content)
        .map_err(|e| GatewayError::Config(format!("Failed to parse TOML config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::models::OverloadPolicy;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [gateway]
            document_root = "www"
        "#;

        let config = parse_config(toml).unwrap();
        assert_eq!(config.server.server_name, "localhost");
        assert_eq!(config.gateway.max_concurrency, 16);
        assert_eq!(config.gateway.overload, OverloadPolicy::Queue);
        assert!(config.scripts.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            listen = "0.0.0.0:9000"
            server_name = "example.org"

            [gateway]
            document_root = "/srv/www"
            timeout_secs = 5
            grace_period_ms = 250
            max_concurrency = 2
            overload = "reject"

            [[scripts]]
            prefix = "/cgi-bin"
            directory = "cgi-bin"
            timeout_secs = 1

            [scripts.interpreters]
            ".py" = "/usr/bin/python3"
        "#;

        let config = parse_config(toml).unwrap();
        assert_eq!(config.server.listen.port(), 9000);
        assert_eq!(config.gateway.overload, OverloadPolicy::Reject);
        assert_eq!(config.gateway.grace_period_ms, 250);
        assert_eq!(config.scripts.len(), 1);
        assert_eq!(config.scripts[0].timeout_secs, Some(1));
        assert_eq!(
            config.scripts[0].interpreters.get(".py").map(|p| p.as_path()),
            Some(Path::new("/usr/bin/python3"))
        );
    }

    #[test]
    fn test_missing_gateway_section() {
        assert!(matches!(parse_config("[server]\n"), Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_unknown_overload_policy() {
        let toml = r#"
            [gateway]
            document_root = "www"
            overload = "drop"
        "#;
        assert!(parse_config(toml).is_err());
    }
}
