use crate::application::config::models::Config;
use crate::application::config::parser::{parse_config, parse_config_file};
use crate::application::config::validator::validate_config;
use crate::common::error::Result;
use std::path::Path;

/// Load and validate configuration
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &Path) -> Result<Config> {
        let config = parse_config_file(path)?;
        validate_config(&config)?;
        Ok(config)
    }

    pub fn load_from_str(content: &str) -> Result<Config> {
        let config = parse_config(content)?;
        validate_config(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_rejects_missing_root() {
        let toml = r#"
            [gateway]
            document_root = "/no/such/document/root"
        "#;

        // Parses, but fails validation.
        assert!(ConfigLoader::load_from_str(toml).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(ConfigLoader::load(Path::new("/no/such/gateway.toml")).is_err());
    }
}
