use crate::application::config::models::{Config, GatewayConfig, OverloadPolicy, ScriptDirConfig};
use crate::common::constants::MAX_CGI_TIMEOUT_SECS;
use crate::common::error::{GatewayError, Result};
use std::collections::HashSet;

/// Validate configuration for correctness and consistency
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server(config)?;
    validate_gateway(&config.gateway)?;

    let mut prefixes = HashSet::new();
    for (idx, scripts) in config.scripts.iter().enumerate() {
        validate_script_dir(scripts, idx, &config.gateway)?;
        if !prefixes.insert(normalize_prefix(&scripts.prefix)) {
            return Err(GatewayError::Config(format!(
                "Script mapping {}: prefix '{}' is configured more than once",
                idx, scripts.prefix
            )));
        }
    }

    Ok(())
}

fn validate_server(config: &Config) -> Result<()> {
    if config.server.server_name.is_empty() {
        return Err(GatewayError::Config("server_name cannot be empty".to_string()));
    }
    if config.server.client_timeout_secs == 0 {
        return Err(GatewayError::Config(
            "client_timeout_secs must be greater than 0".to_string(),
        ));
    }
    if config.server.max_body_size == 0 {
        return Err(GatewayError::Config(
            "max_body_size must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<()> {
    if gateway.timeout_secs == 0 {
        return Err(GatewayError::Config("timeout_secs must be greater than 0".to_string()));
    }
    if gateway.timeout_secs > MAX_CGI_TIMEOUT_SECS {
        return Err(GatewayError::Config(format!(
            "timeout_secs must be at most {}",
            MAX_CGI_TIMEOUT_SECS
        )));
    }
    if gateway.max_output_size == 0 {
        return Err(GatewayError::Config(
            "max_output_size must be greater than 0".to_string(),
        ));
    }
    if gateway.max_concurrency == 0 {
        return Err(GatewayError::Config(
            "max_concurrency must be greater than 0".to_string(),
        ));
    }
    if gateway.overload == OverloadPolicy::Queue && gateway.queue_depth == 0 {
        return Err(GatewayError::Config(
            "queue_depth must be greater than 0 when overload = \"queue\"".to_string(),
        ));
    }
    if gateway.safe_path.contains('\0') {
        return Err(GatewayError::Config("safe_path contains a NUL byte".to_string()));
    }
    if !gateway.document_root.is_dir() {
        return Err(GatewayError::Config(format!(
            "document_root '{}' does not exist or is not a directory",
            gateway.document_root.display()
        )));
    }
    Ok(())
}

fn validate_script_dir(scripts: &ScriptDirConfig, idx: usize, gateway: &GatewayConfig) -> Result<()> {
    if !scripts.prefix.starts_with('/') {
        return Err(GatewayError::Config(format!(
            "Script mapping {}: prefix '{}' must start with '/'",
            idx, scripts.prefix
        )));
    }

    match scripts.timeout_secs {
        Some(0) => {
            return Err(GatewayError::Config(format!(
                "Script mapping {}: timeout_secs must be greater than 0",
                idx
            )));
        }
        Some(secs) if secs > MAX_CGI_TIMEOUT_SECS => {
            return Err(GatewayError::Config(format!(
                "Script mapping {}: timeout_secs must be at most {}",
                idx, MAX_CGI_TIMEOUT_SECS
            )));
        }
        _ => {}
    }

    let directory = gateway.document_root.join(&scripts.directory);
    if !directory.is_dir() {
        return Err(GatewayError::Config(format!(
            "Script mapping {}: directory '{}' does not exist",
            idx,
            directory.display()
        )));
    }

    for (ext, interpreter) in &scripts.interpreters {
        if !ext.starts_with('.') || ext.len() < 2 {
            return Err(GatewayError::Config(format!(
                "Script mapping {}: extension '{}' must start with '.'",
                idx, ext
            )));
        }
        if interpreter.as_os_str().is_empty() {
            return Err(GatewayError::Config(format!(
                "Script mapping {}: interpreter for '{}' cannot be empty",
                idx, ext
            )));
        }
    }

    Ok(())
}

/// "/cgi-bin/" and "/cgi-bin" name the same mapping.
pub fn normalize_prefix(prefix: &str) -> &str {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}
