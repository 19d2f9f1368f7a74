use crate::application::cgi::script_resolver::{percent_decode, ResolvedScript, ScriptResolver};
use crate::common::constants::{GATEWAY_INTERFACE, SERVER_SOFTWARE};
use crate::common::error::{ConfigurationError, Result};
use crate::http::headers::names as header_names;
use crate::http::request::Request;
use log::debug;
use std::collections::BTreeMap;

/// Variables handed to a CGI program. Every entry is a valid environment
/// string: non-empty name without `=`, no NUL anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgiEnvironment {
    vars: BTreeMap<String, String>,
}

impl CgiEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) -> std::result::Result<(), ConfigurationError> {
        if name.is_empty() || name.contains('=') || name.contains('\0') {
            return Err(ConfigurationError::InvalidEnvironment(name.to_string()));
        }
        if value.contains('\0') {
            return Err(ConfigurationError::InvalidEnvironment(name.to_string()));
        }
        self.vars.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Static facts about the gateway exported to every program.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub server_name: String,
    pub server_port: u16,
    /// PATH given to programs; nothing else is inherited from the gateway
    pub safe_path: String,
}

/// Turns an inbound request into a script location plus its CGI/1.1
/// environment.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    resolver: ScriptResolver,
    identity: ServerIdentity,
}

impl EnvironmentBuilder {
    pub fn new(resolver: ScriptResolver, identity: ServerIdentity) -> Self {
        Self { resolver, identity }
    }

    pub fn resolver(&self) -> &ScriptResolver {
        &self.resolver
    }

    /// Resolve the target program and build its environment.
    pub fn prepare(&self, request: &Request) -> Result<(ResolvedScript, CgiEnvironment)> {
        let script = self.resolver.resolve(request.path())?;
        let env = self.build(request, &script)?;
        Ok((script, env))
    }

    pub fn build(
        &self,
        request: &Request,
        script: &ResolvedScript,
    ) -> std::result::Result<CgiEnvironment, ConfigurationError> {
        let mut env = CgiEnvironment::new();
        let document_root = self.resolver.document_root();

        env.insert("GATEWAY_INTERFACE", GATEWAY_INTERFACE)?;
        env.insert("SERVER_SOFTWARE", SERVER_SOFTWARE)?;
        env.insert("SERVER_NAME", &self.identity.server_name)?;
        env.insert("SERVER_PORT", &self.identity.server_port.to_string())?;
        env.insert("SERVER_PROTOCOL", request.version.as_str())?;
        env.insert("PATH", &self.identity.safe_path)?;

        env.insert("REQUEST_METHOD", request.method.as_str())?;
        env.insert("REQUEST_URI", &request.target)?;
        env.insert("QUERY_STRING", request.query_string().unwrap_or(""))?;

        env.insert("DOCUMENT_ROOT", &document_root.to_string_lossy())?;
        env.insert("SCRIPT_NAME", &script.script_name)?;
        env.insert("SCRIPT_FILENAME", &script.script_filename.to_string_lossy())?;
        env.insert("PATH_INFO", &script.path_info)?;
        if !script.path_info.is_empty() {
            let translated = document_root.join(script.path_info.trim_start_matches('/'));
            env.insert("PATH_TRANSLATED", &translated.to_string_lossy())?;
        }

        if let Some(addr) = request.remote_addr {
            env.insert("REMOTE_ADDR", &addr.ip().to_string())?;
            env.insert("REMOTE_PORT", &addr.port().to_string())?;
        }

        // Absent unless there is a body or the client said "Content-Length: 0".
        if !request.body.is_empty() {
            env.insert("CONTENT_LENGTH", &request.body.len().to_string())?;
        } else if request.declared_content_length().is_some() {
            env.insert("CONTENT_LENGTH", "0")?;
        }
        if let Some(content_type) = request.content_type() {
            env.insert("CONTENT_TYPE", content_type)?;
        }

        for name in request.headers.names() {
            if name.eq_ignore_ascii_case(header_names::CONTENT_TYPE)
                || name.eq_ignore_ascii_case(header_names::CONTENT_LENGTH)
                || name.eq_ignore_ascii_case(header_names::PROXY)
            {
                continue;
            }

            let values = request.headers.get_all(name);
            if values.iter().any(|v| v.contains('\0')) {
                debug!("dropping header {:?}: value contains NUL", name);
                continue;
            }
            let separator = if name.eq_ignore_ascii_case(header_names::COOKIE) {
                "; "
            } else {
                ", "
            };
            let var = header_env_name(name);
            // "X-A" and "X_A" collapse onto the same variable; keep both values.
            let joined = match env.get(&var) {
                Some(existing) => format!("{}{}{}", existing, separator, values.join(separator)),
                None => values.join(separator),
            };
            if let Err(e) = env.insert(&var, &joined) {
                debug!("dropping header {:?}: {}", name, e);
            }
        }

        Ok(env)
    }
}

/// `X-Forwarded-For` -> `HTTP_X_FORWARDED_FOR`
pub fn header_env_name(name: &str) -> String {
    let mut var = String::with_capacity(5 + name.len());
    var.push_str("HTTP_");
    for c in name.chars() {
        var.push(if c == '-' { '_' } else { c.to_ascii_uppercase() });
    }
    var
}

/// Command-line words for an "indexed" query (one without `=`), split on `+`.
pub fn search_arguments(query: &str) -> Vec<String> {
    if query.is_empty() || query.contains('=') {
        return Vec::new();
    }
    query
        .split('+')
        .filter(|word| !word.is_empty())
        .filter_map(percent_decode)
        .filter(|word| !word.contains('\0'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::models::{GatewayConfig, ScriptDirConfig};
    use crate::http::method::Method;
    use crate::http::version::Version;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn builder(root: &Path) -> EnvironmentBuilder {
        let bin = root.join("cgi-bin");
        fs::create_dir_all(&bin).unwrap();
        let script = bin.join("hello");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let resolver = ScriptResolver::new(
            &GatewayConfig::new(root.to_path_buf()),
            &[ScriptDirConfig::new("/cgi-bin", "cgi-bin")],
        )
        .unwrap();
        EnvironmentBuilder::new(
            resolver,
            ServerIdentity {
                server_name: "localhost".to_string(),
                server_port: 8080,
                safe_path: "/usr/bin:/bin".to_string(),
            },
        )
    }

    #[test]
    fn test_round_trip_variables() {
        let root = tempfile::tempdir().unwrap();
        let builder = builder(root.path());
        let mut request = Request::new(Method::GET, "/cgi-bin/hello?x=1", Version::Http11);
        request.headers.add("X-Test", "abc");

        let (script, env) = builder.prepare(&request).unwrap();
        assert_eq!(script.script_name, "/cgi-bin/hello");
        assert_eq!(env.get("REQUEST_METHOD"), Some("GET"));
        assert_eq!(env.get("QUERY_STRING"), Some("x=1"));
        assert_eq!(env.get("HTTP_X_TEST"), Some("abc"));
        assert_eq!(env.get("GATEWAY_INTERFACE"), Some("CGI/1.1"));
        assert_eq!(env.get("SERVER_PROTOCOL"), Some("HTTP/1.1"));
        assert_eq!(env.get("SERVER_PORT"), Some("8080"));
        assert_eq!(env.get("PATH"), Some("/usr/bin:/bin"));
        assert!(!env.contains("CONTENT_LENGTH"));
        assert!(!env.contains("PATH_TRANSLATED"));
    }

    #[test]
    fn test_query_string_empty_when_absent() {
        let root = tempfile::tempdir().unwrap();
        let builder = builder(root.path());
        let request = Request::new(Method::GET, "/cgi-bin/hello", Version::Http11);
        let (_, env) = builder.prepare(&request).unwrap();
        assert_eq!(env.get("QUERY_STRING"), Some(""));
    }

    #[test]
    fn test_content_length_rules() {
        let root = tempfile::tempdir().unwrap();
        let builder = builder(root.path());

        let mut request = Request::new(Method::POST, "/cgi-bin/hello", Version::Http11);
        request.body = b"a=1&b=2".to_vec();
        request.headers.add("Content-Type", "application/x-www-form-urlencoded");
        request.headers.add("Content-Length", "7");
        let (_, env) = builder.prepare(&request).unwrap();
        assert_eq!(env.get("CONTENT_LENGTH"), Some("7"));
        assert_eq!(env.get("CONTENT_TYPE"), Some("application/x-www-form-urlencoded"));
        assert!(!env.contains("HTTP_CONTENT_LENGTH"));
        assert!(!env.contains("HTTP_CONTENT_TYPE"));

        let mut request = Request::new(Method::POST, "/cgi-bin/hello", Version::Http11);
        request.headers.add("Content-Length", "0");
        let (_, env) = builder.prepare(&request).unwrap();
        assert_eq!(env.get("CONTENT_LENGTH"), Some("0"));
    }

    #[test]
    fn test_multi_valued_headers_are_joined() {
        let root = tempfile::tempdir().unwrap();
        let builder = builder(root.path());
        let mut request = Request::new(Method::GET, "/cgi-bin/hello", Version::Http11);
        request.headers.add("Accept", "text/html");
        request.headers.add("accept", "application/json");
        request.headers.add("Cookie", "a=1");
        request.headers.add("Cookie", "b=2");

        let (_, env) = builder.prepare(&request).unwrap();
        assert_eq!(env.get("HTTP_ACCEPT"), Some("text/html, application/json"));
        assert_eq!(env.get("HTTP_COOKIE"), Some("a=1; b=2"));
    }

    #[test]
    fn test_proxy_header_never_exported() {
        let root = tempfile::tempdir().unwrap();
        let builder = builder(root.path());
        let mut request = Request::new(Method::GET, "/cgi-bin/hello", Version::Http11);
        request.headers.add("Proxy", "http://evil.example:3128");
        let (_, env) = builder.prepare(&request).unwrap();
        assert!(!env.contains("HTTP_PROXY"));
    }

    #[test]
    fn test_path_info_and_remote_addr() {
        let root = tempfile::tempdir().unwrap();
        let builder = builder(root.path());
        let mut request = Request::new(Method::GET, "/cgi-bin/hello/a/b", Version::Http10);
        request.remote_addr = Some("10.1.2.3:4567".parse().unwrap());
        let (_, env) = builder.prepare(&request).unwrap();
        assert_eq!(env.get("PATH_INFO"), Some("/a/b"));
        assert!(env.get("PATH_TRANSLATED").unwrap().ends_with("/a/b"));
        assert_eq!(env.get("REMOTE_ADDR"), Some("10.1.2.3"));
        assert_eq!(env.get("REMOTE_PORT"), Some("4567"));
        assert_eq!(env.get("SERVER_PROTOCOL"), Some("HTTP/1.0"));
    }

    #[test]
    fn test_nul_in_query_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let builder = builder(root.path());
        let request = Request::new(Method::GET, "/cgi-bin/hello?a=\0", Version::Http11);
        assert!(builder.prepare(&request).is_err());
    }

    #[test]
    fn test_environment_rejects_invalid_entries() {
        let mut env = CgiEnvironment::new();
        assert!(env.insert("A=B", "x").is_err());
        assert!(env.insert("", "x").is_err());
        assert!(env.insert("A", "x\0y").is_err());
        assert!(env.insert("A", "x").is_ok());
    }

    #[test]
    fn test_header_env_name() {
        assert_eq!(header_env_name("X-Forwarded-For"), "HTTP_X_FORWARDED_FOR");
        assert_eq!(header_env_name("user-agent"), "HTTP_USER_AGENT");
    }

    #[test]
    fn test_search_arguments() {
        assert_eq!(search_arguments("hello+big%20world"), vec!["hello", "big world"]);
        assert!(search_arguments("x=1").is_empty());
        assert!(search_arguments("").is_empty());
    }
}
