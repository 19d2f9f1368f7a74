use crate::application::config::models::{GatewayConfig, ScriptDirConfig};
use crate::application::config::validator::normalize_prefix;
use crate::common::error::{ConfigurationError, GatewayError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A request path mapped onto a program on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScript {
    /// URL path of the script (SCRIPT_NAME)
    pub script_name: String,

    /// Canonical file path (SCRIPT_FILENAME)
    pub script_filename: PathBuf,

    /// Request path beyond the script, with leading '/' (PATH_INFO)
    pub path_info: String,

    /// Interpreter mapped for the script's extension
    pub interpreter: Option<PathBuf>,

    /// Per-mapping timeout override
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
struct ScriptMapping {
    prefix: String,
    directory: PathBuf,
    timeout: Option<Duration>,
    interpreters: BTreeMap<String, PathBuf>,
}

impl ScriptMapping {
    /// Remainder of `path` when it lies under this prefix, on a segment boundary.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.prefix == "/" {
            return Some(path);
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

/// Maps URL paths onto executables below the configured script directories.
#[derive(Debug, Clone)]
pub struct ScriptResolver {
    document_root: PathBuf,
    mappings: Vec<ScriptMapping>,
}

impl ScriptResolver {
    pub fn new(gateway: &GatewayConfig, scripts: &[ScriptDirConfig]) -> Result<Self> {
        let document_root = fs::canonicalize(&gateway.document_root).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to resolve document_root '{}': {}",
                gateway.document_root.display(),
                e
            ))
        })?;

        let mut mappings = Vec::with_capacity(scripts.len());
        for script_dir in scripts {
            let joined = document_root.join(&script_dir.directory);
            let directory = fs::canonicalize(&joined).map_err(|e| {
                GatewayError::Config(format!(
                    "Failed to resolve script directory '{}': {}",
                    joined.display(),
                    e
                ))
            })?;
            mappings.push(ScriptMapping {
                prefix: normalize_prefix(&script_dir.prefix).to_string(),
                directory,
                timeout: script_dir.timeout_secs.map(Duration::from_secs),
                interpreters: script_dir.interpreters.clone(),
            });
        }

        // Longest prefix first, so the first match is the most specific one.
        mappings.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Ok(Self {
            document_root,
            mappings,
        })
    }

    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    /// Resolve the path part of a request target.
    pub fn resolve(&self, path: &str) -> std::result::Result<ResolvedScript, ConfigurationError> {
        let (mapping, rest) = self
            .mappings
            .iter()
            .find_map(|m| m.strip(path).map(|rest| (m, rest)))
            .ok_or_else(|| ConfigurationError::NoMapping(path.to_string()))?;

        let mut segments = Vec::new();
        for raw in rest.split('/').filter(|s| !s.is_empty() && *s != ".") {
            let segment = percent_decode(raw)
                .ok_or_else(|| ConfigurationError::EscapesRoot(path.to_string()))?;
            if segment == ".." || segment.contains('/') || segment.contains('\0') {
                return Err(ConfigurationError::EscapesRoot(path.to_string()));
            }
            segments.push(segment);
        }

        // Walk down until the first regular file; the rest is PATH_INFO.
        let mut candidate = mapping.directory.clone();
        let mut script_index = None;
        for (idx, segment) in segments.iter().enumerate() {
            candidate.push(segment);
            match fs::metadata(&candidate) {
                Ok(meta) if meta.is_file() => {
                    script_index = Some(idx);
                    break;
                }
                Ok(meta) if meta.is_dir() => continue,
                _ => return Err(ConfigurationError::NotFound(candidate)),
            }
        }
        let script_index = script_index.ok_or_else(|| ConfigurationError::NotFound(candidate.clone()))?;

        let script_filename = fs::canonicalize(&candidate)
            .map_err(|_| ConfigurationError::NotFound(candidate.clone()))?;
        if !script_filename.starts_with(&mapping.directory) {
            return Err(ConfigurationError::EscapesRoot(path.to_string()));
        }

        let interpreter = script_filename
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| mapping.interpreters.get(&format!(".{}", ext)))
            .cloned();

        let mode = fs::metadata(&script_filename)
            .map_err(|_| ConfigurationError::NotFound(script_filename.clone()))?
            .permissions()
            .mode();
        let runnable = match interpreter {
            Some(_) => mode & 0o444 != 0,
            None => mode & 0o111 != 0,
        };
        if !runnable {
            return Err(ConfigurationError::NotExecutable(script_filename));
        }

        let prefix = if mapping.prefix == "/" { "" } else { mapping.prefix.as_str() };
        let script_name = format!("{}/{}", prefix, segments[..=script_index].join("/"));
        let path_info = segments[script_index + 1..]
            .iter()
            .map(|s| format!("/{}", s))
            .collect::<String>();

        Ok(ResolvedScript {
            script_name,
            script_filename,
            path_info,
            interpreter,
            timeout: mapping.timeout,
        })
    }
}

/// Decode `%XX` escapes; `None` for malformed escapes or non-UTF-8 results.
pub fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
