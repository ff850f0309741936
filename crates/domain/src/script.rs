//! Script declarations — resolved executable path, argument vector, and
//! per-script wall-clock limit.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 3600;

/// A single child script of a job. Immutable after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptSpec {
    /// Path as declared in the config (kept for logs and exports).
    pub path: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
    /// Absolute path resolved against the job working directory.
    pub resolved_path: PathBuf,
}

/// Raw `scripts:` list entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawScript {
    pub path: Option<String>,
    pub args: Option<serde_yaml::Value>,
    pub timeout: Option<i64>,
}

impl RawScript {
    pub fn resolve(&self, field: &str, working_dir: &Path) -> Result<ScriptSpec> {
        let path = self
            .path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::config(format!("{field}.path must be a non-empty string.")))?
            .to_string();

        let args = parse_args(self.args.as_ref(), field)?;

        let timeout_seconds = match self.timeout {
            None => DEFAULT_TIMEOUT_SECONDS,
            Some(t) if t >= 1 => t as u64,
            Some(_) => {
                return Err(Error::config(format!("{field}.timeout must be >= 1.")));
            }
        };

        let raw_path = PathBuf::from(&path);
        let resolved = if raw_path.is_absolute() {
            raw_path
        } else {
            working_dir.join(raw_path)
        };
        let resolved = resolved
            .canonicalize()
            .map_err(|_| script_missing(field, &resolved))?;
        if !resolved.is_file() {
            return Err(script_missing(field, &resolved));
        }

        Ok(ScriptSpec {
            path,
            args,
            timeout_seconds,
            resolved_path: resolved,
        })
    }
}

fn script_missing(field: &str, resolved: &Path) -> Error {
    Error::config(format!(
        "Script path does not exist for {field}.path: {}",
        resolved.display()
    ))
}

/// Args may be a YAML list of scalars or a shell-quoted string.
fn parse_args(raw: Option<&serde_yaml::Value>, field: &str) -> Result<Vec<String>> {
    let value = match raw {
        None | Some(serde_yaml::Value::Null) => return Ok(Vec::new()),
        Some(value) => value,
    };
    if let Some(text) = value.as_str() {
        return shlex::split(text).ok_or_else(|| {
            Error::config(format!("{field}.args has unbalanced quoting: \"{text}\"."))
        });
    }
    if let Some(seq) = value.as_sequence() {
        let mut args = Vec::with_capacity(seq.len());
        for (idx, item) in seq.iter().enumerate() {
            let arg = match item {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(Error::config(format!(
                        "{field}.args[{idx}] must be scalar value convertible to string."
                    )))
                }
            };
            args.push(arg);
        }
        return Ok(args);
    }
    Err(Error::config(format!(
        "{field}.args must be a list or shell-style string."
    )))
}
