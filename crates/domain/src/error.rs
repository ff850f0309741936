/// Shared error type used across all chief crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration rejected at load time. The message carries the field
    /// path; the rendered form always starts with the stable `Error: `
    /// prefix that callers and tests match on.
    #[error("Error: {0}")]
    Config(String),

    #[error("unknown job \"{0}\"")]
    UnknownJob(String),

    #[error("no enabled jobs selected")]
    NoEnabledJobs,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_carry_stable_prefix() {
        let err = Error::config("jobs[0].name must be a non-empty string.");
        assert!(err.to_string().starts_with("Error: "));
    }
}
