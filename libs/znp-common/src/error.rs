//! Errors from loading link settings and installing the log subscriber

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Layered settings did not match the expected shape
    #[error("config: {0}")]
    Config(String),

    /// A settings file that is missing, unreadable or of an unknown format
    #[error("config file {}: {reason}", .path.display())]
    ConfigFile { path: PathBuf, reason: String },

    /// A value the link cannot run with
    #[error("invalid {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    /// Filter directive or subscriber installation failed
    #[error("logging: {0}")]
    Logging(String),

    #[error("log file: {0}")]
    LogFile(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config_file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::ConfigFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_setting(key: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidSetting {
            key,
            reason: reason.into(),
        }
    }

    pub fn logging(msg: impl Into<String>) -> Self {
        Error::Logging(msg.into())
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config_file("/etc/znp.ini", "unsupported format");
        assert_eq!(err.to_string(), "config file /etc/znp.ini: unsupported format");

        let err = Error::invalid_setting("engine.request_timeout_ms", "must be > 0");
        assert_eq!(err.to_string(), "invalid engine.request_timeout_ms: must be > 0");
    }

    #[test]
    fn test_figment_error_is_config() {
        let err: Error = figment::Error::from("missing field `path`".to_string()).into();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("path")));
    }
}
