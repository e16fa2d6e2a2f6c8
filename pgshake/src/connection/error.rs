use std::fmt;

use super::ParseError;

/// Configuration does not allow the connection to proceed.
pub enum ConfigError {
    /// Error parsing url.
    Parse(ParseError),
    /// Backend asks for a password, but none is configured.
    PasswordRequired,
    /// Ssl is required, but the backend does not support it.
    SslNotSupported,
}

impl std::error::Error for ConfigError { }

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "Config error: {e}"),
            ConfigError::PasswordRequired => f.write_str("Password requested, none provided"),
            ConfigError::SslNotSupported => f.write_str("Ssl required, but the server does not support it"),
        }
    }
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
