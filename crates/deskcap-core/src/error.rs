//! Error types shared across deskcap crates.

use thiserror::Error;

/// Errors raised by configuration and runtime-context handling.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// The calling thread's component runtime is in a state we cannot work with.
    #[error("Component runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Rejected configuration value.
    #[error("{0}")]
    InvalidConfig(String),
}

#[cfg(windows)]
impl From<windows::core::Error> for CoreError {
    fn from(err: windows::core::Error) -> Self {
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}
