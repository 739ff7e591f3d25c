//! Application error types.

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::render::RenderChannelError;

/// Errors that can occur during application lifecycle.
#[derive(Debug)]
pub enum AppError {
    /// Invalid or unreadable configuration.
    Config(ConfigError),

    /// Failed to bind the render control socket.
    ControlSocket(RenderChannelError),

    /// Failed to bind the HTTP listener.
    HttpBind(io::Error),

    /// The HTTP server stopped with an error.
    Http(io::Error),

    /// Failed to create the Tokio runtime.
    RuntimeCreation(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(e) => {
                write!(f, "Configuration error: {}", e)
            }
            AppError::ControlSocket(e) => {
                write!(f, "Failed to bind render control socket: {}", e)
            }
            AppError::HttpBind(e) => {
                write!(f, "Failed to bind HTTP listener: {}", e)
            }
            AppError::Http(e) => {
                write!(f, "HTTP server error: {}", e)
            }
            AppError::RuntimeCreation(msg) => {
                write!(f, "Failed to create Tokio runtime: {}", msg)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(e) => Some(e),
            AppError::ControlSocket(e) => Some(e),
            AppError::HttpBind(e) => Some(e),
            AppError::Http(e) => Some(e),
            AppError::RuntimeCreation(_) => None,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Config(e)
    }
}

impl From<RenderChannelError> for AppError {
    fn from(e: RenderChannelError) -> Self {
        AppError::ControlSocket(e)
    }
}
