use std::any::Any;

use thiserror::Error;

use crate::{ChannelError, ErrorExt, StatusCode};

/// Ошибки хоста модулей: исполнители, конфигурация, жизненный цикл.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("executor '{name}' not found")]
    ExecutorNotFound { name: String },

    #[error("executor '{executor}' does not support timer scheduling")]
    TimerUnsupported { executor: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("module '{module}' failed to initialize: {reason}")]
    Init { module: String, reason: String },

    #[error("module '{module}' failed to start: {reason}")]
    Start { module: String, reason: String },

    #[error("module '{module}' failed to shut down: {reason}")]
    Shutdown { module: String, reason: String },

    #[error("lua script error: {reason}")]
    Script { reason: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl ErrorExt for ModuleError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ExecutorNotFound { .. } => StatusCode::ExecutorNotFound,
            Self::TimerUnsupported { .. } => StatusCode::TimerUnsupported,
            Self::Config { .. } => StatusCode::ConfigInvalid,
            Self::Init { .. } | Self::Script { .. } => StatusCode::ModuleInitFailed,
            Self::Start { .. } => StatusCode::ModuleStartFailed,
            Self::Shutdown { .. } => StatusCode::ShutdownFailed,
            Self::Channel(e) => e.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
