use std::any::Any;

use thiserror::Error;

use crate::{ChannelError, CodecError, ErrorExt, StatusCode};

/// Ошибка пользовательского callback'а подписчика.
///
/// Перехватывается на границе диспетчеризации: логируется и учитывается в
/// статистике подписчика, но никогда не возвращается издателю.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("callback failed: {reason}")]
    Failed { reason: String },

    #[error("callback panicked: {message}")]
    Panicked { message: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl CallbackError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Ошибки адаптера границы рантаймов.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundaryError {
    /// Поток уже удерживает исключительную возможность исполнения этого
    /// рантайма: доставка не выполняется.
    #[error("reentrant delivery into runtime '{runtime}' rejected")]
    Reentrant { runtime: String },

    #[error("failed to build foreign representation: {reason}")]
    Representation { reason: String },

    #[error("foreign callback raised: {reason}")]
    Foreign { reason: String },
}

impl ErrorExt for CallbackError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Failed { .. } => StatusCode::CallbackFailed,
            Self::Panicked { .. } => StatusCode::CallbackPanicked,
            Self::Codec(e) => e.status_code(),
            Self::Boundary(e) => e.status_code(),
            Self::Channel(e) => e.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for BoundaryError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Reentrant { .. } => StatusCode::ReentrantDelivery,
            Self::Representation { .. } => StatusCode::RepresentationFailed,
            Self::Foreign { .. } => StatusCode::ForeignRuntimeError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "boundary".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::Reentrant { runtime } = self {
            tags.push(("runtime", runtime.clone()));
        }
        tags
    }
}
