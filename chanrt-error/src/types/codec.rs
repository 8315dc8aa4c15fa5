use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки реализаций `TypeSupport`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("failed to serialize '{type_name}' as {encoding}: {reason}")]
    Serialize {
        type_name: String,
        encoding: String,
        reason: String,
    },

    #[error("failed to deserialize '{type_name}' from {encoding}: {reason}")]
    Deserialize {
        type_name: String,
        encoding: String,
        reason: String,
    },

    /// В `serialize` передано сообщение другого типа.
    #[error("message passed to '{type_name}' ({encoding}) has a different type")]
    TypeMismatch { type_name: String, encoding: String },

    #[error("'{type_name}' ({encoding}) has no structured view")]
    StructuredUnsupported { type_name: String, encoding: String },
}

impl ErrorExt for CodecError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Serialize { .. } => StatusCode::SerializationFailed,
            Self::Deserialize { .. } => StatusCode::DeserializationFailed,
            Self::TypeMismatch { .. } => StatusCode::TypeMismatch,
            Self::StructuredUnsupported { .. } => StatusCode::StructuredViewUnsupported,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_status() {
        let err = CodecError::Deserialize {
            type_name: "Mocap".to_string(),
            encoding: "msgpack".to_string(),
            reason: "eof".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::DeserializationFailed);
        assert!(err.to_string().contains("msgpack"));
    }
}
