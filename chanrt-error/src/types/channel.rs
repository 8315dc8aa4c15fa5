use std::any::Any;

use thiserror::Error;

use crate::{CodecError, ErrorExt, StatusCode};

/// Ошибки публикации и регистрации на эндпоинтах канала.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("type '{type_name}' is not registered on publisher for topic '{topic}'")]
    TypeNotRegistered { topic: String, type_name: String },

    #[error("type '{type_name}' ({encoding}) is already registered on topic '{topic}'")]
    DuplicateRegistration {
        topic: String,
        type_name: String,
        encoding: String,
    },

    #[error("type support '{type_name}' ({encoding}) has a null native descriptor")]
    NullDescriptor {
        topic: String,
        type_name: String,
        encoding: String,
    },

    #[error("registration is closed for topic '{topic}'")]
    RegistrationClosed { topic: String },

    #[error("context already used, refusing to publish on topic '{topic}'")]
    ContextReused { topic: String },

    #[error("publish on topic '{topic}' requires a publish context, got {actual}")]
    ContextKindMismatch { topic: String, actual: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ErrorExt for ChannelError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::TypeNotRegistered { .. } => StatusCode::TypeNotRegistered,
            Self::DuplicateRegistration { .. } => StatusCode::DuplicateRegistration,
            Self::NullDescriptor { .. } => StatusCode::NullDescriptor,
            Self::RegistrationClosed { .. } => StatusCode::RegistrationClosed,
            Self::ContextReused { .. } => StatusCode::ContextReused,
            Self::ContextKindMismatch { .. } => StatusCode::ContextKindMismatch,
            Self::Codec(e) => e.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "channel".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::TypeNotRegistered { topic, .. }
            | Self::DuplicateRegistration { topic, .. }
            | Self::NullDescriptor { topic, .. }
            | Self::RegistrationClosed { topic }
            | Self::ContextReused { topic }
            | Self::ContextKindMismatch { topic, .. } => tags.push(("topic", topic.clone())),
            Self::Codec(_) => {}
        }

        tags
    }
}
