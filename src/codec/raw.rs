use std::any::Any;

use bytes::Bytes;
use chanrt_error::CodecError;

use crate::channel::TypeSupport;

/// Уже закодированный буфер вместе с именем его кодировки.
///
/// Результат `RawTypeSupport::deserialize`: тождественный кодек не знает
/// схемы, поэтому перекодировать такой буфер в другую кодировку нельзя.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub encoding: String,
    pub bytes: Bytes,
}

/// Тождественный кодек для уже закодированных полезных нагрузок.
///
/// Используется, когда сообщение приходит готовым буфером в кодировке, схему
/// которой канальный слой не знает ("pb", "ros2"). Сериализует `Bytes`,
/// `Vec<u8>`, `&'static [u8]` или [`RawPayload`] своей кодировки;
/// десериализует в [`RawPayload`].
#[derive(Debug, Clone)]
pub struct RawTypeSupport {
    type_name: String,
    encoding: String,
}

impl RawTypeSupport {
    pub fn new(
        type_name: impl Into<String>,
        encoding: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            encoding: encoding.into(),
        }
    }

    fn mismatch(&self) -> CodecError {
        CodecError::TypeMismatch {
            type_name: self.type_name.clone(),
            encoding: self.encoding.clone(),
        }
    }
}

impl TypeSupport for RawTypeSupport {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn encoding(&self) -> &str {
        &self.encoding
    }

    fn serialize(
        &self,
        msg: &dyn Any,
    ) -> Result<Bytes, CodecError> {
        if let Some(payload) = msg.downcast_ref::<RawPayload>() {
            // Чужие байты не переименовываются в свою кодировку.
            if payload.encoding != self.encoding {
                return Err(self.mismatch());
            }
            Ok(payload.bytes.clone())
        } else if let Some(bytes) = msg.downcast_ref::<Bytes>() {
            Ok(bytes.clone())
        } else if let Some(vec) = msg.downcast_ref::<Vec<u8>>() {
            Ok(Bytes::copy_from_slice(vec))
        } else if let Some(slice) = msg.downcast_ref::<&'static [u8]>() {
            Ok(Bytes::from_static(slice))
        } else {
            Err(self.mismatch())
        }
    }

    fn deserialize(
        &self,
        buf: &[u8],
    ) -> Result<Box<dyn Any + Send>, CodecError> {
        Ok(Box::new(RawPayload {
            encoding: self.encoding.clone(),
            bytes: Bytes::copy_from_slice(buf),
        }))
    }
}
