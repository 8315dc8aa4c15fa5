use std::{any::Any, fmt, marker::PhantomData};

use bytes::Bytes;
use chanrt_error::CodecError;
use serde::{de::DeserializeOwned, Serialize};

use super::{BincodeFormat, JsonFormat, MsgPackFormat, WireFormat};
use crate::channel::TypeSupport;

/// `TypeSupport` для serde-типа `M` в формате `F`.
pub struct SerdeTypeSupport<M, F> {
    type_name: String,
    _marker: PhantomData<fn() -> (M, F)>,
}

pub type JsonTypeSupport<M> = SerdeTypeSupport<M, JsonFormat>;
pub type MsgPackTypeSupport<M> = SerdeTypeSupport<M, MsgPackFormat>;
pub type BincodeTypeSupport<M> = SerdeTypeSupport<M, BincodeFormat>;

impl<M, F> SerdeTypeSupport<M, F> {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            _marker: PhantomData,
        }
    }
}

impl<M, F> SerdeTypeSupport<M, F>
where
    F: WireFormat,
{
    fn decode(
        &self,
        buf: &[u8],
    ) -> Result<M, CodecError>
    where
        M: DeserializeOwned,
    {
        F::decode(buf).map_err(|reason| CodecError::Deserialize {
            type_name: self.type_name.clone(),
            encoding: F::ENCODING.to_string(),
            reason,
        })
    }
}

impl<M, F> TypeSupport for SerdeTypeSupport<M, F>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: WireFormat,
{
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn encoding(&self) -> &str {
        F::ENCODING
    }

    fn serialize(
        &self,
        msg: &dyn Any,
    ) -> Result<Bytes, CodecError> {
        let msg = msg
            .downcast_ref::<M>()
            .ok_or_else(|| CodecError::TypeMismatch {
                type_name: self.type_name.clone(),
                encoding: F::ENCODING.to_string(),
            })?;
        F::encode(msg)
            .map(Bytes::from)
            .map_err(|reason| CodecError::Serialize {
                type_name: self.type_name.clone(),
                encoding: F::ENCODING.to_string(),
                reason,
            })
    }

    fn deserialize(
        &self,
        buf: &[u8],
    ) -> Result<Box<dyn Any + Send>, CodecError> {
        let msg: M = self.decode(buf)?;
        Ok(Box::new(msg))
    }

    fn structured(
        &self,
        buf: &[u8],
    ) -> Result<serde_json::Value, CodecError> {
        let msg: M = self.decode(buf)?;
        serde_json::to_value(&msg).map_err(|e| CodecError::Serialize {
            type_name: self.type_name.clone(),
            encoding: "structured".to_string(),
            reason: e.to_string(),
        })
    }
}

impl<M, F: WireFormat> fmt::Debug for SerdeTypeSupport<M, F> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SerdeTypeSupport")
            .field("type_name", &self.type_name)
            .field("encoding", &F::ENCODING)
            .finish()
    }
}
