use serde::{de::DeserializeOwned, Serialize};

/// Формат сериализации serde-типов.
///
/// Ошибки возвращаются строкой: `SerdeTypeSupport` сам оборачивает их в
/// `CodecError` с именем типа и кодировкой.
pub trait WireFormat: Send + Sync + 'static {
    /// Тег кодировки, попадающий в `Context::serialization_type`.
    const ENCODING: &'static str;

    fn encode<M: Serialize>(msg: &M) -> Result<Vec<u8>, String>;

    fn decode<M: DeserializeOwned>(buf: &[u8]) -> Result<M, String>;
}

/// JSON (`serde_json`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

/// MessagePack с именованными полями (`rmp-serde`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackFormat;

/// Компактный бинарный формат (`bincode`).
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeFormat;

impl WireFormat for JsonFormat {
    const ENCODING: &'static str = "json";

    fn encode<M: Serialize>(msg: &M) -> Result<Vec<u8>, String> {
        serde_json::to_vec(msg).map_err(|e| e.to_string())
    }

    fn decode<M: DeserializeOwned>(buf: &[u8]) -> Result<M, String> {
        serde_json::from_slice(buf).map_err(|e| e.to_string())
    }
}

impl WireFormat for MsgPackFormat {
    const ENCODING: &'static str = "msgpack";

    fn encode<M: Serialize>(msg: &M) -> Result<Vec<u8>, String> {
        rmp_serde::to_vec_named(msg).map_err(|e| e.to_string())
    }

    fn decode<M: DeserializeOwned>(buf: &[u8]) -> Result<M, String> {
        rmp_serde::from_slice(buf).map_err(|e| e.to_string())
    }
}

impl WireFormat for BincodeFormat {
    const ENCODING: &'static str = "bincode";

    fn encode<M: Serialize>(msg: &M) -> Result<Vec<u8>, String> {
        bincode::serialize(msg).map_err(|e| e.to_string())
    }

    fn decode<M: DeserializeOwned>(buf: &[u8]) -> Result<M, String> {
        bincode::deserialize(buf).map_err(|e| e.to_string())
    }
}
