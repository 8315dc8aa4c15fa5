//! Реализации `TypeSupport`: serde-форматы и тождественный кодек.

mod format;
mod raw;
mod serde_support;

pub use format::{BincodeFormat, JsonFormat, MsgPackFormat, WireFormat};
pub use raw::{RawPayload, RawTypeSupport};
pub use serde_support::{BincodeTypeSupport, JsonTypeSupport, MsgPackTypeSupport, SerdeTypeSupport};
