//! Сообщения демонстрационного хоста и каталог их описаний типов.

use serde::{Deserialize, Serialize};

use crate::{
    channel::TypeSupportHandle,
    codec::{BincodeTypeSupport, JsonTypeSupport, MsgPackTypeSupport, RawTypeSupport},
};

/// Поза одного твёрдого тела: перенос и кватернион.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
}

/// Кадр системы захвата движения.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MocapData {
    pub transforms: Vec<Transform>,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            tx: 0.0,
            ty: 0.0,
            tz: 0.0,
            qw: 1.0,
            qx: 0.0,
            qy: 0.0,
            qz: 0.0,
        }
    }
}

impl MocapData {
    pub const TYPE_NAME: &'static str = "chanrt.protocols.MocapData";
}

/// Описание типа по имени и кодировке из встроенного набора.
///
/// Известные serde-кодировки дают типизированный кодек для [`MocapData`];
/// любая другая кодировка — тождественный кодек над готовым буфером.
pub fn builtin_type_support(
    type_name: &str,
    encoding: &str,
) -> TypeSupportHandle {
    if type_name == MocapData::TYPE_NAME {
        match encoding {
            "json" => return TypeSupportHandle::from_support(JsonTypeSupport::<MocapData>::new(type_name)),
            "msgpack" => {
                return TypeSupportHandle::from_support(MsgPackTypeSupport::<MocapData>::new(type_name))
            }
            "bincode" => {
                return TypeSupportHandle::from_support(BincodeTypeSupport::<MocapData>::new(type_name))
            }
            _ => {}
        }
    }
    TypeSupportHandle::from_support(RawTypeSupport::new(type_name, encoding))
}
