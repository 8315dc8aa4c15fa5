use std::{any::Any, sync::Arc};

use bytes::Bytes;
use chanrt_error::CodecError;

use super::{release::SettleSignal, Context, TypeKey, TypeSupportHandle};

/// Сообщение в пути: живёт ровно один вызов `publish`.
pub(crate) struct Envelope<'a> {
    pub(crate) origin: &'a TypeSupportHandle,
    pub(crate) context: &'a Context,
    pub(crate) settle: Arc<SettleSignal>,
}

/// Кэш сериализованных форм одной публикации.
///
/// Буфер издателя отдаётся как есть всем подписчикам той же кодировки.
/// Для другой кодировки сообщение один раз декодируется `TypeSupport`
/// издателя и один раз кодируется `TypeSupport` подписчика; результат
/// (включая ошибку) переиспользуется остальными подписками.
pub(crate) struct EncodingCache<'a> {
    origin: &'a TypeSupportHandle,
    buffer: Bytes,
    decoded: Option<Result<Box<dyn Any + Send>, CodecError>>,
    converted: Vec<(TypeKey, Result<Bytes, CodecError>)>,
}

impl<'a> EncodingCache<'a> {
    pub(crate) fn new(
        origin: &'a TypeSupportHandle,
        buffer: Bytes,
    ) -> Self {
        Self {
            origin,
            buffer,
            decoded: None,
            converted: Vec::new(),
        }
    }

    pub(crate) fn buffer_for(
        &mut self,
        target: &TypeSupportHandle,
    ) -> Result<Bytes, CodecError> {
        if target.encoding() == self.origin.encoding() {
            return Ok(self.buffer.clone());
        }
        if let Some((_, cached)) = self.converted.iter().find(|(k, _)| k == target.key()) {
            return cached.clone();
        }

        let result = self.convert(target);
        if let Err(err) = &result {
            tracing::warn!(
                from = self.origin.encoding(),
                to = target.encoding(),
                type_name = target.type_name(),
                "encoding bridge failed: {err}"
            );
        }
        self.converted.push((target.key().clone(), result.clone()));
        result
    }

    /// Число выполненных перекодирований (для тестов и трассировки).
    pub(crate) fn conversions(&self) -> usize {
        self.converted.len()
    }

    fn convert(
        &mut self,
        target: &TypeSupportHandle,
    ) -> Result<Bytes, CodecError> {
        let origin = self.origin;
        let source = origin.support()?;
        let decoded = self
            .decoded
            .get_or_insert_with(|| source.deserialize(&self.buffer));

        match decoded {
            Ok(msg) => target.support()?.serialize(&**msg),
            Err(err) => Err(err.clone()),
        }
    }
}

/// Текст паники из payload `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::codec::{JsonTypeSupport, MsgPackTypeSupport, RawTypeSupport};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn test_same_encoding_is_passthrough() {
        let origin = TypeSupportHandle::from_support(RawTypeSupport::new("Mocap", "pb"));
        let buf = Bytes::from_static(b"0123456789");
        let mut cache = EncodingCache::new(&origin, buf.clone());

        let out = cache.buffer_for(&origin).unwrap();
        assert_eq!(out.as_ptr(), buf.as_ptr());
        assert_eq!(cache.conversions(), 0);
    }

    /// Тест проверяет, что перекодирование выполняется один раз на кодировку.
    #[test]
    fn test_bridge_converts_once() {
        let origin = TypeSupportHandle::from_support(JsonTypeSupport::<Ping>::new("Ping"));
        let target = TypeSupportHandle::from_support(MsgPackTypeSupport::<Ping>::new("Ping"));
        let json = serde_json::to_vec(&Ping { seq: 3 }).unwrap();
        let mut cache = EncodingCache::new(&origin, Bytes::from(json));

        let first = cache.buffer_for(&target).unwrap();
        let second = cache.buffer_for(&target).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.conversions(), 1);

        let decoded: Ping = rmp_serde::from_slice(&first).unwrap();
        assert_eq!(decoded, Ping { seq: 3 });
    }

    #[test]
    fn test_bridge_failure_is_cached() {
        let origin = TypeSupportHandle::from_support(JsonTypeSupport::<Ping>::new("Ping"));
        let target = TypeSupportHandle::from_support(MsgPackTypeSupport::<Ping>::new("Ping"));
        let mut cache = EncodingCache::new(&origin, Bytes::from_static(b"not json"));

        assert!(matches!(
            cache.buffer_for(&target),
            Err(CodecError::Deserialize { .. })
        ));
        assert!(cache.buffer_for(&target).is_err());
        assert_eq!(cache.conversions(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom 1");
    }
}
