use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};

/// Роль контекста: публикация или доставка подписчику.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Publish,
    Subscribe,
}

/// Метаданные одного сообщения.
///
/// Хранит упорядоченные пары ключ–значение, тег сериализации и одноразовый
/// флаг `used`. Флаг атомарный: контекст можно передавать по `&Context`,
/// а публикация всё равно «поглотит» его ровно один раз.
///
/// Порядок вставки ключей сохраняется при итерации, но не влияет на слияние.
pub struct Context {
    kind: ContextKind,
    serialization_type: String,
    meta: Vec<(String, String)>,
    used: AtomicBool,
}

/// Форма контекста для передачи по проводу.
///
/// `meta` сериализуется как список пар `[[k, v], ...]`, чтобы порядок ключей
/// не зависел от реализации map на принимающей стороне.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextWire {
    pub kind: ContextKind,
    #[serde(default)]
    pub serialization_type: String,
    #[serde(default)]
    pub meta: Vec<(String, String)>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Context {
    pub fn new(kind: ContextKind) -> Self {
        Self {
            kind,
            serialization_type: String::new(),
            meta: Vec::new(),
            used: AtomicBool::new(false),
        }
    }

    /// Пустой контекст публикации.
    pub fn publish() -> Self {
        Self::new(ContextKind::Publish)
    }

    /// Пустой контекст подписчика.
    pub fn subscribe() -> Self {
        Self::new(ContextKind::Subscribe)
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Был ли контекст уже отправлен или получен.
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    /// Помечает контекст использованным без проверки.
    pub fn set_used(&self) {
        self.used.store(true, Ordering::Release);
    }

    /// Переводит `used` из `false` в `true`.
    ///
    /// Возвращает `false`, если контекст уже был использован. Из двух
    /// конкурирующих публикаций с одним контекстом успешна ровно одна.
    pub(crate) fn try_consume(&self) -> bool {
        !self.used.swap(true, Ordering::AcqRel)
    }

    /// Очищает метаданные, тег сериализации и флаг `used`.
    pub fn reset(&mut self) {
        self.meta.clear();
        self.serialization_type.clear();
        *self.used.get_mut() = false;
    }

    pub fn serialization_type(&self) -> &str {
        &self.serialization_type
    }

    pub fn set_serialization_type(
        &mut self,
        serialization_type: impl Into<String>,
    ) {
        self.serialization_type = serialization_type.into();
    }

    pub fn meta_value(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.meta
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Устанавливает значение ключа.
    ///
    /// Существующий ключ перезаписывается на своём месте, новый добавляется в
    /// конец.
    pub fn set_meta_value(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        let key = key.into();
        let value = value.into();
        match self.meta.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.meta.push((key, value)),
        }
    }

    pub fn contains_meta(
        &self,
        key: &str,
    ) -> bool {
        self.meta.iter().any(|(k, _)| k == key)
    }

    pub fn meta_keys(&self) -> impl Iterator<Item = &str> {
        self.meta.iter().map(|(k, _)| k.as_str())
    }

    pub fn meta(&self) -> impl Iterator<Item = (&str, &str)> {
        self.meta.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn meta_len(&self) -> usize {
        self.meta.len()
    }

    /// Копирует ключи, которых ещё нет в `self`. При совпадении ключа
    /// побеждает значение `self`.
    pub fn merge_missing_from(
        &mut self,
        other: &Context,
    ) {
        for (k, v) in &other.meta {
            if !self.contains_meta(k) {
                self.meta.push((k.clone(), v.clone()));
            }
        }
    }

    /// Контекст, который видит подписчик: те же метаданные, роль `Subscribe`,
    /// тег — кодировка доставленного буфера. Полученный контекст уже
    /// использован.
    pub(crate) fn derive_received(
        &self,
        serialization_type: &str,
    ) -> Context {
        Context {
            kind: ContextKind::Subscribe,
            serialization_type: serialization_type.to_string(),
            meta: self.meta.clone(),
            used: AtomicBool::new(true),
        }
    }

    pub fn to_wire(&self) -> ContextWire {
        ContextWire {
            kind: self.kind,
            serialization_type: self.serialization_type.clone(),
            meta: self.meta.clone(),
        }
    }

    /// Восстанавливает контекст из проводной формы. Флаг `used` сброшен;
    /// повторяющиеся ключи схлопываются, последнее значение побеждает.
    pub fn from_wire(wire: ContextWire) -> Self {
        let mut ctx = Context::new(wire.kind);
        ctx.serialization_type = wire.serialization_type;
        for (k, v) in wire.meta {
            ctx.set_meta_value(k, v);
        }
        ctx
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для Context
////////////////////////////////////////////////////////////////////////////////

impl Default for Context {
    fn default() -> Self {
        Self::publish()
    }
}

impl Clone for Context {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            serialization_type: self.serialization_type.clone(),
            meta: self.meta.clone(),
            used: AtomicBool::new(self.is_used()),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Context")
            .field("kind", &self.kind)
            .field("serialization_type", &self.serialization_type)
            .field("meta", &self.meta)
            .field("used", &self.is_used())
            .finish()
    }
}

impl fmt::Display for ContextKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ContextKind::Publish => f.write_str("publish"),
            ContextKind::Subscribe => f.write_str("subscribe"),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "Context {{ kind: {}, serialization_type: {}, meta: {{",
            self.kind, self.serialization_type
        )?;
        for (i, (k, v)) in self.meta.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        f.write_str("} }")
    }
}

impl From<ContextWire> for Context {
    fn from(wire: ContextWire) -> Self {
        Context::from_wire(wire)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
