use std::{any::Any, fmt, sync::Arc};

use bytes::Bytes;
use chanrt_error::CodecError;

/// Описание одного типа сообщения в одной кодировке.
///
/// Диспетчеризация знает о типе только через этот трейт: новая кодировка —
/// это новая реализация, а не изменение пути доставки.
pub trait TypeSupport: Send + Sync + 'static {
    fn type_name(&self) -> &str;

    fn encoding(&self) -> &str;

    /// Сериализует сообщение. `msg` должен быть значением того типа, который
    /// описывает реализация, иначе — [`CodecError::TypeMismatch`].
    fn serialize(
        &self,
        msg: &dyn Any,
    ) -> Result<Bytes, CodecError>;

    fn deserialize(
        &self,
        buf: &[u8],
    ) -> Result<Box<dyn Any + Send>, CodecError>;

    /// Структурное представление буфера для внешних рантаймов.
    fn structured(
        &self,
        _buf: &[u8],
    ) -> Result<serde_json::Value, CodecError> {
        Err(CodecError::StructuredUnsupported {
            type_name: self.type_name().to_string(),
            encoding: self.encoding().to_string(),
        })
    }
}

/// Ключ идентичности: два хэндла взаимозаменяемы тогда и только тогда, когда
/// совпадают имя типа и кодировка.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeKey {
    type_name: Arc<str>,
    encoding: Arc<str>,
}

/// Стабильная ссылка на `TypeSupport`.
///
/// `descriptor == None` — «нулевой» дескриптор: такой хэндл можно построить
/// (например, из конфигурации), но нельзя зарегистрировать.
#[derive(Clone)]
pub struct TypeSupportHandle {
    key: TypeKey,
    descriptor: Option<Arc<dyn TypeSupport>>,
}

/// Реестр типов одного эндпоинта. Порядок регистрации сохраняется.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    entries: Vec<TypeSupportHandle>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl TypeKey {
    pub fn new(
        type_name: &str,
        encoding: &str,
    ) -> Self {
        Self {
            type_name: Arc::from(type_name),
            encoding: Arc::from(encoding),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    fn matches(
        &self,
        type_name: &str,
        encoding: &str,
    ) -> bool {
        &*self.type_name == type_name && &*self.encoding == encoding
    }
}

impl TypeSupportHandle {
    pub fn new(descriptor: Arc<dyn TypeSupport>) -> Self {
        Self {
            key: TypeKey::new(descriptor.type_name(), descriptor.encoding()),
            descriptor: Some(descriptor),
        }
    }

    pub fn from_support<T: TypeSupport>(support: T) -> Self {
        Self::new(Arc::new(support))
    }

    /// Хэндл без дескриптора.
    pub fn detached(
        type_name: &str,
        encoding: &str,
    ) -> Self {
        Self {
            key: TypeKey::new(type_name, encoding),
            descriptor: None,
        }
    }

    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    pub fn type_name(&self) -> &str {
        self.key.type_name()
    }

    pub fn encoding(&self) -> &str {
        self.key.encoding()
    }

    pub fn native_descriptor(&self) -> Option<&Arc<dyn TypeSupport>> {
        self.descriptor.as_ref()
    }

    pub fn is_null(&self) -> bool {
        self.descriptor.is_none()
    }

    pub fn is_interchangeable(
        &self,
        other: &TypeSupportHandle,
    ) -> bool {
        self.key == other.key
    }

    /// Дескриптор для путей, где нулевой хэндл уже отсечён регистрацией.
    pub(crate) fn support(&self) -> Result<&Arc<dyn TypeSupport>, CodecError> {
        self.descriptor
            .as_ref()
            .ok_or_else(|| CodecError::Serialize {
                type_name: self.type_name().to_string(),
                encoding: self.encoding().to_string(),
                reason: "null native descriptor".to_string(),
            })
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует хэндл. Повторная регистрация той же пары
    /// `(type_name, encoding)` возвращает `false` и ничего не меняет.
    pub fn register(
        &mut self,
        handle: TypeSupportHandle,
    ) -> bool {
        if self.contains(handle.key()) {
            return false;
        }
        self.entries.push(handle);
        true
    }

    pub fn lookup(
        &self,
        type_name: &str,
        encoding: &str,
    ) -> Option<&TypeSupportHandle> {
        self.entries
            .iter()
            .find(|h| h.key.matches(type_name, encoding))
    }

    /// Первый зарегистрированный хэндл с данным именем типа.
    pub fn lookup_by_name(
        &self,
        type_name: &str,
    ) -> Option<&TypeSupportHandle> {
        self.entries.iter().find(|h| h.type_name() == type_name)
    }

    pub fn contains(
        &self,
        key: &TypeKey,
    ) -> bool {
        self.entries.iter().any(|h| &h.key == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeSupportHandle> {
        self.entries.iter()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl PartialEq for TypeSupportHandle {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.key == other.key
    }
}

impl Eq for TypeSupportHandle {}

impl fmt::Debug for TypeSupportHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TypeSupportHandle")
            .field("type_name", &self.type_name())
            .field("encoding", &self.encoding())
            .field("null", &self.is_null())
            .finish()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}@{}", self.type_name, self.encoding)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|h| h.key.to_string()))
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
