use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use chanrt_error::ChannelError;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::{
    dispatch::{EncodingCache, Envelope},
    registry::{TopicBinding, TypeIndex},
    release::{ContractPolicy, SettleSignal},
    Context, ContextKind, TypeRegistry, TypeSupportHandle,
};

/// Эндпоинт издателя на одном топике.
///
/// Клон — ещё один хэндл на тот же эндпоинт. Публикация синхронна: вызов
/// возвращается после попытки доставки каждому callback'у топика.
#[derive(Clone)]
pub struct PublisherEndpoint {
    inner: Arc<PublisherShared>,
}

struct PublisherShared {
    topic: Arc<str>,
    owner: Arc<str>,
    policy: ContractPolicy,
    index: Arc<TypeIndex>,
    binding: Arc<TopicBinding>,
    setup: Mutex<PublisherSetup>,
    frozen: OnceCell<TypeRegistry>,
    published: AtomicU64,
}

#[derive(Default)]
struct PublisherSetup {
    types: TypeRegistry,
    closed: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl PublisherEndpoint {
    pub(crate) fn new(
        owner: Arc<str>,
        binding: Arc<TopicBinding>,
        policy: ContractPolicy,
        index: Arc<TypeIndex>,
        closed: bool,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherShared {
                topic: binding.topic().clone(),
                owner,
                policy,
                index,
                binding,
                setup: Mutex::new(PublisherSetup {
                    closed,
                    ..Default::default()
                }),
                frozen: OnceCell::new(),
                published: AtomicU64::new(0),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// Регистрирует тип для публикации.
    ///
    /// `false` — нулевой дескриптор, повторная регистрация той же пары
    /// `(type_name, encoding)` или закрытая фаза регистрации.
    pub fn register_publish_type(
        &self,
        handle: TypeSupportHandle,
    ) -> bool {
        let shared = &self.inner;
        if handle.is_null() {
            tracing::warn!(
                topic = %shared.topic,
                type_name = handle.type_name(),
                encoding = handle.encoding(),
                "publish type rejected: null native descriptor"
            );
            return false;
        }

        let mut setup = shared.setup.lock();
        if setup.closed {
            drop(setup);
            tracing::warn!(
                topic = %shared.topic,
                type_name = handle.type_name(),
                "publish type rejected: registration is closed"
            );
            debug_assert!(
                shared.policy != ContractPolicy::Strict,
                "register_publish_type on topic '{}' after the registration phase was closed",
                shared.topic
            );
            return false;
        }

        if !setup.types.register(handle.clone()) {
            tracing::info!(
                topic = %shared.topic,
                type_name = handle.type_name(),
                encoding = handle.encoding(),
                "publish type already registered"
            );
            return false;
        }
        shared.index.record(&handle);

        tracing::debug!(
            topic = %shared.topic,
            owner = %shared.owner,
            type_name = handle.type_name(),
            encoding = handle.encoding(),
            "publish type registered"
        );
        true
    }

    /// Публикует готовый буфер.
    ///
    /// # Panics
    ///
    /// Если тип `type_name` не зарегистрирован на этом эндпоинте. Ни один
    /// callback при этом не вызывается.
    pub fn publish(
        &self,
        type_name: &str,
        ctx: &Context,
        buffer: impl Into<Bytes>,
    ) -> Result<(), ChannelError> {
        let handle = self.resolve_or_panic(type_name, ctx);
        self.dispatch(&handle, ctx, buffer.into(), None)
    }

    /// Как [`publish`](Self::publish), но незарегистрированный тип — ошибка
    /// [`ChannelError::TypeNotRegistered`], а не паника.
    pub fn try_publish(
        &self,
        type_name: &str,
        ctx: &Context,
        buffer: impl Into<Bytes>,
    ) -> Result<(), ChannelError> {
        let handle = self.resolve_or_err(type_name, ctx)?;
        self.dispatch(&handle, ctx, buffer.into(), None)
    }

    /// Публикация с сигналом освобождения: `on_settled` вызывается, когда
    /// буфер освобождён всеми получателями, включая отложенные продолжения.
    /// Точка подключения транспорта, которому нужно знать, когда буфер можно
    /// переиспользовать.
    pub fn publish_with_release_hook<H>(
        &self,
        type_name: &str,
        ctx: &Context,
        buffer: impl Into<Bytes>,
        on_settled: H,
    ) -> Result<(), ChannelError>
    where
        H: FnOnce() + Send + 'static,
    {
        let handle = self.resolve_or_err(type_name, ctx)?;
        self.dispatch(&handle, ctx, buffer.into(), Some(Box::new(on_settled)))
    }

    /// Сериализует сообщение через зарегистрированный `TypeSupport` и
    /// публикует его.
    ///
    /// # Panics
    ///
    /// Если тип `type_name` не зарегистрирован.
    pub fn publish_message<M: Any>(
        &self,
        type_name: &str,
        ctx: &Context,
        msg: &M,
    ) -> Result<(), ChannelError> {
        let handle = self.resolve_or_panic(type_name, ctx);
        let buffer = handle.support()?.serialize(msg)?;
        self.dispatch(&handle, ctx, buffer, None)
    }

    /// Копирует в `pub_ctx` ключи, которые есть только в `sub_ctx`.
    pub fn merge_subscribe_context(
        &self,
        sub_ctx: &Context,
        pub_ctx: &mut Context,
    ) {
        pub_ctx.merge_missing_from(sub_ctx);
    }

    pub fn is_type_registered(
        &self,
        type_name: &str,
        encoding: &str,
    ) -> bool {
        match self.inner.frozen.get() {
            Some(types) => types.lookup(type_name, encoding).is_some(),
            None => self
                .inner
                .setup
                .lock()
                .types
                .lookup(type_name, encoding)
                .is_some(),
        }
    }

    /// Количество успешных публикаций.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get().is_some()
    }

    pub(crate) fn freeze(&self) {
        let _ = self.types();
    }

    fn types(&self) -> &TypeRegistry {
        self.inner.frozen.get_or_init(|| {
            let mut setup = self.inner.setup.lock();
            setup.closed = true;
            setup.types.clone()
        })
    }

    /// Тег контекста выбирает кодировку; без тега берётся первая
    /// зарегистрированная для имени типа.
    fn resolve(
        &self,
        type_name: &str,
        ctx: &Context,
    ) -> Option<TypeSupportHandle> {
        let types = self.types();
        let tag = ctx.serialization_type();
        let found = if tag.is_empty() {
            types.lookup_by_name(type_name)
        } else {
            types.lookup(type_name, tag)
        };
        found.cloned()
    }

    fn resolve_or_err(
        &self,
        type_name: &str,
        ctx: &Context,
    ) -> Result<TypeSupportHandle, ChannelError> {
        self.resolve(type_name, ctx).ok_or_else(|| {
            tracing::error!(
                topic = %self.inner.topic,
                type_name,
                serialization_type = ctx.serialization_type(),
                "publish of unregistered type"
            );
            ChannelError::TypeNotRegistered {
                topic: self.inner.topic.to_string(),
                type_name: type_name.to_string(),
            }
        })
    }

    fn resolve_or_panic(
        &self,
        type_name: &str,
        ctx: &Context,
    ) -> TypeSupportHandle {
        match self.resolve_or_err(type_name, ctx) {
            Ok(handle) => handle,
            Err(err) => panic!("{err}"),
        }
    }

    fn dispatch(
        &self,
        handle: &TypeSupportHandle,
        ctx: &Context,
        buffer: Bytes,
        on_settled: Option<Box<dyn FnOnce() + Send + 'static>>,
    ) -> Result<(), ChannelError> {
        let shared = &self.inner;
        if ctx.kind() != ContextKind::Publish {
            return Err(ChannelError::ContextKindMismatch {
                topic: shared.topic.to_string(),
                actual: ctx.kind().to_string(),
            });
        }
        if !ctx.try_consume() {
            tracing::error!(topic = %shared.topic, type_name = handle.type_name(), "context reused");
            return Err(ChannelError::ContextReused {
                topic: shared.topic.to_string(),
            });
        }

        let envelope = Envelope {
            origin: handle,
            context: ctx,
            settle: SettleSignal::new(on_settled),
        };
        let mut cache = EncodingCache::new(handle, buffer);
        let subscribers = shared.binding.subscribers();
        for subscriber in subscribers {
            subscriber.deliver(&envelope, &mut cache);
        }

        shared.published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            topic = %shared.topic,
            type_name = handle.type_name(),
            encoding = handle.encoding(),
            subscribers = subscribers.len(),
            "published"
        );
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for PublisherEndpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("PublisherEndpoint")
            .field("topic", &self.topic())
            .field("owner", &self.owner())
            .field("frozen", &self.is_frozen())
            .field("published", &self.published_count())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
