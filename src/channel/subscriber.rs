use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{atomic::Ordering, Arc},
};

use bytes::Bytes;
use chanrt_error::{CallbackError, ErrorExt};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::{
    dispatch::{panic_message, EncodingCache, Envelope},
    registry::TypeIndex,
    release::{ContractPolicy, DeliveryLedger, DeliveryStats, ReleaseSlot, SlotOutcome},
    Context, ReleaseToken, TypeRegistry, TypeSupportHandle,
};

/// Callback подписчика.
///
/// Получает контекст, буфер и токен освобождения. Токен нужно освободить до
/// возврата или передать в продолжение, которое освободит его позже.
pub trait SubscriberCallback: Send + Sync + 'static {
    fn on_message(
        &self,
        ctx: &Context,
        buffer: &Bytes,
        release: ReleaseToken,
    ) -> Result<(), CallbackError>;
}

impl<F> SubscriberCallback for F
where
    F: Fn(&Context, &Bytes, ReleaseToken) -> Result<(), CallbackError> + Send + Sync + 'static,
{
    fn on_message(
        &self,
        ctx: &Context,
        buffer: &Bytes,
        release: ReleaseToken,
    ) -> Result<(), CallbackError> {
        self(ctx, buffer, release)
    }
}

/// Эндпоинт подписчика на одном топике.
///
/// Клон — ещё один хэндл на тот же эндпоинт.
#[derive(Clone)]
pub struct SubscriberEndpoint {
    inner: Arc<SubscriberShared>,
}

pub(crate) struct SubscriberShared {
    topic: Arc<str>,
    owner: Arc<str>,
    policy: ContractPolicy,
    index: Arc<TypeIndex>,
    ledger: Arc<DeliveryLedger>,
    setup: Mutex<SubscriberSetup>,
    frozen: OnceCell<SubscriberSnapshot>,
}

#[derive(Default)]
struct SubscriberSetup {
    types: TypeRegistry,
    bindings: Vec<Binding>,
    closed: bool,
}

#[derive(Clone)]
struct Binding {
    handle: TypeSupportHandle,
    callback: Arc<dyn SubscriberCallback>,
}

/// Замороженное состояние: читается на горячем пути без блокировок.
struct SubscriberSnapshot {
    types: TypeRegistry,
    by_type: HashMap<String, Vec<Binding>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriberEndpoint {
    pub(crate) fn new(
        owner: Arc<str>,
        topic: Arc<str>,
        policy: ContractPolicy,
        index: Arc<TypeIndex>,
        closed: bool,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriberShared {
                topic,
                owner,
                policy,
                index,
                ledger: Arc::new(DeliveryLedger::default()),
                setup: Mutex::new(SubscriberSetup {
                    closed,
                    ..Default::default()
                }),
                frozen: OnceCell::new(),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SubscriberShared> {
        &self.inner
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// Подписывает callback на тип `handle`.
    ///
    /// Возвращает `false` для нулевого дескриптора и после заморозки топика.
    /// Несколько callback'ов одного типа вызываются в порядке подписки.
    pub fn subscribe<F>(
        &self,
        handle: TypeSupportHandle,
        callback: F,
    ) -> bool
    where
        F: Fn(&Context, &Bytes, ReleaseToken) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.subscribe_with(handle, Arc::new(callback))
    }

    /// То же, что [`subscribe`](Self::subscribe), для готового объекта
    /// callback'а (например, адаптера границы рантаймов).
    pub fn subscribe_with(
        &self,
        handle: TypeSupportHandle,
        callback: Arc<dyn SubscriberCallback>,
    ) -> bool {
        let shared = &self.inner;
        if handle.is_null() {
            tracing::warn!(
                topic = %shared.topic,
                type_name = handle.type_name(),
                encoding = handle.encoding(),
                "subscribe rejected: null native descriptor"
            );
            return false;
        }

        let mut setup = shared.setup.lock();
        if setup.closed {
            drop(setup);
            shared.reject_closed(&handle);
            return false;
        }

        // Тип может иметь несколько callback'ов, регистрация типа общая.
        setup.types.register(handle.clone());
        shared.index.record(&handle);
        setup.bindings.push(Binding {
            handle: handle.clone(),
            callback,
        });

        tracing::debug!(
            topic = %shared.topic,
            owner = %shared.owner,
            type_name = handle.type_name(),
            encoding = handle.encoding(),
            callbacks = setup.bindings.len(),
            "subscriber callback registered"
        );
        true
    }

    pub fn is_type_registered(
        &self,
        type_name: &str,
        encoding: &str,
    ) -> bool {
        match self.inner.frozen.get() {
            Some(snapshot) => snapshot.types.lookup(type_name, encoding).is_some(),
            None => self
                .inner
                .setup
                .lock()
                .types
                .lookup(type_name, encoding)
                .is_some(),
        }
    }

    pub fn callback_count(&self) -> usize {
        match self.inner.frozen.get() {
            Some(snapshot) => snapshot.by_type.values().map(Vec::len).sum(),
            None => self.inner.setup.lock().bindings.len(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get().is_some()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.inner.ledger.snapshot()
    }
}

impl SubscriberShared {
    /// Закрывает регистрацию и строит снимок.
    pub(crate) fn freeze(&self) {
        let _ = self.snapshot();
    }

    fn snapshot(&self) -> &SubscriberSnapshot {
        self.frozen.get_or_init(|| {
            let mut setup = self.setup.lock();
            setup.closed = true;

            let mut by_type: HashMap<String, Vec<Binding>> = HashMap::new();
            for binding in &setup.bindings {
                by_type
                    .entry(binding.handle.type_name().to_string())
                    .or_default()
                    .push(binding.clone());
            }
            tracing::trace!(topic = %self.topic, owner = %self.owner, "subscriber frozen");

            SubscriberSnapshot {
                types: setup.types.clone(),
                by_type,
            }
        })
    }

    fn reject_closed(
        &self,
        handle: &TypeSupportHandle,
    ) {
        tracing::warn!(
            topic = %self.topic,
            type_name = handle.type_name(),
            "subscribe rejected: registration is closed"
        );
        debug_assert!(
            self.policy != ContractPolicy::Strict,
            "subscribe on topic '{}' after the registration phase was closed",
            self.topic
        );
    }

    /// Доставляет сообщение всем callback'ам его типа в порядке подписки.
    pub(crate) fn deliver(
        &self,
        envelope: &Envelope<'_>,
        cache: &mut EncodingCache<'_>,
    ) {
        let snapshot = self.snapshot();
        let Some(bindings) = snapshot.by_type.get(envelope.origin.type_name()) else {
            return;
        };
        for binding in bindings {
            self.deliver_one(binding, envelope, cache);
        }
    }

    fn deliver_one(
        &self,
        binding: &Binding,
        envelope: &Envelope<'_>,
        cache: &mut EncodingCache<'_>,
    ) {
        let ledger = &self.ledger;
        let type_name = binding.handle.type_name();

        let buffer = match cache.buffer_for(&binding.handle) {
            Ok(buffer) => buffer,
            Err(err) => {
                ledger.callback_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    topic = %self.topic,
                    owner = %self.owner,
                    type_name,
                    encoding = binding.handle.encoding(),
                    "delivery skipped: {err}"
                );
                return;
            }
        };

        let ctx = envelope.context.derive_received(binding.handle.encoding());
        let slot = ReleaseSlot::new();
        let token = ReleaseToken::new(
            slot.clone(),
            buffer.clone(),
            ledger.clone(),
            envelope.settle.clone(),
            self.topic.clone(),
        );
        ledger.deliveries.fetch_add(1, Ordering::AcqRel);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            binding.callback.on_message(&ctx, &buffer, token)
        }));

        let failed = match outcome {
            Ok(Ok(())) => false,
            Ok(Err(err)) => {
                ledger.callback_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    topic = %self.topic,
                    owner = %self.owner,
                    type_name,
                    code = %err.status_code(),
                    "subscriber callback failed: {err}"
                );
                true
            }
            Err(payload) => {
                ledger.callback_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    topic = %self.topic,
                    owner = %self.owner,
                    type_name,
                    "subscriber callback panicked: {}",
                    panic_message(&*payload)
                );
                true
            }
        };

        match slot.close_delivery() {
            SlotOutcome::Released => {}
            SlotOutcome::Deferred => {
                ledger.deferred.fetch_add(1, Ordering::Relaxed);
            }
            // На пути ошибки удаление токена и есть гарантированное
            // освобождение.
            SlotOutcome::DroppedUnreleased if failed => {}
            SlotOutcome::DroppedUnreleased => self.policy.violation(
                ledger,
                &self.topic,
                type_name,
                "callback returned without releasing its token",
            ),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for SubscriberEndpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscriberEndpoint")
            .field("topic", &self.topic())
            .field("owner", &self.owner())
            .field("callbacks", &self.callback_count())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
