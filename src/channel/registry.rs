use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::{
    release::ContractPolicy, subscriber::SubscriberShared, Context, PublisherEndpoint,
    SubscriberEndpoint, TypeKey, TypeSupport, TypeSupportHandle,
};

/// Владелец эндпоинтов, созданных без хэндла модуля.
pub const DEFAULT_OWNER: &str = "default";

/// Фабрика эндпоинтов и связка топиков.
///
/// Эндпоинты создаются один раз на пару (владелец, топик) и кэшируются.
/// Все эндпоинты одного топика разделяют одну связку: публикация уходит
/// каждому эндпоинту подписчика этого топика.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

/// Хэндл канального слоя для одного модуля.
#[derive(Clone)]
pub struct ChannelHandle {
    registry: ChannelRegistry,
    owner: Arc<str>,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    index: Arc<TypeIndex>,
    policy: ContractPolicy,
    sealed: AtomicBool,
}

type EndpointKey = (String, String);

#[derive(Default)]
struct RegistryState {
    bindings: HashMap<String, Arc<TopicBinding>>,
    publishers: HashMap<EndpointKey, PublisherEndpoint>,
    subscribers: HashMap<EndpointKey, SubscriberEndpoint>,
}

/// Слабый индекс всех `TypeSupport`, зарегистрированных через эндпоинты.
/// Сильные ссылки держат только эндпоинты; под одним ключом может жить
/// несколько дескрипторов от разных эндпоинтов.
#[derive(Default)]
pub(crate) struct TypeIndex {
    entries: DashMap<TypeKey, Vec<Weak<dyn TypeSupport>>>,
}

/// Связка топика: список эндпоинтов подписчиков.
///
/// До первой публикации (или `seal`) список меняется под мьютексом; затем
/// замораживается и читается без блокировок.
pub(crate) struct TopicBinding {
    topic: Arc<str>,
    setup: Mutex<BindingSetup>,
    frozen: OnceCell<Vec<Arc<SubscriberShared>>>,
}

#[derive(Default)]
struct BindingSetup {
    subscribers: Vec<Arc<SubscriberShared>>,
    closed: bool,
}

////////////////////////////////////////////////////////////////////////////////
// ChannelRegistry
////////////////////////////////////////////////////////////////////////////////

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_policy(ContractPolicy::default())
    }

    pub fn with_policy(policy: ContractPolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                index: Arc::new(TypeIndex::default()),
                policy,
                sealed: AtomicBool::new(false),
            }),
        }
    }

    pub fn policy(&self) -> ContractPolicy {
        self.inner.policy
    }

    pub fn get_publisher(
        &self,
        topic: &str,
    ) -> PublisherEndpoint {
        self.publisher_for(DEFAULT_OWNER, topic)
    }

    pub fn get_subscriber(
        &self,
        topic: &str,
    ) -> SubscriberEndpoint {
        self.subscriber_for(DEFAULT_OWNER, topic)
    }

    /// Хэндл, создающий эндпоинты от имени модуля `owner`.
    pub fn module_handle(
        &self,
        owner: &str,
    ) -> ChannelHandle {
        ChannelHandle {
            registry: self.clone(),
            owner: Arc::from(owner),
        }
    }

    /// Копирует в `pub_ctx` ключи, которых там нет. Значения издателя
    /// побеждают.
    pub fn merge_subscribe_context_to_publish_context(
        &self,
        sub_ctx: &Context,
        pub_ctx: &mut Context,
    ) {
        pub_ctx.merge_missing_from(sub_ctx);
    }

    /// Ищет `TypeSupport`, зарегистрированный любым живым эндпоинтом.
    pub fn lookup_type(
        &self,
        type_name: &str,
        encoding: &str,
    ) -> Option<TypeSupportHandle> {
        self.inner.index.lookup(&TypeKey::new(type_name, encoding))
    }

    /// Закрывает фазу регистрации всех топиков и эндпоинтов.
    ///
    /// Эндпоинты, созданные после `seal`, сразу закрыты для регистрации.
    pub fn seal(&self) {
        let state = self.inner.state.lock();
        self.inner.sealed.store(true, Ordering::Release);
        for binding in state.bindings.values() {
            binding.freeze();
        }
        for publisher in state.publishers.values() {
            publisher.freeze();
        }
        for subscriber in state.subscribers.values() {
            subscriber.shared().freeze();
        }
        tracing::info!(
            topics = state.bindings.len(),
            publishers = state.publishers.len(),
            subscribers = state.subscribers.len(),
            "channel registry sealed"
        );
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    /// Топики, для которых создан хотя бы один эндпоинт (отсортированы).
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.state.lock().bindings.keys().cloned().collect();
        topics.sort();
        topics
    }

    fn publisher_for(
        &self,
        owner: &str,
        topic: &str,
    ) -> PublisherEndpoint {
        let mut state = self.inner.state.lock();
        let key = (owner.to_string(), topic.to_string());
        if let Some(existing) = state.publishers.get(&key) {
            return existing.clone();
        }

        let sealed = self.is_sealed();
        let binding = self.binding_locked(&mut state, topic);
        let publisher = PublisherEndpoint::new(
            Arc::from(owner),
            binding,
            self.inner.policy,
            self.inner.index.clone(),
            sealed,
        );
        state.publishers.insert(key, publisher.clone());
        tracing::debug!(owner, topic, "publisher endpoint created");
        publisher
    }

    fn subscriber_for(
        &self,
        owner: &str,
        topic: &str,
    ) -> SubscriberEndpoint {
        let mut state = self.inner.state.lock();
        let key = (owner.to_string(), topic.to_string());
        if let Some(existing) = state.subscribers.get(&key) {
            return existing.clone();
        }

        let binding = self.binding_locked(&mut state, topic);
        let attached_closed = self.is_sealed() || binding.is_frozen();
        let subscriber = SubscriberEndpoint::new(
            Arc::from(owner),
            binding.topic().clone(),
            self.inner.policy,
            self.inner.index.clone(),
            attached_closed,
        );
        if !binding.attach(subscriber.shared().clone()) {
            tracing::warn!(
                owner,
                topic,
                "subscriber endpoint created after topic froze; it will not receive messages"
            );
        }
        state.subscribers.insert(key, subscriber.clone());
        tracing::debug!(owner, topic, "subscriber endpoint created");
        subscriber
    }

    fn binding_locked(
        &self,
        state: &mut RegistryState,
        topic: &str,
    ) -> Arc<TopicBinding> {
        state
            .bindings
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicBinding::new(Arc::from(topic))))
            .clone()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("policy", &self.inner.policy)
            .field("sealed", &self.is_sealed())
            .field("topics", &self.topics())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// ChannelHandle
////////////////////////////////////////////////////////////////////////////////

impl ChannelHandle {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn get_publisher(
        &self,
        topic: &str,
    ) -> PublisherEndpoint {
        self.registry.publisher_for(&self.owner, topic)
    }

    pub fn get_subscriber(
        &self,
        topic: &str,
    ) -> SubscriberEndpoint {
        self.registry.subscriber_for(&self.owner, topic)
    }

    pub fn merge_subscribe_context_to_publish_context(
        &self,
        sub_ctx: &Context,
        pub_ctx: &mut Context,
    ) {
        self.registry
            .merge_subscribe_context_to_publish_context(sub_ctx, pub_ctx);
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("owner", &self.owner)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// TypeIndex, TopicBinding
////////////////////////////////////////////////////////////////////////////////

impl TypeIndex {
    pub(crate) fn record(
        &self,
        handle: &TypeSupportHandle,
    ) {
        let Some(descriptor) = handle.native_descriptor() else {
            return;
        };
        let weak = Arc::downgrade(descriptor);
        let mut slot = self.entries.entry(handle.key().clone()).or_default();
        slot.retain(|known| known.strong_count() > 0);
        if !slot.iter().any(|known| Weak::ptr_eq(known, &weak)) {
            slot.push(weak);
        }
    }

    /// Первый ещё живой дескриптор ключа.
    pub(crate) fn lookup(
        &self,
        key: &TypeKey,
    ) -> Option<TypeSupportHandle> {
        let upgraded = self
            .entries
            .get(key)
            .and_then(|slot| slot.iter().find_map(Weak::upgrade));
        match upgraded {
            Some(descriptor) => Some(TypeSupportHandle::new(descriptor)),
            None => {
                self.entries
                    .remove_if(key, |_, slot| slot.iter().all(|w| w.strong_count() == 0));
                None
            }
        }
    }
}

impl TopicBinding {
    fn new(topic: Arc<str>) -> Self {
        Self {
            topic,
            setup: Mutex::new(BindingSetup::default()),
            frozen: OnceCell::new(),
        }
    }

    pub(crate) fn topic(&self) -> &Arc<str> {
        &self.topic
    }

    fn attach(
        &self,
        subscriber: Arc<SubscriberShared>,
    ) -> bool {
        let mut setup = self.setup.lock();
        if setup.closed {
            return false;
        }
        setup.subscribers.push(subscriber);
        true
    }

    fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    fn freeze(&self) {
        let _ = self.subscribers();
    }

    /// Замороженный список подписчиков. Первый вызов закрывает регистрацию
    /// топика и всех его подписчиков.
    pub(crate) fn subscribers(&self) -> &[Arc<SubscriberShared>] {
        self.frozen.get_or_init(|| {
            let mut setup = self.setup.lock();
            setup.closed = true;
            for subscriber in &setup.subscribers {
                subscriber.freeze();
            }
            tracing::debug!(
                topic = %self.topic,
                subscribers = setup.subscribers.len(),
                "topic binding frozen"
            );
            setup.subscribers.clone()
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
