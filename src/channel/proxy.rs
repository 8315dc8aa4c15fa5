use std::{any::Any, marker::PhantomData, sync::Arc};

use chanrt_error::{CallbackError, ChannelError, CodecError};

use super::{Context, PublisherEndpoint, SubscriberEndpoint, TypeSupport, TypeSupportHandle};

/// Типизированная обёртка издателя для сообщений `M`.
pub struct PublisherProxy<M> {
    endpoint: PublisherEndpoint,
    type_name: Arc<str>,
    _marker: PhantomData<fn(&M)>,
}

/// Типизированная обёртка подписчика для сообщений `M`.
pub struct SubscriberProxy<M> {
    endpoint: SubscriberEndpoint,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Any> PublisherProxy<M> {
    /// Обёртка над уже зарегистрированным типом.
    pub fn new(
        endpoint: PublisherEndpoint,
        type_name: &str,
    ) -> Self {
        Self {
            endpoint,
            type_name: Arc::from(type_name),
            _marker: PhantomData,
        }
    }

    /// Регистрирует `support` на эндпоинте и возвращает обёртку.
    pub fn register<T: TypeSupport>(
        endpoint: PublisherEndpoint,
        support: T,
    ) -> Result<Self, ChannelError> {
        let handle = TypeSupportHandle::from_support(support);
        if endpoint.is_frozen() {
            return Err(ChannelError::RegistrationClosed {
                topic: endpoint.topic().to_string(),
            });
        }
        if !endpoint.register_publish_type(handle.clone()) {
            return Err(ChannelError::DuplicateRegistration {
                topic: endpoint.topic().to_string(),
                type_name: handle.type_name().to_string(),
                encoding: handle.encoding().to_string(),
            });
        }
        Ok(Self::new(endpoint, handle.type_name()))
    }

    pub fn endpoint(&self) -> &PublisherEndpoint {
        &self.endpoint
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Публикует с новым пустым контекстом.
    pub fn publish(
        &self,
        msg: &M,
    ) -> Result<(), ChannelError> {
        self.publish_with_context(&Context::publish(), msg)
    }

    pub fn publish_with_context(
        &self,
        ctx: &Context,
        msg: &M,
    ) -> Result<(), ChannelError> {
        self.endpoint.publish_message(&self.type_name, ctx, msg)
    }
}

impl<M: Any + Send> SubscriberProxy<M> {
    pub fn new(endpoint: SubscriberEndpoint) -> Self {
        Self {
            endpoint,
            _marker: PhantomData,
        }
    }

    pub fn endpoint(&self) -> &SubscriberEndpoint {
        &self.endpoint
    }

    /// Подписывает callback, получающий уже декодированное сообщение.
    ///
    /// Буфер освобождается сразу после декодирования, до вызова `callback`.
    pub fn subscribe<T, F>(
        &self,
        support: T,
        callback: F,
    ) -> bool
    where
        T: TypeSupport,
        F: Fn(&Context, M) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let support: Arc<dyn TypeSupport> = Arc::new(support);
        let handle = TypeSupportHandle::new(support.clone());

        self.endpoint.subscribe(handle, move |ctx, buffer, token| {
            let decoded = support.deserialize(buffer);
            token.release();

            let msg = decoded?
                .downcast::<M>()
                .map_err(|_| CodecError::TypeMismatch {
                    type_name: support.type_name().to_string(),
                    encoding: support.encoding().to_string(),
                })?;
            callback(ctx, *msg)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        channel::{ChannelRegistry, ContractPolicy},
        codec::JsonTypeSupport,
        protocols::{MocapData, Transform},
    };

    #[test]
    fn test_typed_roundtrip_through_channel() {
        let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        let subscriber = SubscriberProxy::<MocapData>::new(registry.get_subscriber("mocap"));
        assert!(subscriber.subscribe(
            JsonTypeSupport::<MocapData>::new(MocapData::TYPE_NAME),
            move |ctx, msg| {
                assert_eq!(ctx.serialization_type(), "json");
                sink.lock().unwrap().push(msg);
                Ok(())
            }
        ));

        let publisher = PublisherProxy::<MocapData>::register(
            registry.get_publisher("mocap"),
            JsonTypeSupport::<MocapData>::new(MocapData::TYPE_NAME),
        )
        .unwrap();

        let msg = MocapData {
            transforms: vec![Transform::identity()],
        };
        publisher.publish(&msg).unwrap();

        assert_eq!(received.lock().unwrap().as_slice(), &[msg]);
        let stats = subscriber.endpoint().stats();
        assert_eq!(stats.deliveries, 1);
        assert_eq!(stats.releases, 1);
    }

    #[test]
    fn test_register_twice_is_error() {
        let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
        let endpoint = registry.get_publisher("mocap");
        PublisherProxy::<MocapData>::register(
            endpoint.clone(),
            JsonTypeSupport::<MocapData>::new(MocapData::TYPE_NAME),
        )
        .unwrap();

        let err = PublisherProxy::<MocapData>::register(
            endpoint,
            JsonTypeSupport::<MocapData>::new(MocapData::TYPE_NAME),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ChannelError::DuplicateRegistration { .. }));
    }
}
