use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chanrt_error::{ChanResult, ModuleError, StackError};

use super::{Module, ModuleCore};
use crate::{
    channel::{DeliveryStats, SubscriberEndpoint},
    protocols::{builtin_type_support, MocapData},
};

/// Подписчик `MocapData`: пишет в лог метаданные и размер каждого кадра.
pub struct NormalSubscriberModule {
    name: String,
    received: Arc<AtomicU64>,
    received_bytes: Arc<AtomicU64>,
    endpoint: Option<SubscriberEndpoint>,
}

impl NormalSubscriberModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            received: Arc::new(AtomicU64::new(0)),
            received_bytes: Arc::new(AtomicU64::new(0)),
            endpoint: None,
        }
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes.load(Ordering::Acquire)
    }

    /// Статистика доставки эндпоинта; `None` до Initialize.
    pub fn stats(&self) -> Option<DeliveryStats> {
        self.endpoint.as_ref().map(SubscriberEndpoint::stats)
    }
}

impl Module for NormalSubscriberModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(
        &mut self,
        core: &ModuleCore,
    ) -> ChanResult<()> {
        let cfg = &core.settings().subscriber;
        let endpoint = core.channel().get_subscriber(&cfg.topic_name);
        let handle = builtin_type_support(MocapData::TYPE_NAME, &cfg.encoding);

        let received = self.received.clone();
        let received_bytes = self.received_bytes.clone();
        let module = self.name.clone();
        let subscribed = endpoint.subscribe(handle, move |ctx, buffer, release| {
            received.fetch_add(1, Ordering::AcqRel);
            received_bytes.fetch_add(buffer.len() as u64, Ordering::AcqRel);
            tracing::info!(
                module = %module,
                seq = ctx.meta_value("seq").unwrap_or("-"),
                encoding = ctx.serialization_type(),
                bytes = buffer.len(),
                "frame received"
            );
            release.release();
            Ok(())
        });

        if !subscribed {
            return Err(StackError::new(ModuleError::Init {
                module: self.name.clone(),
                reason: format!("cannot subscribe on topic '{}'", cfg.topic_name),
            }));
        }
        self.endpoint = Some(endpoint);
        Ok(())
    }

    fn shutdown(&mut self) -> ChanResult<()> {
        if let Some(stats) = self.stats() {
            tracing::info!(
                module = %self.name,
                received = self.received(),
                releases = stats.releases,
                failures = stats.callback_failures,
                "subscriber stopped"
            );
        }
        Ok(())
    }
}
