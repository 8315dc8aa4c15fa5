use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const PENDING: u8 = 0;
const RELEASED: u8 = 1;
const DROPPED: u8 = 2;
const DEFERRED: u8 = 3;

/// Реакция на нарушение контракта доставки (потерянный `ReleaseToken`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractPolicy {
    /// Паника на границе диспетчеризации после учёта в статистике.
    Strict,
    /// Ошибка в лог и счётчик `contract_violations`.
    Lenient,
}

/// Снимок статистики доставки подписчика.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub deliveries: u64,
    pub releases: u64,
    pub deferred: u64,
    pub callback_failures: u64,
    pub contract_violations: u64,
}

/// Счётчики доставки одного эндпоинта подписчика.
#[derive(Debug, Default)]
pub(crate) struct DeliveryLedger {
    pub(crate) deliveries: AtomicU64,
    pub(crate) releases: AtomicU64,
    pub(crate) deferred: AtomicU64,
    pub(crate) callback_failures: AtomicU64,
    pub(crate) contract_violations: AtomicU64,
}

/// Состояние одной доставки, общее для токена и диспетчера.
#[derive(Debug)]
pub(crate) struct ReleaseSlot(AtomicU8);

/// Что диспетчер увидел после возврата из callback'а.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotOutcome {
    Released,
    DroppedUnreleased,
    Deferred,
}

/// Сигнал «все получатели освободили буфер публикации».
///
/// Каждый токен держит клон `Arc`; хук вызывается при освобождении
/// последнего из них, в том числе отложенного.
pub(crate) struct SettleSignal {
    hook: Mutex<Option<Box<dyn FnOnce() + Send + 'static>>>,
}

/// Одноразовое право освободить доставленный буфер.
///
/// Callback обязан вызвать [`ReleaseToken::release`] до возврата или передать
/// токен в продолжение, которое сделает это позже. Буфер гарантированно жив
/// до освобождения; получить его можно через [`ReleaseToken::buffer`].
///
/// `release` поглощает токен, поэтому повторное освобождение не
/// компилируется:
///
/// ```compile_fail
/// fn deliver(token: chanrt::ReleaseToken) {
///     token.release();
///     token.release();
/// }
/// ```
///
/// Токен, удалённый без `release`, всё равно освобождает буфер, а граница
/// диспетчеризации решает, считать ли это нарушением контракта.
#[must_use = "a ReleaseToken must be released or moved into a continuation that releases it"]
pub struct ReleaseToken {
    slot: Arc<ReleaseSlot>,
    buffer: Bytes,
    ledger: Arc<DeliveryLedger>,
    settle: Arc<SettleSignal>,
    topic: Arc<str>,
    settled: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ContractPolicy {
    /// Учитывает нарушение и, в строгом режиме, паникует.
    pub(crate) fn violation(
        self,
        ledger: &DeliveryLedger,
        topic: &str,
        type_name: &str,
        what: &str,
    ) {
        ledger.contract_violations.fetch_add(1, Ordering::Relaxed);
        tracing::error!(topic, type_name, "contract violation: {what}");
        if self == ContractPolicy::Strict {
            panic!("contract violation on topic '{topic}' ({type_name}): {what}");
        }
    }
}

impl DeliveryLedger {
    pub(crate) fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            deliveries: self.deliveries.load(Ordering::Acquire),
            releases: self.releases.load(Ordering::Acquire),
            deferred: self.deferred.load(Ordering::Acquire),
            callback_failures: self.callback_failures.load(Ordering::Acquire),
            contract_violations: self.contract_violations.load(Ordering::Acquire),
        }
    }
}

impl DeliveryStats {
    /// Доставки, буфер которых ещё не освобождён.
    pub fn outstanding(&self) -> u64 {
        self.deliveries.saturating_sub(self.releases)
    }
}

impl ReleaseSlot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self(AtomicU8::new(PENDING)))
    }

    /// Закрывает синхронную часть доставки. Ещё живой токен переводится в
    /// состояние «отложен».
    pub(crate) fn close_delivery(&self) -> SlotOutcome {
        match self
            .0
            .compare_exchange(PENDING, DEFERRED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => SlotOutcome::Deferred,
            Err(RELEASED) => SlotOutcome::Released,
            Err(_) => SlotOutcome::DroppedUnreleased,
        }
    }
}

impl SettleSignal {
    pub(crate) fn new(hook: Option<Box<dyn FnOnce() + Send + 'static>>) -> Arc<Self> {
        Arc::new(Self {
            hook: Mutex::new(hook),
        })
    }
}

impl ReleaseToken {
    pub(crate) fn new(
        slot: Arc<ReleaseSlot>,
        buffer: Bytes,
        ledger: Arc<DeliveryLedger>,
        settle: Arc<SettleSignal>,
        topic: Arc<str>,
    ) -> Self {
        Self {
            slot,
            buffer,
            ledger,
            settle,
            topic,
            settled: false,
        }
    }

    /// Освобождает буфер доставки.
    pub fn release(mut self) {
        self.settle_as(RELEASED);
    }

    /// Доставленный буфер. Жив, пока жив токен.
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn settle_as(
        &mut self,
        outcome: u8,
    ) {
        self.settled = true;
        let previous = self.slot.0.swap(outcome, Ordering::AcqRel);
        self.ledger.releases.fetch_add(1, Ordering::AcqRel);

        if outcome == DROPPED {
            if previous == DEFERRED {
                // Продолжение потеряло токен; диспетчер уже вернулся и не
                // увидит этого, поэтому учёт здесь. Паника в Drop недопустима.
                self.ledger
                    .contract_violations
                    .fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    topic = %self.topic,
                    "deferred release token dropped without release"
                );
            } else {
                tracing::debug!(topic = %self.topic, "release token dropped, buffer released by scope");
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ContractPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ContractPolicy::Strict
        } else {
            ContractPolicy::Lenient
        }
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        if !self.settled {
            self.settle_as(DROPPED);
        }
    }
}

impl Drop for SettleSignal {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.get_mut().take() {
            hook();
        }
    }
}

impl fmt::Debug for ReleaseToken {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ReleaseToken")
            .field("topic", &self.topic)
            .field("len", &self.buffer.len())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    fn token_with(
        ledger: &Arc<DeliveryLedger>,
        settle: &Arc<SettleSignal>,
    ) -> (Arc<ReleaseSlot>, ReleaseToken) {
        let slot = ReleaseSlot::new();
        let token = ReleaseToken::new(
            slot.clone(),
            Bytes::from_static(b"0123456789"),
            ledger.clone(),
            settle.clone(),
            Arc::from("mocap"),
        );
        (slot, token)
    }

    #[test]
    fn test_explicit_release() {
        let ledger = Arc::new(DeliveryLedger::default());
        let settle = SettleSignal::new(None);
        let (slot, token) = token_with(&ledger, &settle);

        assert_eq!(token.buffer().len(), 10);
        token.release();

        assert_eq!(slot.close_delivery(), SlotOutcome::Released);
        assert_eq!(ledger.snapshot().releases, 1);
        assert_eq!(ledger.snapshot().contract_violations, 0);
    }

    /// Тест проверяет, что удалённый токен освобождает буфер, а решение о
    /// нарушении остаётся за диспетчером.
    #[test]
    fn test_drop_is_scoped_release() {
        let ledger = Arc::new(DeliveryLedger::default());
        let settle = SettleSignal::new(None);
        let (slot, token) = token_with(&ledger, &settle);

        drop(token);
        assert_eq!(slot.close_delivery(), SlotOutcome::DroppedUnreleased);
        assert_eq!(ledger.snapshot().releases, 1);
        assert_eq!(ledger.snapshot().contract_violations, 0);
    }

    #[test]
    fn test_deferred_then_released() {
        let ledger = Arc::new(DeliveryLedger::default());
        let settle = SettleSignal::new(None);
        let (slot, token) = token_with(&ledger, &settle);

        assert_eq!(slot.close_delivery(), SlotOutcome::Deferred);
        std::thread::spawn(move || token.release()).join().unwrap();

        let stats = ledger.snapshot();
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.contract_violations, 0);
    }

    /// Тест проверяет, что потерянный отложенный токен учитывается как
    /// нарушение контракта без паники.
    #[test]
    fn test_deferred_then_dropped_is_violation() {
        let ledger = Arc::new(DeliveryLedger::default());
        let settle = SettleSignal::new(None);
        let (slot, token) = token_with(&ledger, &settle);

        assert_eq!(slot.close_delivery(), SlotOutcome::Deferred);
        drop(token);
        assert_eq!(ledger.snapshot().contract_violations, 1);
        assert_eq!(ledger.snapshot().releases, 1);
    }

    #[test]
    fn test_settle_hook_fires_after_last_token() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let ledger = Arc::new(DeliveryLedger::default());
        let settle = SettleSignal::new(Some(Box::new(move || {
            flag.store(true, Ordering::SeqCst)
        })));

        let (_, first) = token_with(&ledger, &settle);
        let (_, second) = token_with(&ledger, &settle);
        drop(settle);

        first.release();
        assert!(!fired.load(Ordering::SeqCst));
        second.release();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_strict_policy_panics() {
        let ledger = DeliveryLedger::default();
        ContractPolicy::Strict.violation(&ledger, "t", "Mocap", "token dropped");
    }

    #[test]
    fn test_lenient_policy_counts() {
        let ledger = DeliveryLedger::default();
        ContractPolicy::Lenient.violation(&ledger, "t", "Mocap", "token dropped");
        assert_eq!(ledger.snapshot().contract_violations, 1);
    }
}
