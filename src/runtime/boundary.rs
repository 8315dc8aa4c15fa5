use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use chanrt_error::{BoundaryError, CallbackError};

use super::{ExecutionGate, GateScope};
use crate::channel::{panic_message, Context, ReleaseToken, SubscriberCallback};

/// Callback, исполняемый внутри внешнего рантайма.
///
/// `represent` и `invoke` вызываются только под удерживаемым гейтом; `scope`
/// служит доказательством этого.
pub trait ForeignHandler: Send + Sync + 'static {
    /// Представление сообщения во внешнем рантайме.
    type Repr;

    fn gate(&self) -> &ExecutionGate;

    /// Строит владеющую копию буфера во внешнем представлении.
    fn represent(
        &self,
        scope: &GateScope<'_>,
        ctx: &Context,
        buffer: &Bytes,
    ) -> Result<Self::Repr, BoundaryError>;

    fn invoke(
        &self,
        scope: &GateScope<'_>,
        ctx: &Context,
        repr: Self::Repr,
    ) -> Result<(), BoundaryError>;

    /// Канал ошибок самого callback'а. Вызывается после освобождения гейта и
    /// токена.
    fn report(
        &self,
        err: &BoundaryError,
    ) {
        tracing::warn!(runtime = self.gate().name(), "foreign callback failed: {err}");
    }
}

/// Адаптер границы рантаймов.
///
/// Порядок: захват гейта, построение представления, вызов, освобождение
/// гейта, затем освобождение токена. Любой исход, включая панику, даёт ровно
/// одно освобождение токена; паника внутри гейта превращается в
/// `BoundaryError::Foreign` и уходит в `ForeignHandler::report`.
pub struct BoundaryCallback<H> {
    handler: H,
}

impl<H: ForeignHandler> BoundaryCallback<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    fn run_in_gate(
        &self,
        ctx: &Context,
        buffer: &Bytes,
    ) -> Result<(), BoundaryError> {
        let scope = self.handler.gate().acquire()?;
        let repr = self.handler.represent(&scope, ctx, buffer)?;
        self.handler.invoke(&scope, ctx, repr)
    }
}

impl<H: ForeignHandler> SubscriberCallback for BoundaryCallback<H> {
    fn on_message(
        &self,
        ctx: &Context,
        buffer: &Bytes,
        release: ReleaseToken,
    ) -> Result<(), CallbackError> {
        // Гейт отпускается раскруткой до выхода из `catch_unwind`.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_in_gate(ctx, buffer)))
            .unwrap_or_else(|payload| {
                Err(BoundaryError::Foreign {
                    reason: format!("callback panicked: {}", panic_message(&*payload)),
                })
            });
        release.release();

        outcome.map_err(|err| {
            self.handler.report(&err);
            CallbackError::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::channel::{DeliveryLedger, ReleaseSlot, SettleSignal};

    /// Обработчик-шпион: записывает, держался ли гейт на каждом шаге.
    struct Spy {
        gate: Arc<ExecutionGate>,
        fail_represent: bool,
        fail_invoke: bool,
        panic_invoke: bool,
        held_in_invoke: AtomicBool,
        reports: AtomicUsize,
    }

    impl Spy {
        fn new(gate: Arc<ExecutionGate>) -> Self {
            Self {
                gate,
                fail_represent: false,
                fail_invoke: false,
                panic_invoke: false,
                held_in_invoke: AtomicBool::new(false),
                reports: AtomicUsize::new(0),
            }
        }
    }

    impl ForeignHandler for Spy {
        type Repr = Vec<u8>;

        fn gate(&self) -> &ExecutionGate {
            &self.gate
        }

        fn represent(
            &self,
            _scope: &GateScope<'_>,
            _ctx: &Context,
            buffer: &Bytes,
        ) -> Result<Vec<u8>, BoundaryError> {
            if self.fail_represent {
                return Err(BoundaryError::Representation {
                    reason: "bad frame".to_string(),
                });
            }
            Ok(buffer.to_vec())
        }

        fn invoke(
            &self,
            _scope: &GateScope<'_>,
            _ctx: &Context,
            _repr: Vec<u8>,
        ) -> Result<(), BoundaryError> {
            self.held_in_invoke
                .store(self.gate.is_held_by_current_thread(), Ordering::SeqCst);
            if self.panic_invoke {
                panic!("script blew up");
            }
            if self.fail_invoke {
                return Err(BoundaryError::Foreign {
                    reason: "attempt to index a nil value".to_string(),
                });
            }
            Ok(())
        }

        fn report(
            &self,
            _err: &BoundaryError,
        ) {
            self.reports.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Токен, освобождение которого записывает, держится ли гейт в этот
    /// момент.
    fn watched_token(
        gate: &Arc<ExecutionGate>,
        held_at_release: &Arc<AtomicBool>,
        ledger: &Arc<DeliveryLedger>,
    ) -> ReleaseToken {
        let gate = gate.clone();
        let flag = held_at_release.clone();
        let settle = SettleSignal::new(Some(Box::new(move || {
            flag.store(gate.is_held_by_current_thread(), Ordering::SeqCst)
        })));
        ReleaseToken::new(
            ReleaseSlot::new(),
            Bytes::from_static(b"0123456789"),
            ledger.clone(),
            settle,
            Arc::from("mocap"),
        )
    }

    fn run(spy: Spy) -> (Result<(), CallbackError>, bool, u64, Spy) {
        let gate = spy.gate.clone();
        let held_at_release = Arc::new(AtomicBool::new(true));
        let ledger = Arc::new(DeliveryLedger::default());
        let callback = BoundaryCallback::new(spy);
        let token = watched_token(&gate, &held_at_release, &ledger);

        let result = callback.on_message(&Context::subscribe(), &Bytes::from_static(b"x"), token);
        let releases = ledger.snapshot().releases;
        (result, held_at_release.load(Ordering::SeqCst), releases, callback.handler)
    }

    #[test]
    fn test_success_releases_after_gate() {
        let gate = Arc::new(ExecutionGate::new("spy"));
        let (result, held_at_release, releases, spy) = run(Spy::new(gate));

        assert!(result.is_ok());
        assert!(spy.held_in_invoke.load(Ordering::SeqCst));
        assert!(!held_at_release, "token must be released after the gate");
        assert_eq!(releases, 1);
        assert_eq!(spy.reports.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_representation_failure_still_releases() {
        let gate = Arc::new(ExecutionGate::new("spy"));
        let mut spy = Spy::new(gate);
        spy.fail_represent = true;
        let (result, held_at_release, releases, spy) = run(spy);

        assert!(matches!(
            result,
            Err(CallbackError::Boundary(BoundaryError::Representation { .. }))
        ));
        assert!(!held_at_release);
        assert_eq!(releases, 1);
        assert_eq!(spy.reports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_foreign_error_reported_to_handler() {
        let gate = Arc::new(ExecutionGate::new("spy"));
        let mut spy = Spy::new(gate);
        spy.fail_invoke = true;
        let (result, _, releases, spy) = run(spy);

        assert!(result.is_err());
        assert_eq!(releases, 1);
        assert_eq!(spy.reports.load(Ordering::SeqCst), 1);
    }

    /// Тест проверяет, что паника внутри гейта становится ошибкой границы:
    /// гейт отпущен раньше токена, освобождение одно, обработчик уведомлён.
    #[test]
    fn test_panic_reported_and_released_after_gate() {
        let gate = Arc::new(ExecutionGate::new("spy"));
        let mut spy = Spy::new(gate);
        spy.panic_invoke = true;
        let (result, held_at_release, releases, spy) = run(spy);

        match result {
            Err(CallbackError::Boundary(BoundaryError::Foreign { reason })) => {
                assert!(reason.contains("script blew up"), "{reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!spy.gate.is_held_by_current_thread());
        assert!(!held_at_release);
        assert_eq!(releases, 1);
        assert_eq!(spy.reports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_delivery_rejected() {
        let gate = Arc::new(ExecutionGate::new("spy"));
        let _outer = gate.acquire().unwrap();

        let ledger = Arc::new(DeliveryLedger::default());
        let held = Arc::new(AtomicBool::new(false));
        let callback = BoundaryCallback::new(Spy::new(gate.clone()));
        let token = watched_token(&gate, &held, &ledger);

        let result = callback.on_message(&Context::subscribe(), &Bytes::new(), token);
        assert!(matches!(
            result,
            Err(CallbackError::Boundary(BoundaryError::Reentrant { .. }))
        ));
        assert_eq!(ledger.snapshot().releases, 1);
        assert!(!callback.handler().held_in_invoke.load(Ordering::SeqCst));
        assert_eq!(callback.handler().reports.load(Ordering::SeqCst), 1);
    }
}
