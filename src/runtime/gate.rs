use std::{
    cell::RefCell,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use chanrt_error::BoundaryError;
use parking_lot::{Mutex, MutexGuard};

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Гейты, удерживаемые текущим потоком (для обнаружения повторного входа).
    static HELD_GATES: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Исключительная возможность исполнения во внешнем рантайме.
///
/// Пока поток держит [`GateScope`], никакой другой поток не исполняет код
/// этого рантайма. Повторный захват тем же потоком не ждёт, а возвращает
/// [`BoundaryError::Reentrant`].
pub struct ExecutionGate {
    id: u64,
    name: String,
    lock: Mutex<()>,
    acquisitions: AtomicU64,
}

/// RAII-область удержания гейта.
pub struct GateScope<'a> {
    gate: &'a ExecutionGate,
    _guard: MutexGuard<'a, ()>,
}

impl ExecutionGate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            lock: Mutex::new(()),
            acquisitions: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        HELD_GATES.with(|held| held.borrow().contains(&self.id))
    }

    /// Захватывает гейт, блокируясь, пока его держит другой поток.
    pub fn acquire(&self) -> Result<GateScope<'_>, BoundaryError> {
        if self.is_held_by_current_thread() {
            return Err(BoundaryError::Reentrant {
                runtime: self.name.clone(),
            });
        }
        let guard = self.lock.lock();
        HELD_GATES.with(|held| held.borrow_mut().push(self.id));
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(GateScope {
            gate: self,
            _guard: guard,
        })
    }

    /// Сколько раз гейт был захвачен.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

impl GateScope<'_> {
    pub fn gate(&self) -> &ExecutionGate {
        self.gate
    }
}

impl Drop for GateScope<'_> {
    fn drop(&mut self) {
        let id = self.gate.id;
        HELD_GATES.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|g| *g == id) {
                held.remove(pos);
            }
        });
    }
}

impl fmt::Debug for ExecutionGate {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ExecutionGate")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("held_here", &self.is_held_by_current_thread())
            .finish()
    }
}
