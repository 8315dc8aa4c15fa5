use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use chanrt_error::{ensure, ChanResult, ModuleError, ResultExt, StackError};
use tokio::sync::oneshot;

use super::{Module, ModuleCore};
use crate::{
    channel::{Context, PublisherProxy},
    executor::Executor,
    protocols::{builtin_type_support, MocapData, Transform},
};

/// Периодический издатель `MocapData` на исполнителе с таймером.
///
/// Цикл публикует кадр, затем ждёт период на канале пробуждения: закрытие
/// канала при остановке будит цикл сразу. По выходе цикл один раз
/// завершает oneshot-сигнал, которого ждёт `shutdown`.
pub struct NormalPublisherModule {
    name: String,
    published: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    prepared: Option<Prepared>,
    wake: Option<mpsc::Sender<()>>,
    done: Option<oneshot::Receiver<()>>,
}

/// Всё, что цикл забирает с собой при старте.
struct Prepared {
    proxy: PublisherProxy<MocapData>,
    executor: Arc<dyn Executor>,
    period: Duration,
}

impl NormalPublisherModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            published: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            prepared: None,
            wake: None,
            done: None,
        }
    }

    /// Сколько кадров опубликовано.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Module for NormalPublisherModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(
        &mut self,
        core: &ModuleCore,
    ) -> ChanResult<()> {
        let cfg = &core.settings().publisher;
        let executor = core
            .executors()
            .timer_executor(&cfg.executor)
            .with_context(|| format!("module '{}' needs a timer executor", self.name))?;

        let endpoint = core.channel().get_publisher(&cfg.topic_name);
        let handle = builtin_type_support(MocapData::TYPE_NAME, &cfg.encoding);
        ensure!(
            endpoint.register_publish_type(handle),
            ModuleError::Init {
                module: self.name.clone(),
                reason: format!(
                    "cannot register {}@{} on topic '{}'",
                    MocapData::TYPE_NAME,
                    cfg.encoding,
                    cfg.topic_name
                ),
            }
        );
        let period = cfg.period().map_err(|reason| ModuleError::Init {
            module: self.name.clone(),
            reason,
        })?;

        self.prepared = Some(Prepared {
            proxy: PublisherProxy::new(endpoint, MocapData::TYPE_NAME),
            executor,
            period,
        });
        tracing::debug!(
            module = %self.name,
            topic = %cfg.topic_name,
            encoding = %cfg.encoding,
            frq = cfg.channel_frq,
            "publisher prepared"
        );
        Ok(())
    }

    fn start(&mut self) -> ChanResult<()> {
        let Some(Prepared {
            proxy,
            executor,
            period,
        }) = self.prepared.take()
        else {
            return Err(StackError::new(ModuleError::Start {
                module: self.name.clone(),
                reason: "start called without initialize".to_string(),
            }));
        };

        let (wake_tx, wake_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();
        self.wake = Some(wake_tx);
        self.done = Some(done_rx);
        self.running.store(true, Ordering::Release);

        let running = self.running.clone();
        let published = self.published.clone();
        let name = self.name.clone();

        executor.execute(Box::new(move || {
            let mut seq: u64 = 0;
            while running.load(Ordering::Acquire) {
                seq += 1;
                let mut ctx = Context::publish();
                ctx.set_meta_value("module", name.as_str());
                ctx.set_meta_value("seq", seq.to_string());
                let frame = MocapData {
                    transforms: vec![Transform::identity(); 2],
                };
                match proxy.publish_with_context(&ctx, &frame) {
                    Ok(()) => {
                        published.fetch_add(1, Ordering::AcqRel);
                    }
                    Err(err) => tracing::warn!(module = %name, seq, "publish failed: {err}"),
                }

                match wake_rx.recv_timeout(period) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::debug!(module = %name, frames = seq, "publish loop finished");
            // Получатель мог быть уже сброшен, если остановка не ждёт сигнала.
            let _ = done_tx.send(());
        }));
        Ok(())
    }

    fn shutdown(&mut self) -> ChanResult<()> {
        self.running.store(false, Ordering::Release);
        drop(self.wake.take());
        self.prepared = None;

        let Some(done) = self.done.take() else {
            return Ok(());
        };
        if !wait_loop_finished(done) {
            return Err(StackError::new(ModuleError::Shutdown {
                module: self.name.clone(),
                reason: "publish loop ended without signalling completion".to_string(),
            }));
        }
        tracing::info!(module = %self.name, published = self.published(), "publisher stopped");
        Ok(())
    }
}

/// Ждёт сигнала завершения цикла.
///
/// `blocking_recv` паникует на потоке рантайма tokio, поэтому из асинхронного
/// контекста ожидание уходит на отдельный поток.
fn wait_loop_finished(done: oneshot::Receiver<()>) -> bool {
    if tokio::runtime::Handle::try_current().is_err() {
        return done.blocking_recv().is_ok();
    }
    thread::scope(|scope| {
        scope
            .spawn(move || done.blocking_recv().is_ok())
            .join()
            .unwrap_or(false)
    })
}
