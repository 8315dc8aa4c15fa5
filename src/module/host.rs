use std::{fmt, sync::Arc, time::Duration};

use chanrt_error::{bail, ensure, ChanResult, LogLevel, ModuleError, ResultExt, StackError};

use super::{Module, ModuleCore};
use crate::{channel::ChannelRegistry, config::Settings, executor::ExecutorManager};

/// Сколько ждать задачи исполнителей при остановке.
const EXECUTOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Created,
    Initialized,
    Started,
    ShutDown,
}

/// Хост модулей: владеет реестром каналов и исполнителями.
pub struct ModuleHost {
    settings: Arc<Settings>,
    registry: ChannelRegistry,
    executors: Arc<ExecutorManager>,
    modules: Vec<Box<dyn Module>>,
    state: HostState,
}

impl ModuleHost {
    pub fn new(settings: Settings) -> ChanResult<Self> {
        settings.validate().context("validating settings")?;
        let executors =
            ExecutorManager::from_settings(&settings.executors).context("building executors")?;
        let registry = ChannelRegistry::with_policy(settings.channel.contract_policy);

        Ok(Self {
            settings: Arc::new(settings),
            registry,
            executors: Arc::new(executors),
            modules: Vec::new(),
            state: HostState::Created,
        })
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn executors(&self) -> &Arc<ExecutorManager> {
        &self.executors
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Добавляет модуль. Допустимо только до Initialize.
    pub fn add_module(
        &mut self,
        module: Box<dyn Module>,
    ) -> ChanResult<()> {
        ensure!(
            self.state == HostState::Created,
            lifecycle_error(module.name(), "modules can only be added before initialize")
        );
        ensure!(
            !self.modules.iter().any(|m| m.name() == module.name()),
            ModuleError::Init {
                module: module.name().to_string(),
                reason: "duplicate module name".to_string(),
            }
        );
        self.modules.push(module);
        Ok(())
    }

    /// Инициализирует модули в порядке добавления.
    pub fn initialize(&mut self) -> ChanResult<()> {
        if self.state != HostState::Created {
            bail!(lifecycle_error("host", "initialize called twice"));
        }
        for module in &mut self.modules {
            let core = ModuleCore::new(
                self.registry.module_handle(module.name()),
                self.executors.clone(),
                self.settings.clone(),
            );
            let name = module.name().to_string();
            module
                .initialize(&core)
                .with_context(|| format!("initializing module '{name}'"))
                .inspect_err(report_failure)?;
            tracing::info!(module = %name, "module initialized");
        }
        self.state = HostState::Initialized;
        Ok(())
    }

    /// Закрывает регистрацию и запускает модули.
    pub fn start(&mut self) -> ChanResult<()> {
        if self.state != HostState::Initialized {
            bail!(lifecycle_error("host", "start requires an initialized host"));
        }
        self.registry.seal();
        for module in &mut self.modules {
            let name = module.name().to_string();
            module
                .start()
                .with_context(|| format!("starting module '{name}'"))
                .inspect_err(report_failure)?;
            tracing::info!(module = %name, "module started");
        }
        self.state = HostState::Started;
        tracing::info!(
            modules = self.modules.len(),
            topics = ?self.registry.topics(),
            "host started"
        );
        Ok(())
    }

    /// Останавливает модули в обратном порядке, затем исполнители.
    ///
    /// Повторный вызов ничего не делает. Ошибка модуля не прерывает остановку
    /// остальных; возвращается первая. Вызов блокирующий; из асинхронного
    /// контекста он допустим, но занимает поток рантайма до конца остановки.
    pub fn shutdown(&mut self) -> ChanResult<()> {
        if self.state == HostState::ShutDown {
            return Ok(());
        }
        self.state = HostState::ShutDown;

        let mut first_error = None;
        for module in self.modules.iter_mut().rev() {
            let name = module.name().to_string();
            match module.shutdown() {
                Ok(()) => tracing::info!(module = %name, "module shut down"),
                Err(err) => {
                    let err = err.context(format!("shutting down module '{name}'"));
                    report_failure(&err);
                    first_error.get_or_insert(err);
                }
            }
        }
        self.executors.shutdown(EXECUTOR_SHUTDOWN_TIMEOUT);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Пишет отчёт об ошибке жизненного цикла на уровне, заданном её кодом.
fn report_failure(err: &StackError) {
    let report = serde_json::to_string(&err.to_report())
        .unwrap_or_else(|_| err.client_message());
    let status = err.status_code();
    let code: &str = status.as_ref();
    match err.log_level() {
        LogLevel::Error => tracing::error!(code, %report, "{err}"),
        LogLevel::Warn => tracing::warn!(code, %report, "{err}"),
        LogLevel::Info => tracing::info!(code, %report, "{err}"),
        LogLevel::Debug => tracing::debug!(code, %report, "{err}"),
        LogLevel::Trace => tracing::trace!(code, %report, "{err}"),
    }
}

fn lifecycle_error(
    module: &str,
    reason: &str,
) -> StackError {
    StackError::new(ModuleError::Start {
        module: module.to_string(),
        reason: reason.to_string(),
    })
}

impl fmt::Debug for ModuleHost {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ModuleHost")
            .field("state", &self.state)
            .field("modules", &self.module_names())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Модуль, записывающий вызовы жизненного цикла в общий журнал.
    struct Recorder {
        name: String,
        journal: Arc<Mutex<Vec<String>>>,
        fail_shutdown: bool,
    }

    impl Recorder {
        fn boxed(
            name: &str,
            journal: &Arc<Mutex<Vec<String>>>,
        ) -> Box<dyn Module> {
            Box::new(Self {
                name: name.to_string(),
                journal: journal.clone(),
                fail_shutdown: false,
            })
        }

        fn log(
            &self,
            event: &str,
        ) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{event}", self.name));
        }
    }

    impl Module for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn initialize(
            &mut self,
            core: &ModuleCore,
        ) -> ChanResult<()> {
            assert_eq!(core.name(), self.name);
            assert!(!core.channel().registry().is_sealed());
            self.log("init");
            Ok(())
        }

        fn start(&mut self) -> ChanResult<()> {
            self.log("start");
            Ok(())
        }

        fn shutdown(&mut self) -> ChanResult<()> {
            self.log("shutdown");
            if self.fail_shutdown {
                return Err(StackError::new(ModuleError::Shutdown {
                    module: self.name.clone(),
                    reason: "boom".to_string(),
                }));
            }
            Ok(())
        }
    }

    fn host() -> ModuleHost {
        let mut settings = Settings::default();
        settings.executors.clear();
        ModuleHost::new(settings).unwrap()
    }

    /// Тест проверяет порядок фаз: init и start по порядку добавления,
    /// shutdown в обратном, регистрация закрыта к старту.
    #[test]
    fn test_lifecycle_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut host = host();
        host.add_module(Recorder::boxed("a", &journal)).unwrap();
        host.add_module(Recorder::boxed("b", &journal)).unwrap();

        host.initialize().unwrap();
        host.start().unwrap();
        assert!(host.registry().is_sealed());
        host.shutdown().unwrap();
        host.shutdown().unwrap();

        assert_eq!(
            *journal.lock().unwrap(),
            vec!["a:init", "b:init", "a:start", "b:start", "b:shutdown", "a:shutdown"]
        );
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut host = host();
        host.add_module(Recorder::boxed("a", &journal)).unwrap();
        assert!(host.add_module(Recorder::boxed("a", &journal)).is_err());
    }

    #[test]
    fn test_start_before_initialize_rejected() {
        let mut host = host();
        assert!(host.start().is_err());
    }

    /// Тест проверяет, что ошибка одного модуля не мешает остановке
    /// остальных.
    #[test]
    fn test_shutdown_continues_after_failure() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut host = host();
        host.add_module(Recorder::boxed("a", &journal)).unwrap();
        host.add_module(Box::new(Recorder {
            name: "b".to_string(),
            journal: journal.clone(),
            fail_shutdown: true,
        }))
        .unwrap();
        host.initialize().unwrap();
        host.start().unwrap();

        let err = host.shutdown().unwrap_err();
        assert!(err.downcast_ref::<ModuleError>().is_some());
        assert!(journal.lock().unwrap().contains(&"a:shutdown".to_string()));
    }
}
