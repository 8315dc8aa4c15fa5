//! Жизненный цикл модулей: Initialize (все), закрытие регистрации, Start
//! (все), Shutdown (в обратном порядке).

mod host;
mod lua_module;
mod publisher_module;
mod subscriber_module;

use std::sync::Arc;

use chanrt_error::ChanResult;

pub use self::host::ModuleHost;
pub use self::lua_module::LuaScriptModule;
pub use self::publisher_module::NormalPublisherModule;
pub use self::subscriber_module::NormalSubscriberModule;
use crate::{channel::ChannelHandle, config::Settings, executor::ExecutorManager};

/// Общий интерфейс модулей хоста.
pub trait Module: Send {
    /// Уникальное имя модуля; под ним модуль владеет своими эндпоинтами.
    fn name(&self) -> &str;

    /// Создание эндпоинтов и регистрация типов. Вызывается один раз, до
    /// закрытия регистрации.
    fn initialize(
        &mut self,
        core: &ModuleCore,
    ) -> ChanResult<()>;

    /// Запуск циклов. Регистрация к этому моменту закрыта.
    fn start(&mut self) -> ChanResult<()> {
        Ok(())
    }

    /// Остановка. Должна быть идемпотентной.
    fn shutdown(&mut self) -> ChanResult<()> {
        Ok(())
    }
}

/// Окружение модуля на этапе инициализации.
#[derive(Clone)]
pub struct ModuleCore {
    channel: ChannelHandle,
    executors: Arc<ExecutorManager>,
    settings: Arc<Settings>,
}

impl ModuleCore {
    pub(crate) fn new(
        channel: ChannelHandle,
        executors: Arc<ExecutorManager>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            channel,
            executors,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        self.channel.owner()
    }

    /// Канальный хэндл от имени модуля.
    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    pub fn executors(&self) -> &Arc<ExecutorManager> {
        &self.executors
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
