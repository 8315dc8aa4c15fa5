use std::sync::Arc;

use chanrt_error::{ChanResult, ModuleError, ResultExt, StackError};

use super::{Module, ModuleCore};
use crate::{
    channel::{ChannelHandle, TypeSupportHandle},
    config::LuaSettings,
    protocols::builtin_type_support,
    runtime::LuaRuntime,
};

/// Глобальные функции скрипта, вызываемые на фазах жизненного цикла.
const ON_START: &str = "on_start";
const ON_SHUTDOWN: &str = "on_shutdown";

/// Модуль, исполняющий Lua-скрипт: подписки и издатели берутся из
/// конфигурации, поведение из скрипта.
pub struct LuaScriptModule {
    name: String,
    settings: Option<LuaSettings>,
    runtime: Option<Arc<LuaRuntime>>,
}

impl LuaScriptModule {
    /// Настройки берутся из `Settings::lua` при инициализации.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            settings: None,
            runtime: None,
        }
    }

    /// Модуль с явными настройками вместо `Settings::lua`.
    pub fn with_settings(
        name: &str,
        settings: LuaSettings,
    ) -> Self {
        Self {
            name: name.to_string(),
            settings: Some(settings),
            runtime: None,
        }
    }

    pub fn runtime(&self) -> Option<&Arc<LuaRuntime>> {
        self.runtime.as_ref()
    }

    fn init_error(
        &self,
        reason: String,
    ) -> StackError {
        StackError::new(ModuleError::Init {
            module: self.name.clone(),
            reason,
        })
    }
}

/// Описание типа: сначала уже зарегистрированное в реестре, затем встроенное.
fn resolve_type(
    channel: &ChannelHandle,
    type_name: &str,
    encoding: &str,
) -> TypeSupportHandle {
    channel
        .registry()
        .lookup_type(type_name, encoding)
        .unwrap_or_else(|| builtin_type_support(type_name, encoding))
}

impl Module for LuaScriptModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(
        &mut self,
        core: &ModuleCore,
    ) -> ChanResult<()> {
        let settings = match self.settings.clone().or_else(|| core.settings().lua.clone()) {
            Some(settings) => settings,
            None => return Err(self.init_error("no lua settings".to_string())),
        };

        let runtime = LuaRuntime::new(&self.name).context("creating lua runtime")?;

        // Издатели видны скрипту уже во время загрузки.
        for entry in &settings.publish {
            let endpoint = core.channel().get_publisher(&entry.topic);
            let handle = resolve_type(core.channel(), &entry.type_name, &entry.encoding);
            if !endpoint.register_publish_type(handle) {
                return Err(self.init_error(format!(
                    "cannot register {}@{} on topic '{}'",
                    entry.type_name, entry.encoding, entry.topic
                )));
            }
            runtime
                .expose_publisher(&endpoint)
                .with_context(|| format!("exposing publisher '{}'", entry.topic))?;
        }

        runtime
            .exec_file(&settings.script_path)
            .map_err(|err| ModuleError::Script {
                reason: err.to_string(),
            })
            .with_context(|| format!("loading script {}", settings.script_path.display()))?;

        for binding in &settings.bindings {
            let subscriber = core.channel().get_subscriber(&binding.topic);
            let handle = resolve_type(core.channel(), &binding.type_name, &binding.encoding);
            let subscribed = runtime
                .subscribe(
                    &subscriber,
                    handle,
                    &binding.function,
                    binding.repr,
                    binding.on_error.as_deref(),
                )
                .with_context(|| format!("binding lua function '{}'", binding.function))?;
            if !subscribed {
                return Err(self.init_error(format!(
                    "cannot subscribe '{}' on topic '{}'",
                    binding.function, binding.topic
                )));
            }
        }

        tracing::info!(
            module = %self.name,
            script = %settings.script_path.display(),
            bindings = settings.bindings.len(),
            publishers = settings.publish.len(),
            "lua script loaded"
        );
        self.settings = Some(settings);
        self.runtime = Some(runtime);
        Ok(())
    }

    fn start(&mut self) -> ChanResult<()> {
        if let Some(runtime) = &self.runtime {
            runtime
                .call_hook(ON_START)
                .with_context(|| format!("running {ON_START} of '{}'", self.name))?;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> ChanResult<()> {
        // Повторная остановка не должна вызывать хук второй раз.
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };
        runtime
            .call_hook(ON_SHUTDOWN)
            .with_context(|| format!("running {ON_SHUTDOWN} of '{}'", self.name))?;
        Ok(())
    }
}
