use std::{
    fmt,
    path::Path,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use chanrt_error::BoundaryError;
use mlua::{
    Function, Lua, LuaSerdeExt, MetaMethod, RegistryKey, Table, UserData,
    UserDataMethods, Value,
};
use serde::{Deserialize, Serialize};

use super::{BoundaryCallback, ExecutionGate, ForeignHandler, GateScope};
use crate::channel::{
    Context, PublisherEndpoint, SubscriberEndpoint, TypeSupport, TypeSupportHandle,
};

/// Как сообщение попадает в Lua-callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LuaRepr {
    /// Копия буфера как Lua-строка.
    #[default]
    Bytes,
    /// Таблица, построенная из структурного представления `TypeSupport`.
    Table,
}

/// Встроенный Lua за исключительной возможностью исполнения.
///
/// Любое обращение к состоянию `Lua` идёт под [`ExecutionGate`]: доставки
/// из разных потоков сериализуются, а повторный вход из того же потока
/// отклоняется.
pub struct LuaRuntime {
    name: String,
    lua: Lua,
    gate: Arc<ExecutionGate>,
}

/// Контекст сообщения, видимый из Lua.
pub struct ContextRef(pub Context);

/// Эндпоинт издателя, видимый из Lua.
pub struct LuaPublisher(pub PublisherEndpoint);

/// Подписка Lua-функции на тип сообщения.
struct LuaHandler {
    runtime: Weak<LuaRuntime>,
    gate: Arc<ExecutionGate>,
    callback: RegistryKey,
    on_error: Option<RegistryKey>,
    repr: LuaRepr,
    support: Arc<dyn TypeSupport>,
}

/// Значение, построенное под гейтом, и рантайм, которому оно принадлежит.
struct LuaPayload {
    runtime: Arc<LuaRuntime>,
    value: Value,
}

fn foreign(err: mlua::Error) -> BoundaryError {
    BoundaryError::Foreign {
        reason: err.to_string(),
    }
}

////////////////////////////////////////////////////////////////////////////////
// LuaRuntime
////////////////////////////////////////////////////////////////////////////////

impl LuaRuntime {
    pub fn new(name: &str) -> Result<Arc<Self>, BoundaryError> {
        let lua = Lua::new();
        install_globals(&lua, name).map_err(foreign)?;
        Ok(Arc::new(Self {
            name: name.to_string(),
            lua,
            gate: Arc::new(ExecutionGate::new(name)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    /// Состояние Lua; `scope` доказывает, что гейт удерживается.
    fn lua(
        &self,
        scope: &GateScope<'_>,
    ) -> &Lua {
        debug_assert_eq!(scope.gate().id(), self.gate.id());
        &self.lua
    }

    /// Выполняет `f` под гейтом.
    pub fn with_lua<R>(
        &self,
        f: impl FnOnce(&Lua) -> mlua::Result<R>,
    ) -> Result<R, BoundaryError> {
        let scope = self.gate.acquire()?;
        f(self.lua(&scope)).map_err(foreign)
    }

    pub fn exec(
        &self,
        source: &str,
        chunk_name: &str,
    ) -> Result<(), BoundaryError> {
        self.with_lua(|lua| lua.load(source).set_name(chunk_name).exec())
    }

    pub fn exec_file(
        &self,
        path: &Path,
    ) -> Result<(), BoundaryError> {
        let source = std::fs::read_to_string(path).map_err(|e| BoundaryError::Foreign {
            reason: format!("cannot read '{}': {e}", path.display()),
        })?;
        self.exec(&source, &format!("@{}", path.display()))
    }

    /// Вызывает глобальную функцию без аргументов, если она определена.
    pub fn call_hook(
        &self,
        name: &str,
    ) -> Result<bool, BoundaryError> {
        self.with_lua(|lua| match lua.globals().get::<Option<Function>>(name)? {
            Some(hook) => {
                hook.call::<()>(())?;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    /// Делает издателя доступным скрипту как `publishers[topic]`.
    pub fn expose_publisher(
        &self,
        publisher: &PublisherEndpoint,
    ) -> Result<(), BoundaryError> {
        self.with_lua(|lua| {
            let publishers: Table = lua.globals().get("publishers")?;
            publishers.set(publisher.topic(), LuaPublisher(publisher.clone()))
        })
    }

    /// Подписывает глобальную Lua-функцию `function` на тип `handle`.
    ///
    /// `on_error` — необязательная глобальная функция, получающая текст ошибки
    /// доставки. Возвращает результат `SubscriberEndpoint::subscribe_with`.
    pub fn subscribe(
        self: &Arc<Self>,
        subscriber: &SubscriberEndpoint,
        handle: TypeSupportHandle,
        function: &str,
        repr: LuaRepr,
        on_error: Option<&str>,
    ) -> Result<bool, BoundaryError> {
        let Some(support) = handle.native_descriptor().cloned() else {
            return Ok(false);
        };

        let (callback, on_error) = self.with_lua(|lua| {
            let globals = lua.globals();
            let callback: Function = globals.get(function)?;
            let callback = lua.create_registry_value(callback)?;
            let on_error = match on_error {
                Some(name) => {
                    let handler: Function = globals.get(name)?;
                    Some(lua.create_registry_value(handler)?)
                }
                None => None,
            };
            Ok((callback, on_error))
        })?;

        let handler = LuaHandler {
            runtime: Arc::downgrade(self),
            gate: self.gate.clone(),
            callback,
            on_error,
            repr,
            support,
        };
        tracing::debug!(
            runtime = %self.name,
            topic = subscriber.topic(),
            type_name = handle.type_name(),
            function,
            ?repr,
            "lua subscription"
        );
        Ok(subscriber.subscribe_with(handle, Arc::new(BoundaryCallback::new(handler))))
    }
}

impl fmt::Debug for LuaRuntime {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LuaRuntime")
            .field("name", &self.name)
            .field("gate", &self.gate)
            .finish()
    }
}

fn install_globals(
    lua: &Lua,
    runtime: &str,
) -> mlua::Result<()> {
    let api = lua.create_table()?;

    api.set(
        "new_context",
        lua.create_function(|_, ()| Ok(ContextRef(Context::publish())))?,
    )?;

    let name = runtime.to_string();
    api.set(
        "log",
        lua.create_function(move |_, (level, msg): (String, String)| {
            match level.as_str() {
                "trace" => tracing::trace!(target: "chanrt::lua", runtime = %name, "{msg}"),
                "debug" => tracing::debug!(target: "chanrt::lua", runtime = %name, "{msg}"),
                "warn" => tracing::warn!(target: "chanrt::lua", runtime = %name, "{msg}"),
                "error" => tracing::error!(target: "chanrt::lua", runtime = %name, "{msg}"),
                _ => tracing::info!(target: "chanrt::lua", runtime = %name, "{msg}"),
            }
            Ok(())
        })?,
    )?;

    let globals = lua.globals();
    globals.set("chanrt", api)?;
    globals.set("publishers", lua.create_table()?)?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// LuaHandler
////////////////////////////////////////////////////////////////////////////////

impl LuaHandler {
    fn runtime(&self) -> Result<Arc<LuaRuntime>, BoundaryError> {
        self.runtime.upgrade().ok_or_else(|| BoundaryError::Foreign {
            reason: format!("lua runtime '{}' was dropped", self.gate.name()),
        })
    }
}

impl ForeignHandler for LuaHandler {
    type Repr = LuaPayload;

    fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    fn represent(
        &self,
        scope: &GateScope<'_>,
        _ctx: &Context,
        buffer: &Bytes,
    ) -> Result<LuaPayload, BoundaryError> {
        let runtime = self.runtime()?;
        let lua = runtime.lua(scope);
        let value = match self.repr {
            LuaRepr::Bytes => lua
                .create_string(buffer.as_ref())
                .map(Value::String)
                .map_err(|e| BoundaryError::Representation {
                    reason: e.to_string(),
                })?,
            LuaRepr::Table => {
                let structured = self.support.structured(buffer).map_err(|e| {
                    BoundaryError::Representation {
                        reason: e.to_string(),
                    }
                })?;
                lua.to_value(&structured)
                    .map_err(|e| BoundaryError::Representation {
                        reason: e.to_string(),
                    })?
            }
        };
        Ok(LuaPayload { runtime, value })
    }

    fn invoke(
        &self,
        scope: &GateScope<'_>,
        ctx: &Context,
        repr: LuaPayload,
    ) -> Result<(), BoundaryError> {
        let lua = repr.runtime.lua(scope);
        let callback: Function = lua.registry_value(&self.callback).map_err(foreign)?;
        let ctx = lua
            .create_userdata(ContextRef(ctx.clone()))
            .map_err(foreign)?;
        callback.call::<()>((ctx, repr.value)).map_err(foreign)
    }

    fn report(
        &self,
        err: &BoundaryError,
    ) {
        let handled = match (&self.on_error, self.runtime.upgrade()) {
            (Some(key), Some(runtime)) => match self.gate.acquire() {
                Ok(scope) => {
                    let lua = runtime.lua(&scope);
                    lua.registry_value::<Function>(key)
                        .and_then(|handler| handler.call::<()>(err.to_string()))
                        .map_err(|e| {
                            tracing::warn!(runtime = self.gate.name(), "lua error handler failed: {e}")
                        })
                        .is_ok()
                }
                // Гейт занят этим же потоком: обработчик вызвать нельзя.
                Err(_) => false,
            },
            _ => false,
        };
        if !handled {
            tracing::warn!(runtime = self.gate.name(), "lua delivery failed: {err}");
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// UserData
////////////////////////////////////////////////////////////////////////////////

impl UserData for ContextRef {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("check_used", |_, this, ()| Ok(this.0.is_used()));
        methods.add_method("kind", |_, this, ()| Ok(this.0.kind().to_string()));
        methods.add_method("get_meta_value", |_, this, key: String| {
            Ok(this.0.meta_value(&key).map(str::to_string))
        });
        methods.add_method_mut("set_meta_value", |_, this, (key, value): (String, String)| {
            this.0.set_meta_value(key, value);
            Ok(())
        });
        methods.add_method("get_meta_keys", |_, this, ()| {
            Ok(this.0.meta_keys().map(str::to_string).collect::<Vec<_>>())
        });
        methods.add_method("get_serialization_type", |_, this, ()| {
            Ok(this.0.serialization_type().to_string())
        });
        methods.add_method_mut("set_serialization_type", |_, this, tag: String| {
            this.0.set_serialization_type(tag);
            Ok(())
        });
        methods.add_method("to_string", |_, this, ()| Ok(this.0.to_string()));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.to_string()));
    }
}

impl UserData for LuaPublisher {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("topic", |_, this, ()| Ok(this.0.topic().to_string()));

        // publish(type_name, payload[, ctx | meta_table])
        methods.add_method(
            "publish",
            |_, this, (type_name, payload, meta): (String, mlua::String, Option<Value>)| {
                let buffer = Bytes::copy_from_slice(&payload.as_bytes());
                let result = match meta {
                    None | Some(Value::Nil) => {
                        this.0.try_publish(&type_name, &Context::publish(), buffer)
                    }
                    Some(Value::UserData(ud)) => {
                        let ctx = ud.borrow::<ContextRef>()?;
                        this.0.try_publish(&type_name, &ctx.0, buffer)
                    }
                    Some(Value::Table(table)) => {
                        let mut ctx = Context::publish();
                        for pair in table.pairs::<String, String>() {
                            let (key, value) = pair?;
                            ctx.set_meta_value(key, value);
                        }
                        this.0.try_publish(&type_name, &ctx, buffer)
                    }
                    Some(other) => {
                        return Err(mlua::Error::RuntimeError(format!(
                            "publish: expected a context or a table, got {}",
                            other.type_name()
                        )))
                    }
                };
                result.map_err(mlua::Error::external)?;
                Ok(true)
            },
        );
    }
}
