use std::{collections::HashSet, path::Path, path::PathBuf, time::Duration};

use chanrt_error::ModuleError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{channel::ContractPolicy, logging::LoggingConfig, runtime::LuaRepr};

/// Префикс переменных окружения: `CHANRT_PUBLISHER__CHANNEL_FRQ=20`.
pub const ENV_PREFIX: &str = "CHANRT";

/// Вид исполнителя.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Tokio,
    Thread,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    pub name: String,
    pub kind: ExecutorKind,
    #[serde(default = "default_threads")]
    pub threads: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub contract_policy: ContractPolicy,
}

/// Периодический издатель демо-хоста.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    pub topic_name: String,
    /// Кодировка публикуемого `MocapData`.
    pub encoding: String,
    /// Частота публикаций, Гц.
    pub channel_frq: f64,
    /// Исполнитель с поддержкой таймеров.
    pub executor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberSettings {
    pub topic_name: String,
    /// Кодировка, в которой подписчик хочет получать сообщения.
    pub encoding: String,
}

/// Подписка Lua-функции на топик.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuaBindingSettings {
    pub topic: String,
    pub type_name: String,
    pub encoding: String,
    /// Глобальная функция скрипта, получающая `(ctx, msg)`.
    pub function: String,
    #[serde(default)]
    pub repr: LuaRepr,
    /// Глобальная функция-обработчик ошибок callback'а.
    #[serde(default)]
    pub on_error: Option<String>,
}

/// Тип, публикуемый скриптом на топик.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuaPublishSettings {
    pub topic: String,
    pub type_name: String,
    pub encoding: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuaSettings {
    pub script_path: PathBuf,
    #[serde(default)]
    pub bindings: Vec<LuaBindingSettings>,
    #[serde(default)]
    pub publish: Vec<LuaPublishSettings>,
}

/// Корневая конфигурация.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LoggingConfig,
    pub executors: Vec<ExecutorSettings>,
    pub channel: ChannelSettings,
    pub publisher: PublisherSettings,
    pub subscriber: SubscriberSettings,
    pub lua: Option<LuaSettings>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl PublisherSettings {
    /// Период публикации `1 / channel_frq`.
    ///
    /// Ошибка, если частота не положительна или период не помещается в
    /// `Duration`.
    pub fn period(&self) -> Result<Duration, String> {
        let frq = self.channel_frq;
        if !(frq.is_finite() && frq > 0.0) {
            return Err(format!("publisher.channel_frq must be positive, got {frq}"));
        }
        Duration::try_from_secs_f64(frq.recip())
            .map_err(|_| format!("publisher.channel_frq {frq} gives a period out of range"))
    }
}

impl Settings {
    /// Загружает конфигурацию: значения по умолчанию, затем файл (формат по
    /// расширению), затем переменные окружения с префиксом `CHANRT`.
    pub fn load(path: Option<&Path>) -> Result<Self, ModuleError> {
        let mut builder = Config::builder()
            .set_default("publisher.topic_name", "mocap")
            .and_then(|b| b.set_default("publisher.channel_frq", 10.0))
            .and_then(|b| b.set_default("publisher.executor", "work_thread_pool"))
            .and_then(|b| b.set_default("subscriber.topic_name", "mocap"))
            .map_err(config_error)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        let settings: Self = cfg.try_deserialize().map_err(config_error)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ModuleError> {
        self.log.validate()?;

        self.publisher.period().map_err(invalid)?;
        if self.publisher.topic_name.trim().is_empty() {
            return Err(invalid("publisher.topic_name is empty"));
        }
        if self.subscriber.topic_name.trim().is_empty() {
            return Err(invalid("subscriber.topic_name is empty"));
        }

        let mut names = HashSet::new();
        for executor in &self.executors {
            if executor.name.trim().is_empty() {
                return Err(invalid("executor name is empty"));
            }
            if executor.threads == 0 {
                return Err(invalid(format!("executor '{}' has zero threads", executor.name)));
            }
            if !names.insert(executor.name.as_str()) {
                return Err(invalid(format!("duplicate executor name '{}'", executor.name)));
            }
        }

        if let Some(lua) = &self.lua {
            for binding in &lua.bindings {
                if binding.topic.trim().is_empty() || binding.function.trim().is_empty() {
                    return Err(invalid("lua binding needs a topic and a function"));
                }
            }
            for publish in &lua.publish {
                if publish.topic.trim().is_empty() {
                    return Err(invalid("lua publish entry has an empty topic"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ModuleError {
    ModuleError::Config {
        reason: reason.into(),
    }
}

fn config_error(err: config::ConfigError) -> ModuleError {
    invalid(err.to_string())
}

fn default_threads() -> usize {
    2
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            topic_name: "mocap".to_string(),
            encoding: "json".to_string(),
            channel_frq: 10.0,
            executor: "work_thread_pool".to_string(),
        }
    }
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            topic_name: "mocap".to_string(),
            encoding: "json".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log: LoggingConfig::default(),
            executors: vec![ExecutorSettings {
                name: "work_thread_pool".to_string(),
                kind: ExecutorKind::Tokio,
                threads: default_threads(),
            }],
            channel: ChannelSettings::default(),
            publisher: PublisherSettings::default(),
            subscriber: SubscriberSettings::default(),
            lua: None,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
