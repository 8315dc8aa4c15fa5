//! Конфигурация процесса: значения по умолчанию, файл, переменные окружения.

mod settings;

pub use settings::{
    ChannelSettings, ExecutorKind, ExecutorSettings, LuaBindingSettings, LuaPublishSettings,
    LuaSettings, PublisherSettings, Settings, SubscriberSettings, ENV_PREFIX,
};
