use std::{fmt, path::PathBuf};

use chanrt_error::ModuleError;
use serde::{Deserialize, Serialize};

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Формат консольного вывода.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень (`trace` .. `error`); `RUST_LOG` имеет приоритет.
    pub level: String,
    pub format: LogFormat,
    pub console: bool,
    pub ansi: bool,
    pub with_target: bool,
    pub with_thread_names: bool,
    /// Включает файл с ежедневной ротацией.
    pub file_enabled: bool,
    pub log_dir: PathBuf,
    pub file_name: String,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Директива для `EnvFilter`, собранная из уровня.
    ///
    /// Шумные зависимости ограничены `warn`.
    pub fn build_filter_directive(&self) -> String {
        format!("{},mlua=warn,config=warn", self.level.to_ascii_lowercase())
    }

    pub fn validate(&self) -> Result<(), ModuleError> {
        let level = self.level.to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(ModuleError::Config {
                reason: format!("unknown log level '{}'", self.level),
            });
        }
        if self.file_enabled && self.file_name.trim().is_empty() {
            return Err(ModuleError::Config {
                reason: "log file name is empty".to_string(),
            });
        }
        if !self.console && !self.file_enabled {
            return Err(ModuleError::Config {
                reason: "both console and file logging are disabled".to_string(),
            });
        }
        Ok(())
    }

    /// Создаёт каталог логов, если файловый вывод включён.
    pub fn ensure_log_dir(&self) -> Result<(), ModuleError> {
        if !self.file_enabled {
            return Ok(());
        }
        std::fs::create_dir_all(&self.log_dir).map_err(|err| ModuleError::Config {
            reason: format!("cannot create log dir {}: {err}", self.log_dir.display()),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для LoggingConfig
////////////////////////////////////////////////////////////////////////////////

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            console: true,
            ansi: true,
            with_target: true,
            with_thread_names: true,
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
            file_name: "chanrt.log".to_string(),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        };
        f.write_str(s)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
