use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок канального слоя.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Регистрация типов и эндпоинтов (ошибки конфигурации)
/// - 3xxx: Нарушения контракта (Context, ReleaseToken)
/// - 4xxx: Доставка сообщений
/// - 5xxx: Сериализация
/// - 6xxx: Граница рантаймов (внешний исполнитель, Lua)
/// - 7xxx: Хост, модули, исполнители, конфигурация
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,
    InvalidState = 1005,

    // === 2xxx: Регистрация ===
    TypeNotRegistered = 2000,
    DuplicateRegistration = 2001,
    NullDescriptor = 2002,
    RegistrationClosed = 2003,
    TopicNotFound = 2004,

    // === 3xxx: Контракт ===
    ContextReused = 3000,
    ContextKindMismatch = 3001,
    ReleaseMissing = 3002,

    // === 4xxx: Доставка ===
    CallbackFailed = 4000,
    CallbackPanicked = 4001,

    // === 5xxx: Сериализация ===
    SerializationFailed = 5000,
    DeserializationFailed = 5001,
    TypeMismatch = 5002,
    StructuredViewUnsupported = 5003,

    // === 6xxx: Граница рантаймов ===
    BoundaryFailed = 6000,
    ReentrantDelivery = 6001,
    ForeignRuntimeError = 6002,
    RepresentationFailed = 6003,

    // === 7xxx: Хост ===
    ConfigInvalid = 7000,
    ExecutorNotFound = 7001,
    TimerUnsupported = 7002,
    ModuleInitFailed = 7003,
    ModuleStartFailed = 7004,
    ShutdownFailed = 7005,
    Io = 7006,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Использует `TryFrom<u32>` из `num_enum`; возвращает `None`, если
    /// значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка конфигурации: обнаруживается на этапе setup и никогда не
    /// повторяется автоматически (диапазон 2xxx и ошибки конфигурации хоста).
    pub fn is_configuration_defect(&self) -> bool {
        (2000..=2999).contains(&self.code())
            || matches!(
                self,
                Self::ConfigInvalid | Self::ExecutorNotFound | Self::TimerUnsupported
            )
    }

    /// Нарушение контракта вызывающим кодом (диапазон 3xxx).
    pub fn is_contract_violation(&self) -> bool {
        (3000..=3999).contains(&self.code())
    }

    /// Ошибка, возникшая при доставке и изолированная на стороне подписчика
    /// (диапазоны 4xxx и 6xxx).
    pub fn is_delivery_defect(&self) -> bool {
        matches!(self.code(), 4000..=4999 | 6000..=6999)
    }

    /// Ошибка кодека (диапазон 5xxx).
    pub fn is_codec_error(&self) -> bool {
        (5000..=5999).contains(&self.code())
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Internal | Self::ReleaseMissing | Self::ShutdownFailed
        )
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::TopicNotFound => LogLevel::Debug,
            Self::DuplicateRegistration | Self::RegistrationClosed | Self::InvalidArgs => {
                LogLevel::Info
            }
            Self::CallbackFailed
            | Self::CallbackPanicked
            | Self::BoundaryFailed
            | Self::ReentrantDelivery
            | Self::ForeignRuntimeError
            | Self::RepresentationFailed => LogLevel::Warn,
            Self::Internal
            | Self::TypeNotRegistered
            | Self::NullDescriptor
            | Self::ContextReused
            | Self::ContextKindMismatch
            | Self::ReleaseMissing
            | Self::ShutdownFailed => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет разбиение кодов на категории таксономии ошибок.
    #[test]
    fn test_taxonomy_ranges() {
        assert!(StatusCode::DuplicateRegistration.is_configuration_defect());
        assert!(StatusCode::TimerUnsupported.is_configuration_defect());
        assert!(StatusCode::ContextReused.is_contract_violation());
        assert!(StatusCode::CallbackPanicked.is_delivery_defect());
        assert!(StatusCode::ReentrantDelivery.is_delivery_defect());
        assert!(StatusCode::DeserializationFailed.is_codec_error());
        assert!(!StatusCode::ContextReused.is_delivery_defect());
    }

    /// Тест проверяет конвертацию через `TryFrom<u32>` и вспомогательную
    /// `from_u32`.
    #[test]
    fn test_from_try_from_u32() {
        let n = StatusCode::TypeNotRegistered.code();
        assert_eq!(
            StatusCode::try_from(n).unwrap(),
            StatusCode::TypeNotRegistered
        );
        assert!(StatusCode::from_u32(99999).is_none());
    }

    /// Тест проверяет получение числового представления и конвертацию
    /// `From<StatusCode> for u32`.
    #[test]
    fn test_code_and_into() {
        let c = StatusCode::ContextReused;
        assert_eq!(c.code(), 3000);
        let n: u32 = c.into();
        assert_eq!(n, 3000);
        assert!(StatusCode::is_success(StatusCode::Success.code()));
        assert!(!StatusCode::is_success(StatusCode::Internal.code()));
    }

    #[test]
    fn test_log_level_mappings() {
        assert_eq!(StatusCode::Success.log_level(), LogLevel::Trace);
        assert_eq!(StatusCode::CallbackFailed.log_level(), LogLevel::Warn);
        assert_eq!(StatusCode::ReleaseMissing.log_level(), LogLevel::Error);
        assert!(StatusCode::ReleaseMissing.is_critical());
        assert!(!StatusCode::CallbackFailed.is_critical());
    }

    /// Тест проверяет формат `Display` — строка должна содержать имя варианта и
    /// числовой код.
    #[test]
    fn test_display_contains_name_and_code() {
        let s = format!("{}", StatusCode::NullDescriptor);
        assert!(s.contains("2002"), "Display must contain code, got: {s}");
        assert!(
            s.contains("NullDescriptor"),
            "Display must contain variant name, got: {s}"
        );
    }
}
