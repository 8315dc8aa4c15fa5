//! Форматтеры событий. Один и тот же layer строится поверх любого writer'а:
//! stdout для консоли, non-blocking appender для файла.

mod compact;
mod json;
mod pretty;

use tracing_subscriber::{fmt::MakeWriter, layer::Layer as LayerTrait, registry::LookupSpan};

pub use self::compact::build_compact_layer;
pub use self::json::build_json_layer;
pub use self::pretty::build_pretty_layer;
use crate::logging::config::{LogFormat, LoggingConfig};

/// Boxed layer, стирающий конкретный тип формата.
pub type BoxedLayer<S> = Box<dyn LayerTrait<S> + Send + Sync>;

/// Строит layer для выбранного формата.
pub fn build_layer<S, W>(
    config: &LoggingConfig,
    format: LogFormat,
    writer: W,
    with_ansi: bool,
) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => build_pretty_layer(config, writer, with_ansi),
        LogFormat::Compact => build_compact_layer(config, writer, with_ansi),
        LogFormat::Json => build_json_layer(config, writer),
    }
}
