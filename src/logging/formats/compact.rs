use tracing_subscriber::{fmt, fmt::MakeWriter, registry::LookupSpan};

use super::BoxedLayer;
use crate::logging::config::LoggingConfig;

/// Compact formatter: одна строка на событие, без имён потоков.
pub fn build_compact_layer<S, W>(
    config: &LoggingConfig,
    writer: W,
    with_ansi: bool,
) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .event_format(fmt::format().compact())
        .with_writer(writer)
        .with_ansi(with_ansi)
        .with_target(config.with_target)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false);

    Box::new(layer)
}
