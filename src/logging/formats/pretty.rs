use tracing_subscriber::{
    fmt::{self as other_fmt, format::FmtSpan, MakeWriter},
    registry::LookupSpan,
};

use super::BoxedLayer;
use crate::logging::config::LoggingConfig;

/// Pretty formatter для разработки.
pub fn build_pretty_layer<S, W>(
    config: &LoggingConfig,
    writer: W,
    with_ansi: bool,
) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = other_fmt::layer()
        .event_format(other_fmt::format().pretty())
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(writer)
        .with_ansi(with_ansi)
        .with_target(config.with_target)
        .with_thread_names(config.with_thread_names)
        .with_line_number(true);

    Box::new(layer)
}
