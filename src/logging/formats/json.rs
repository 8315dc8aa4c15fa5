use tracing_subscriber::{fmt, fmt::MakeWriter, registry::LookupSpan};

use super::BoxedLayer;
use crate::logging::config::LoggingConfig;

/// JSON formatter: одно JSON-событие на строку, ANSI всегда выключен.
pub fn build_json_layer<S, W>(
    config: &LoggingConfig,
    writer: W,
) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let json_fmt = fmt::format()
        .json()
        .with_current_span(true)
        .with_span_list(false);

    let layer = fmt::layer()
        .event_format(json_fmt)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(config.with_target)
        .with_thread_names(config.with_thread_names);

    Box::new(layer)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    #[derive(Clone)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Buffer {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Тест проверяет, что JSON layer пишет структурированные поля событий.
    #[test]
    fn test_json_layer_emits_fields() {
        let out = Arc::new(Mutex::new(Vec::new()));
        let writer = {
            let out = out.clone();
            move || Buffer(out.clone())
        };
        let layer = build_json_layer::<Registry, _>(&LoggingConfig::default(), writer);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(topic = "mocap", "message delivered");
        });

        let text = String::from_utf8(out.lock().unwrap().clone()).unwrap();
        let line: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(line["fields"]["topic"], "mocap");
        assert_eq!(line["fields"]["message"], "message delivered");
    }
}
