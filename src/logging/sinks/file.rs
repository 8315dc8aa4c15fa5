use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::registry::LookupSpan;

use crate::logging::{
    config::LoggingConfig,
    formats::{self, BoxedLayer},
};

/// File layer с ежедневной ротацией. Возвращённый guard должен жить до
/// завершения процесса, иначе хвост буфера теряется.
pub fn layer_with_config<S>(config: &LoggingConfig) -> (BoxedLayer<S>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = daily(&config.log_dir, &config.file_name);
    let (writer, guard) = non_blocking(appender);

    // В файле ANSI не нужен при любом формате.
    let layer = formats::build_layer(config, config.format, writer, false);
    (layer, guard)
}
