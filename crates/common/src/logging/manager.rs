//! Logging initialization.

use tracing::*;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{
    fmt::layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use super::types::LoggerConfig;

/// Targets that are too chatty at INFO.
const QUIET_TARGETS: &[&str] = &["hyper=warn", "reqwest=warn", "jsonrpsee=warn"];

fn build_filter() -> EnvFilter {
    // Default INFO, still overridable via RUST_LOG.
    let mut filt = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    for directive in QUIET_TARGETS {
        if let Ok(d) = directive.parse() {
            filt = filt.add_directive(d);
        }
    }
    filt
}

/// Initializes the logging subsystem with the provided config.
///
/// Must be called at most once per process.
pub fn init(config: LoggerConfig) {
    let filt = build_filter();

    let stdout_sub = if config.stdout_config.json_format {
        layer()
            .json()
            .with_span_events(config.stdout_config.fmt_span.clone())
            .with_filter(filt)
            .boxed()
    } else {
        layer()
            .compact()
            .with_span_events(config.stdout_config.fmt_span.clone())
            .with_filter(filt)
            .boxed()
    };

    let file_layer = config.file_logging_config.as_ref().map(|file_config| {
        let file_appender = RollingFileAppender::new(
            file_config.rotation.clone(),
            &file_config.directory,
            &file_config.file_name_prefix,
        );

        if file_config.json_format {
            layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false) // No color codes in files
                .with_filter(build_filter())
                .boxed()
        } else {
            layer()
                .compact()
                .with_writer(file_appender)
                .with_ansi(false) // No color codes in files
                .with_filter(build_filter())
                .boxed()
        }
    });

    tracing_subscriber::registry()
        .with(stdout_sub)
        .with(file_layer)
        .init();

    info!(
        service_name = %config.service_name,
        service_version = ?config.service_version,
        file_logging = config.file_logging_config.is_some(),
        "logging initialized"
    );
}
