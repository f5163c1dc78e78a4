use crate::config::{LogConfig, LogTarget};
use std::fs::{File, OpenOptions};
use std::io;
use std::sync::Arc;
use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "zipapi=debug,tower_http=info";

/// Installs the global subscriber: the full log (filtered by `RUST_LOG`)
/// goes to `config.debug`, and error events are copied to `config.error`.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    build_subscriber(config, filter)?.try_init()?;
    Ok(())
}

fn build_subscriber(
    config: &LogConfig,
    filter: EnvFilter,
) -> io::Result<impl Subscriber + Send + Sync + 'static> {
    let debug_layer = tracing_subscriber::fmt::layer()
        .with_writer(open_writer(&config.debug)?)
        .with_ansi(is_terminal(&config.debug))
        .with_filter(filter);

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(open_writer(&config.error)?)
        .with_ansi(is_terminal(&config.error))
        .with_filter(LevelFilter::ERROR);

    Ok(tracing_subscriber::registry()
        .with(debug_layer)
        .with(error_layer))
}

fn is_terminal(target: &LogTarget) -> bool {
    !matches!(target, LogTarget::File(_))
}

/// Opens a writer for a log destination. Files are appended to and
/// created with mode 0660 when missing.
pub fn open_writer(target: &LogTarget) -> io::Result<BoxMakeWriter> {
    match target {
        LogTarget::Stdout => Ok(BoxMakeWriter::new(io::stdout)),
        LogTarget::Stderr => Ok(BoxMakeWriter::new(io::stderr)),
        LogTarget::File(path) => {
            let mut options = OpenOptions::new();
            options.append(true).create(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o660);
            }
            let file = options.open(path).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("cannot open log file {}: {}", path.display(), e),
                )
            })?;
            Ok(BoxMakeWriter::new(Arc::<File>::new(file)))
        }
    }
}
