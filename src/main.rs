use clap::error::ErrorKind;
use clap::Parser;
use h2delay::config::{Cli, ConfigError, RunConfig};
use h2delay::log::{EventLog, Tag};
use h2delay::shutdown::Shutdown;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status for configuration errors
const EXIT_INVALID_CONFIG: u8 = 5;

fn main() -> ExitCode {
    // Stdout carries the event log; diagnostics go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut log = EventLog::stdout();

    let config = match Cli::try_parse() {
        Ok(cli) => RunConfig::try_from(cli),
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            // Usage goes to stderr; the event log still gets its ERR line
            let _ = e.print();
            Err(ConfigError::Usage(
                e.kind().as_str().unwrap_or("invalid arguments").to_string(),
            ))
        }
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            log.emit(Tag::Err, "invalid_config", &[("msg", &e)]);
            log.emit(Tag::State, "exit", &[("code", &EXIT_INVALID_CONFIG)]);
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    let shutdown = Arc::new(Shutdown::new());
    let handle = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || handle.request()) {
        tracing::warn!(error = %e, "failed to install signal handler");
    }

    let code = h2delay::execute(&config, &mut log, &shutdown);
    ExitCode::from(u8::try_from(code).unwrap_or(EXIT_INVALID_CONFIG))
}
