//! Run configuration
//!
//! [`Cli`] is the raw command line; [`RunConfig`] is the validated, immutable
//! parameter set a run works from. Conversion happens exactly once, through
//! `RunConfig::try_from(cli)`.

use clap::Parser;
use std::time::Duration;

/// Longest accepted value for any duration option (one year)
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Command line of the probe
#[derive(Debug, Clone, Parser)]
#[command(name = "h2delay", version)]
#[command(about = "HTTP/2 WINDOW_UPDATE delay probe", long_about = None)]
#[command(allow_negative_numbers = true)]
pub struct Cli {
    /// Domain used for TLS SNI and :authority
    #[arg(long)]
    pub host: String,

    /// Address to connect to instead of resolving --host
    #[arg(long)]
    pub ip: Option<String>,

    #[arg(long, default_value_t = 443)]
    pub port: u16,

    #[arg(long, default_value = "/")]
    pub path: String,

    /// Value of the range request header
    #[arg(long, default_value = "bytes=0-")]
    pub range: String,

    /// Seconds to withhold WINDOW_UPDATE once armed
    #[arg(long, default_value_t = 0.0)]
    pub delay: f64,

    /// Arm the delay once this many body bytes have arrived (0 = at the first chunk)
    #[arg(long, default_value_t = 0)]
    pub start_after_bytes: u64,

    /// Send a PING every N seconds (0 disables)
    #[arg(long, default_value_t = 0.0)]
    pub ping_interval: f64,

    #[arg(long, default_value_t = 10.0)]
    pub connect_timeout: f64,

    /// Socket timeout; no single wait for data lasts longer
    #[arg(long, default_value_t = 45.0)]
    pub read_timeout: f64,

    /// Stop after N seconds (0 = unbounded)
    #[arg(long, default_value_t = 0.0)]
    pub max_runtime: f64,

    /// Verify the server certificate chain and hostname
    #[arg(long)]
    pub verify_peer: bool,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--{name} must be a finite, non-negative number of seconds, got {value}")]
    InvalidDuration { name: &'static str, value: f64 },

    #[error("--{name} must be greater than zero")]
    ZeroTimeout { name: &'static str },

    #[error("--{name} must be at most {} seconds", MAX_DURATION.as_secs())]
    DurationTooLong { name: &'static str },

    #[error("--port must be between 1 and 65535")]
    InvalidPort,

    #[error("--path must start with '/', got {0:?}")]
    InvalidPath(String),

    #[error("--{name} contains control characters")]
    ControlCharacters { name: &'static str },

    #[error("--{name} must not be empty")]
    Empty { name: &'static str },

    /// Command line could not be parsed at all
    #[error("{0}")]
    Usage(String),
}

/// Validated parameters of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Identity host: SNI and `:authority`
    pub host: String,
    /// Address actually dialed, when different from `host`
    pub ip: Option<String>,
    pub port: u16,
    pub path: String,
    pub range: String,
    /// Zero never arms the delay
    pub delay: Duration,
    pub start_after_bytes: u64,
    pub ping_interval: Option<Duration>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_runtime: Option<Duration>,
    pub verify_peer: bool,
}

impl RunConfig {
    /// Defaults for `host`, matching the command line defaults
    pub fn new(host: impl Into<String>) -> Self {
        RunConfig {
            host: host.into(),
            ip: None,
            port: 443,
            path: "/".to_string(),
            range: "bytes=0-".to_string(),
            delay: Duration::ZERO,
            start_after_bytes: 0,
            ping_interval: None,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(45),
            max_runtime: None,
            verify_peer: false,
        }
    }

    /// Address to dial
    pub fn connect_addr(&self) -> &str {
        self.ip.as_deref().unwrap_or(&self.host)
    }

    /// URL as requested, for the log
    pub fn url(&self) -> String {
        format!("https://{}{}", self.host, self.path)
    }

    /// Check invariants that the types alone do not enforce
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Empty { name: "host" });
        }
        if self.ip.as_deref() == Some("") {
            return Err(ConfigError::Empty { name: "ip" });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.path.clone()));
        }

        let values = [
            ("host", Some(self.host.as_str())),
            ("ip", self.ip.as_deref()),
            ("path", Some(self.path.as_str())),
            ("range", Some(self.range.as_str())),
        ];
        for (name, value) in values {
            if value.map_or(false, |v| v.chars().any(char::is_control)) {
                return Err(ConfigError::ControlCharacters { name });
            }
        }

        let durations = [
            ("delay", Some(self.delay)),
            ("ping-interval", self.ping_interval),
            ("connect-timeout", Some(self.connect_timeout)),
            ("read-timeout", Some(self.read_timeout)),
            ("max-runtime", self.max_runtime),
        ];
        for (name, value) in durations {
            if value.map_or(false, |d| d > MAX_DURATION) {
                return Err(ConfigError::DurationTooLong { name });
            }
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout { name: "connect-timeout" });
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout { name: "read-timeout" });
        }

        Ok(())
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { name, value })
}

/// Zero disables the timer
fn optional_seconds(name: &'static str, value: f64) -> Result<Option<Duration>, ConfigError> {
    let duration = seconds(name, value)?;
    Ok((!duration.is_zero()).then_some(duration))
}

impl TryFrom<Cli> for RunConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let config = RunConfig {
            host: cli.host,
            ip: cli.ip,
            port: cli.port,
            path: cli.path,
            range: cli.range,
            delay: seconds("delay", cli.delay)?,
            start_after_bytes: cli.start_after_bytes,
            ping_interval: optional_seconds("ping-interval", cli.ping_interval)?,
            connect_timeout: seconds("connect-timeout", cli.connect_timeout)?,
            read_timeout: seconds("read-timeout", cli.read_timeout)?,
            max_runtime: optional_seconds("max-runtime", cli.max_runtime)?,
            verify_peer: cli.verify_peer,
        };
        config.validate()?;
        Ok(config)
    }
}
