use std::{fs::read_to_string, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

/// Which playout-buffer strategy a configured session runs, mirrored from
/// [`rtp_session::core::PlayoutKind`] so it can be named from a config file.
#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum Playout {
    FixedDelay {
        #[serde(default = "Playout::default_delay_ms")]
        delay_ms: u64,
    },
    PtsBased {
        #[serde(default = "Playout::default_latency_ms")]
        latency_ms: u64,
    },
}

impl Playout {
    fn default_delay_ms() -> u64 {
        100
    }

    fn default_latency_ms() -> u64 {
        100
    }
}

impl Default for Playout {
    fn default() -> Self {
        Self::PtsBased {
            latency_ms: Self::default_latency_ms(),
        }
    }
}

/// Which sending scheduler a configured session runs, mirrored from
/// [`rtp_session::core::SchedulerKind`].
#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum Scheduler {
    Immediate,
    Paced { target_bps: f64 },
    AckWindow { mss: usize },
    NadaLike,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::Immediate
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Session {
    ///
    /// The UDP address this session's RTP/RTCP socket is bound to.
    ///
    pub listen: SocketAddr,
    ///
    /// The remote peer's address; RTP/RTCP are sent here and packets from
    /// any other source are ignored.
    ///
    pub remote: SocketAddr,
    ///
    /// Media clock rate in Hz.
    ///
    #[serde(default = "Session::clock_rate")]
    pub clock_rate: u32,
    ///
    /// Total session bandwidth budget in bits per second, used to size the
    /// RTCP 5% share.
    ///
    #[serde(default = "Session::bandwidth_bps")]
    pub bandwidth_bps: f64,
    #[serde(default)]
    pub playout: Playout,
    #[serde(default)]
    pub scheduler: Scheduler,
    ///
    /// Enables the MPRTP multipath layer with the named path-scheduling
    /// strategy when set.
    ///
    #[serde(default)]
    pub mprtp_scheduler: Option<String>,
    ///
    /// How long a member may go without activity before it times out.
    ///
    #[serde(default = "Session::member_timeout_secs")]
    pub member_timeout_secs: u64,
}

impl Session {
    fn clock_rate() -> u32 {
        90_000
    }

    fn bandwidth_bps() -> f64 {
        64_000.0
    }

    fn member_timeout_secs() -> u64 {
        30
    }

    pub fn member_timeout(&self) -> Duration {
        Duration::from_secs(self.member_timeout_secs)
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: rtp-sessiond --config /etc/rtp-sessiond/config.toml
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    pub fn load() -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(
            &Cli::parse().config,
        )?)?)
    }
}
