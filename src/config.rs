use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroUsize,
    path::PathBuf,
    time::Duration,
};

use clap::{Args, Parser};

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_LISTEN_BACKLOG: u32 = 5;
pub const DEFAULT_MAX_PACKET_SIZE: NonZeroUsize = non_zero(8192);
pub const DEFAULT_BATCH_SIZE: NonZeroUsize = non_zero(100);

const fn non_zero(value: usize) -> NonZeroUsize {
    match NonZeroUsize::new(value) {
        Some(value) => value,
        None => panic!("value must not be zero"),
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Lottery server collecting bets from agencies", long_about = None)]
pub struct ServerArgs {
    /// Address the server listens on
    #[arg(long, env = "SERVER_IP", default_value = "0.0.0.0")]
    pub ip: IpAddr,

    /// Port the server listens on. Use 0 for an ephemeral port.
    #[arg(long, env = "SERVER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Connections the OS queues before the server accepts them
    #[arg(long, env = "SERVER_LISTEN_BACKLOG", default_value_t = DEFAULT_LISTEN_BACKLOG)]
    pub listen_backlog: u32,

    /// Biggest chunk, in bytes, written to an agency at once
    #[arg(long, env = "MAX_PACKET_SIZE", default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    pub max_packet_size: NonZeroUsize,

    /// Number of agencies served concurrently. Defaults to the available parallelism.
    #[arg(long, env = "WORKER_POOL_SIZE")]
    pub workers: Option<usize>,

    /// File every bet is persisted to
    #[arg(long, env = "BETS_STORAGE_PATH", default_value = "./bets.csv")]
    pub storage: PathBuf,

    /// Hold back the raffle until this many agencies finished submitting
    #[arg(long, env = "EXPECTED_AGENCIES")]
    pub expected_agencies: Option<NonZeroUsize>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the worker pool needs at least one worker")]
    InvalidPoolSize,
}

/// A validated server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub listen_backlog: u32,
    pub max_packet_size: NonZeroUsize,
    pub workers: usize,
    pub storage: PathBuf,
    pub expected_agencies: Option<NonZeroUsize>,
}

impl ServerConfig {
    pub fn new(addr: SocketAddr, storage: impl Into<PathBuf>) -> Self {
        Self {
            addr,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            workers: available_parallelism(),
            storage: storage.into(),
            expected_agencies: None,
        }
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

impl ServerArgs {
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let available = available_parallelism();
        let workers = match self.workers {
            Some(0) => return Err(ConfigError::InvalidPoolSize),
            Some(workers) if workers > available => {
                tracing::warn!(
                    "{} workers were requested, only {} can run in parallel",
                    workers,
                    available
                );
                available
            }
            Some(workers) => workers,
            None => available,
        };

        Ok(ServerConfig {
            addr: SocketAddr::new(self.ip, self.port),
            listen_backlog: self.listen_backlog,
            max_packet_size: self.max_packet_size,
            workers,
            storage: self.storage,
            expected_agencies: self.expected_agencies,
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Agency submitting its bets to the lottery server", long_about = None)]
pub struct AgencyArgs {
    /// Address of the lottery server
    #[arg(long, env = "SERVER_ADDRESS", default_value = "127.0.0.1:12345")]
    pub server: String,

    /// Id of the agency, from 1 to 255
    #[arg(long, env = "AGENCY_ID", value_parser = clap::value_parser!(u8).range(1..))]
    pub id: u8,

    /// File holding the agency's bets, one per line
    #[arg(long, env = "AGENCY_BETS_PATH")]
    pub bets: PathBuf,

    #[command(flatten)]
    pub submission: SubmissionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SubmissionArgs {
    /// Bets sent in a single batch
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: NonZeroUsize,

    /// Biggest chunk, in bytes, written to the server at once
    #[arg(long, env = "MAX_PACKET_SIZE", default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    pub max_packet_size: NonZeroUsize,

    /// Pause between two batches, in milliseconds
    #[arg(long = "batch-period-ms", env = "BATCH_PERIOD_MS", value_parser = parse_millis, default_value = "0")]
    pub batch_period: Duration,
}

fn parse_millis(raw: &str) -> Result<Duration, std::num::ParseIntError> {
    raw.parse().map(Duration::from_millis)
}
