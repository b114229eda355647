//! Configuration
//!
//! Command line parsing and its resolution into a `SyncConfig`. The data
//! location decides the role: `file:` leads a simulation loaded from a save
//! file, `mirror://` follows a remote lead.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::network::link::Endpoint;
use crate::{DEFAULT_LEAD_SERVER_PORT, FRAME_RATE, TIME_BETWEEN_NETWORK_UPDATES};

/// Directory relative save-file paths are resolved against.
pub const SAVES_DIR: &str = "data/saves";

/// Command line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "flight-sync-server", version, about = "Lead/mirror simulation sync server")]
pub struct Cli {
    /// `file:path/to/save.json` to lead a simulation, or
    /// `mirror://host[:port]` to follow a lead server
    #[arg(default_value = "file:OCESS.json")]
    pub data_location: String,

    /// Port the lead serves its state on (lead only)
    #[arg(long, value_name = "PORT")]
    pub serve_on_port: Option<u16>,

    /// Run without a renderer
    #[arg(long)]
    pub headless: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    pub verbose: bool,

    /// Frames per second of the tick loop
    #[arg(long, default_value_t = FRAME_RATE)]
    pub frame_rate: u32,

    /// Minimum milliseconds between two mirror fetches
    #[arg(long, default_value_t = TIME_BETWEEN_NETWORK_UPDATES.as_millis() as u64)]
    pub fetch_interval_ms: u64,

    /// Mirror connect/read timeout in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub connect_timeout_ms: u64,

    /// Worker threads serving peers
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Stop cleanly after this many ticks
    #[arg(long)]
    pub max_ticks: Option<u64>,

    /// Message definition the wire types are generated from
    #[arg(long, requires = "schema_artifact")]
    pub schema_source: Option<PathBuf>,

    /// Generated artifact checked against `--schema-source`
    #[arg(long, requires = "schema_source")]
    pub schema_artifact: Option<PathBuf>,
}

impl Cli {
    /// Default log filter when `RUST_LOG` is unset.
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Data location could not be understood.
    #[error("invalid data location '{location}': {reason}")]
    InvalidLocation {
        /// The rejected location.
        location: String,
        /// What is wrong with it.
        reason: String,
    },

    /// `--serve-on-port` given for a mirror.
    #[error("--serve-on-port only applies to a lead (file:) data location")]
    PortForMirror,

    /// Frame rate of zero.
    #[error("frame rate must be at least 1")]
    InvalidFrameRate,

    /// Worker pool of zero.
    #[error("at least one worker thread is required")]
    NoWorkers,

    /// Connect timeout of zero.
    #[error("connect timeout must be at least 1 ms")]
    InvalidConnectTimeout,
}

// =============================================================================
// DATA LOCATION
// =============================================================================

/// Parsed data location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLocation {
    /// Save file to lead from.
    File(PathBuf),
    /// Lead to follow.
    Mirror(Endpoint),
}

impl FromStr for DataLocation {
    type Err = ConfigError;

    fn from_str(location: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidLocation {
            location: location.to_string(),
            reason: reason.to_string(),
        };

        if let Some(rest) = location.strip_prefix("mirror://") {
            return parse_endpoint(rest).map(DataLocation::Mirror).map_err(invalid);
        }

        if let Some(rest) = location.strip_prefix("file:") {
            let path = match rest.strip_prefix("//") {
                // `file:///abs/path` has an empty authority; anything else names a host.
                Some(after) if after.starts_with('/') => after,
                Some(_) => return Err(invalid("file locations cannot name a host")),
                None => rest,
            };
            if path.is_empty() {
                return Err(invalid("missing save file path"));
            }
            if path.contains(['?', '#']) {
                return Err(invalid("file locations take no query or fragment"));
            }
            return Ok(DataLocation::File(resolve_save_path(Path::new(path))));
        }

        Err(invalid("expected a file: or mirror:// location"))
    }
}

/// Resolve relative save paths against `SAVES_DIR`.
pub fn resolve_save_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(SAVES_DIR).join(path)
    }
}

fn parse_endpoint(authority: &str) -> Result<Endpoint, &'static str> {
    if authority.contains(['/', '?', '#']) {
        return Err("mirror locations take only host[:port]");
    }

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']').ok_or("unterminated IPv6 address")?;
        match rest {
            "" => (host, None),
            _ => match rest.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err("unexpected text after IPv6 address"),
            },
        }
    } else {
        match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err("missing host");
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| "port must be a number from 0 to 65535")?,
        None => DEFAULT_LEAD_SERVER_PORT,
    };
    Ok(Endpoint::new(host, port))
}

// =============================================================================
// RESOLVED CONFIGURATION
// =============================================================================

/// What this process is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Load `save` and serve it on `port`.
    Lead {
        /// Save file.
        save: PathBuf,
        /// Port to serve on.
        port: u16,
    },
    /// Follow the lead at `endpoint`.
    Mirror {
        /// Lead endpoint.
        endpoint: Endpoint,
    },
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Lead or mirror.
    pub role: Role,
    /// No renderer attached.
    pub headless: bool,
    /// Debug logging.
    pub verbose: bool,
    /// Tick loop frame rate.
    pub frame_rate: u32,
    /// Minimum time between mirror fetches.
    pub fetch_interval: Duration,
    /// Mirror connect/read timeout.
    pub connect_timeout: Duration,
    /// Peer-serving worker threads.
    pub workers: usize,
    /// Optional clean-completion budget.
    pub max_ticks: Option<u64>,
    /// Schema source and generated artifact, for the stale-artifact hint.
    pub schema: Option<(PathBuf, PathBuf)>,
}

impl SyncConfig {
    /// Validate parsed arguments.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let role = match cli.data_location.parse::<DataLocation>()? {
            DataLocation::File(save) => Role::Lead {
                save,
                port: cli.serve_on_port.unwrap_or(DEFAULT_LEAD_SERVER_PORT),
            },
            DataLocation::Mirror(endpoint) => {
                if cli.serve_on_port.is_some() {
                    return Err(ConfigError::PortForMirror);
                }
                Role::Mirror { endpoint }
            }
        };

        if cli.frame_rate == 0 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if cli.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if cli.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConnectTimeout);
        }

        Ok(Self {
            role,
            headless: cli.headless,
            verbose: cli.verbose,
            frame_rate: cli.frame_rate,
            fetch_interval: Duration::from_millis(cli.fetch_interval_ms),
            connect_timeout: Duration::from_millis(cli.connect_timeout_ms),
            workers: cli.workers,
            max_ticks: cli.max_ticks,
            schema: cli.schema_source.zip(cli.schema_artifact),
        })
    }
}
