use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use derive_builder::Builder;
use getset::Getters;
use thiserror::Error;

use crate::providers::simulated_durable::SimulationOptions;

const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;
const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;
const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

/// Backend selected by [`crate::create_queue_provider`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    #[default]
    InMemory,
    SimulatedDurable,
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            ProviderKind::InMemory => "inmemory",
            ProviderKind::SimulatedDurable => "simulated-durable",
        };
        write!(f, "{display}")
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inmemory" | "in-memory" | "memory" => Ok(ProviderKind::InMemory),
            "fake-durable" | "simulated-durable" | "durable" => Ok(ProviderKind::SimulatedDurable),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Sliding window bound on raw enqueue volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::per_minute(DEFAULT_RATE_LIMIT_PER_MINUTE)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown queue provider '{0}'")]
    UnknownProvider(String),

    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings shared by every queue provider.
///
/// ```
/// use lease_queue::{QueueConfig, RateLimit};
/// use std::time::Duration;
///
/// let config = QueueConfig::builder()
///     .rate_limit(RateLimit::per_minute(120))
///     .lease_duration(Duration::from_secs(10))
///     .build();
///
/// assert_eq!(config.max_queue_size(), &Some(1000));
/// ```
#[derive(Getters, Debug, Clone, PartialEq, Builder)]
#[getset(get = "pub")]
#[builder(
    build_fn(private, name = "build_internal"),
    setter(strip_option),
    default,
    pattern = "owned"
)]
pub struct QueueConfig {
    /// Backend built by [`crate::create_queue_provider`]
    provider: ProviderKind,

    /// Enqueue volume limit, `None` disables it
    rate_limit: Option<RateLimit>,

    /// Maximum number of queued jobs, `None` disables the gate
    max_queue_size: Option<usize>,

    /// Maximum number of jobs tracked under one request id
    max_jobs_per_request: Option<usize>,

    /// How long a reservation stays valid without a heartbeat, `None` disables expiry
    lease_duration: Option<Duration>,

    /// Latency and failure injection of the simulated durable backend
    simulation: SimulationOptions,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            rate_limit: Some(RateLimit::default()),
            max_queue_size: Some(DEFAULT_MAX_QUEUE_SIZE),
            max_jobs_per_request: None,
            lease_duration: Some(DEFAULT_LEASE_DURATION),
            simulation: SimulationOptions::default(),
        }
    }
}

impl QueueConfig {
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// Reads the configuration from process environment variables.
    ///
    /// See [`QueueConfig::from_lookup`] for the recognised variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults.
    ///
    /// - `QUEUE_PROVIDER`: `inmemory` or `fake-durable` / `simulated-durable`
    /// - `RATE_LIMIT_PER_MINUTE`: enqueue limit per minute, `0` disables it
    /// - `RATE_LIMIT_PER_REQUEST`: jobs per request id
    /// - `QUEUE_MAX_SIZE`: queued jobs limit, `0` disables it
    /// - `QUEUE_LEASE_SECONDS`: lease duration, `0` disables expiry
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = QueueConfig::builder();

        if let Some(provider) = lookup("QUEUE_PROVIDER") {
            builder = builder.provider(provider.parse()?);
        }
        if let Some(per_minute) = parse_var::<u32>(&lookup, "RATE_LIMIT_PER_MINUTE")? {
            builder = match per_minute {
                0 => builder.disable_rate_limit(),
                n => builder.rate_limit(RateLimit::per_minute(n)),
            };
        }
        if let Some(per_request) = parse_var::<usize>(&lookup, "RATE_LIMIT_PER_REQUEST")? {
            if per_request == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "RATE_LIMIT_PER_REQUEST",
                    value: per_request.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            builder = builder.max_jobs_per_request(per_request);
        }
        if let Some(max_size) = parse_var::<usize>(&lookup, "QUEUE_MAX_SIZE")? {
            builder = match max_size {
                0 => builder.unbounded_queue(),
                n => builder.max_queue_size(n),
            };
        }
        if let Some(lease_secs) = parse_var::<u64>(&lookup, "QUEUE_LEASE_SECONDS")? {
            builder = match lease_secs {
                0 => builder.disable_lease_expiry(),
                n => builder.lease_duration(Duration::from_secs(n)),
            };
        }

        Ok(builder.build())
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            value,
            reason: e.to_string(),
        })
}

impl QueueConfigBuilder {
    pub fn disable_rate_limit(mut self) -> Self {
        self.rate_limit = Some(None);
        self
    }

    pub fn unbounded_queue(mut self) -> Self {
        self.max_queue_size = Some(None);
        self
    }

    pub fn disable_lease_expiry(mut self) -> Self {
        self.lease_duration = Some(None);
        self
    }

    pub fn build(self) -> QueueConfig {
        self.build_internal()
            .expect("Builder should not fail because every field has a default")
    }
}
