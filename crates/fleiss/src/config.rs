use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_CONCURRENCY: i64 = 10;
pub const DEFAULT_WAIT_TIME_SECS: f64 = 1.0;
pub const DEFAULT_CLAIM_RETRIES: u32 = 5;
pub const MAX_QUEUE_NAME_LEN: usize = 50;
pub const MAX_OWNER_LEN: usize = 100;
/// Upper bound for `wait_time` and the reap interval.
pub const MAX_INTERVAL_SECS: u64 = 86_400;
pub const MAX_LEASE_SECS: i64 = 365 * 86_400;

/// Runtime configuration for a worker process, loaded from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: Option<String>,
    pub logfile: Option<PathBuf>,
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub pool: PoolSettings,
}

/// Everything the worker pool needs. Immutable once the pool starts.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolSettings {
    pub worker_id: String,
    pub queues: Vec<String>,
    pub concurrency: usize,
    pub wait_time: Duration,
    /// When set, a successful claim stamps `expires_at = now + lease`.
    pub lease: Option<Duration>,
    pub reap_interval: Duration,
    /// Race losses tolerated per poll before the loop goes idle.
    pub claim_retries: u32,
}

impl PoolSettings {
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let wait_time = Duration::from_secs_f64(DEFAULT_WAIT_TIME_SECS);
        Self {
            worker_id: "worker-1".to_string(),
            queues: queues.into_iter().map(Into::into).collect(),
            concurrency: DEFAULT_CONCURRENCY as usize,
            wait_time,
            lease: None,
            reap_interval: default_reap_interval(wait_time),
            claim_retries: DEFAULT_CLAIM_RETRIES,
        }
    }

    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn wait_time(mut self, dur: Duration) -> Self {
        self.wait_time = dur;
        self
    }

    pub fn lease(mut self, dur: Duration) -> Self {
        self.lease = Some(dur);
        self
    }

    pub fn reap_interval(mut self, dur: Duration) -> Self {
        self.reap_interval = dur;
        self
    }

    pub fn claim_retries(mut self, n: u32) -> Self {
        self.claim_retries = n;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }
        for q in &self.queues {
            validate_queue_name(q)?;
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(0));
        }
        if !within_interval_bound(self.wait_time) {
            return Err(ConfigError::InvalidWaitTime(self.wait_time.as_secs_f64()));
        }
        if !within_interval_bound(self.reap_interval) {
            return Err(ConfigError::InvalidReapInterval(
                self.reap_interval.as_secs_f64(),
            ));
        }
        if let Some(lease) = self.lease {
            let secs = i64::try_from(lease.as_secs()).unwrap_or(i64::MAX);
            if lease.is_zero() || secs > MAX_LEASE_SECS {
                return Err(ConfigError::InvalidLease(secs));
            }
        }
        if self.claim_retries == 0 {
            return Err(ConfigError::InvalidClaimRetries);
        }
        Ok(())
    }
}

pub fn validate_queue_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() || name.chars().count() > MAX_QUEUE_NAME_LEN {
        return Err(ConfigError::InvalidQueueName(name.to_string()));
    }
    Ok(())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self::from_lookup(|key| std::env::var(key).ok())?)
    }

    /// Builds a config from any key/value source. `from_env` is this over `std::env`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());
        let get_or = |primary: &str, fallback: &str| get(primary).or_else(|| get(fallback));

        let database_url = get("DATABASE_URL");

        let worker_id = get_or("FLEISS_WORKER_ID", "WORKER_ID")
            .or_else(|| get("HOSTNAME"))
            .unwrap_or_else(|| "worker-1".to_string());

        let queues: Vec<String> = match get_or("FLEISS_QUEUES", "QUEUES") {
            Some(raw) => raw.split(',').map(|q| q.trim().to_string()).collect(),
            None => vec![DEFAULT_QUEUE.to_string()],
        };

        let concurrency = match get_or("FLEISS_CONCURRENCY", "CONCURRENCY") {
            Some(raw) => parse::<i64>("FLEISS_CONCURRENCY", &raw)?,
            None => DEFAULT_CONCURRENCY,
        };
        if concurrency <= 0 {
            return Err(ConfigError::InvalidConcurrency(concurrency));
        }

        let wait_time = match get_or("FLEISS_WAIT_TIME", "WAIT_TIME") {
            Some(raw) => parse::<f64>("FLEISS_WAIT_TIME", &raw)?,
            None => DEFAULT_WAIT_TIME_SECS,
        };
        let wait_time = positive_secs(wait_time).ok_or(ConfigError::InvalidWaitTime(wait_time))?;

        let lease = match get_or("FLEISS_LEASE_SECONDS", "LEASE_SECONDS") {
            Some(raw) => {
                let secs = parse::<i64>("FLEISS_LEASE_SECONDS", &raw)?;
                if secs <= 0 || secs > MAX_LEASE_SECS {
                    return Err(ConfigError::InvalidLease(secs));
                }
                Some(Duration::from_secs(secs as u64))
            }
            None => None,
        };

        let reap_interval = match get("FLEISS_REAP_INTERVAL_SECS") {
            Some(raw) => {
                let secs = parse::<f64>("FLEISS_REAP_INTERVAL_SECS", &raw)?;
                positive_secs(secs).ok_or(ConfigError::InvalidReapInterval(secs))?
            }
            None => default_reap_interval(wait_time),
        };

        let claim_retries = match get("FLEISS_CLAIM_RETRIES") {
            Some(raw) => parse::<u32>("FLEISS_CLAIM_RETRIES", &raw)?,
            None => DEFAULT_CLAIM_RETRIES,
        };

        let logfile = get_or("FLEISS_LOGFILE", "LOGFILE").map(PathBuf::from);

        let admin_addr =
            get_or("FLEISS_ADMIN_ADDR", "ADMIN_ADDR").and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = get("FLEISS_MIGRATE_ON_STARTUP")
            .map(|v| env_bool(&v))
            .unwrap_or(false);

        let pool = PoolSettings {
            worker_id,
            queues,
            concurrency: concurrency as usize,
            wait_time,
            lease,
            reap_interval,
            claim_retries,
        };
        pool.validate()?;

        Ok(Self {
            database_url,
            logfile,
            admin_addr,
            migrate_on_startup,
            pool,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or(ConfigError::Missing {
            key: "DATABASE_URL",
        })
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Malformed {
        key,
        value: raw.to_string(),
    })
}

fn positive_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 && secs <= MAX_INTERVAL_SECS as f64 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

fn within_interval_bound(dur: Duration) -> bool {
    !dur.is_zero() && dur <= Duration::from_secs(MAX_INTERVAL_SECS)
}

/// Five polls' worth, capped at the interval bound.
fn default_reap_interval(wait_time: Duration) -> Duration {
    wait_time
        .checked_mul(5)
        .unwrap_or(Duration::MAX)
        .min(Duration::from_secs(MAX_INTERVAL_SECS))
}

fn env_bool(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
