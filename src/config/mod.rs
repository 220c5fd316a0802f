//! Configuration module for the matchday application.
//!
//! Values are layered with figment: built-in defaults, then an optional
//! `matchday.toml`, then environment variables. Nested sections are addressed
//! with a double underscore, e.g. `QUEUE__JOBS_PER_MINUTE=9` or
//! `FRESHNESS__STANDINGS__STALE_AFTER=10m`.

use chrono_tz::Tz;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::time::Duration;

/// Optional configuration file, relative to the working directory.
pub const CONFIG_FILE: &str = "matchday.toml";

/// Main application configuration containing all sub-configurations
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// Log level for the application
    ///
    /// Used as the level for the `matchday` target unless `RUST_LOG` is set.
    /// Valid values: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the HTTP server
    #[serde(default = "default_port")]
    pub port: u16,
    /// PostgreSQL connection string. When absent, the cache and job queue
    /// live in-process and do not survive restarts.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Graceful shutdown timeout
    ///
    /// Accepts seconds as an integer or a duration string such as "30s" or "2m".
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
    /// Timezone used to decide which calendar date "today" is.
    #[serde(default = "default_timezone", deserialize_with = "deserialize_timezone")]
    pub timezone: Tz,
    /// Competition ids whose standings are refreshed ahead of demand.
    #[serde(default = "default_popular_competitions")]
    pub popular_competitions: Vec<u32>,
    /// Retry hint handed to callers while a cache miss is being fetched.
    #[serde(
        default = "default_pending_retry_after",
        deserialize_with = "deserialize_duration"
    )]
    pub pending_retry_after: Duration,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Per-resource-type freshness overrides, keyed by resource slug.
    #[serde(default)]
    pub freshness: HashMap<String, PolicyOverride>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub coalescer: CoalescerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration from the config file (if present) and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    pub fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw().split("__"))
    }
}

/// Connection settings for the third-party sports-data API.
#[derive(Deserialize, Clone, Debug)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: url::Url,
    /// API token sent as `X-Auth-Token`. Empty means anonymous access.
    #[serde(default)]
    pub token: String,
    #[serde(
        default = "default_upstream_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            token: String::new(),
            timeout: default_upstream_timeout(),
        }
    }
}

/// Partial override of a resource type's freshness policy.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct PolicyOverride {
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub stale_after: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub expire_after: Option<Duration>,
}

/// Background job queue consumer settings.
#[derive(Deserialize, Clone, Debug)]
pub struct QueueConfig {
    /// Maximum jobs started per rolling minute.
    #[serde(default = "default_jobs_per_minute")]
    pub jobs_per_minute: u32,
    /// How long the worker sleeps when no job is due.
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
    /// A single job taking longer than this is abandoned and failed.
    #[serde(
        default = "default_job_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub job_timeout: Duration,
    /// Times a job may be pushed back by upstream rate limiting before it is dropped.
    #[serde(default = "default_max_rate_limit_delays")]
    pub max_rate_limit_delays: u32,
    /// Delay applied to a rate-limited job when the upstream gave no hint.
    #[serde(
        default = "default_rate_limit_wait",
        deserialize_with = "deserialize_duration"
    )]
    pub default_rate_limit_wait: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            jobs_per_minute: default_jobs_per_minute(),
            poll_interval: default_poll_interval(),
            job_timeout: default_job_timeout(),
            max_rate_limit_delays: default_max_rate_limit_delays(),
            default_rate_limit_wait: default_rate_limit_wait(),
        }
    }
}

/// Admission control for direct pass-through calls.
#[derive(Deserialize, Clone, Debug)]
pub struct AdmissionConfig {
    /// Calls admitted per window before the cool-down kicks in.
    #[serde(default = "default_admission_threshold")]
    pub threshold: u32,
    /// Idle gap after which the count resets.
    #[serde(
        default = "default_admission_window",
        deserialize_with = "deserialize_duration"
    )]
    pub window: Duration,
    #[serde(
        default = "default_admission_cooldown",
        deserialize_with = "deserialize_duration"
    )]
    pub cooldown: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            threshold: default_admission_threshold(),
            window: default_admission_window(),
            cooldown: default_admission_cooldown(),
        }
    }
}

/// Retry policy of the fetch coalescer on upstream rate limits.
#[derive(Deserialize, Clone, Debug)]
pub struct CoalescerConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Added on top of every computed wait.
    #[serde(
        default = "default_safety_margin",
        deserialize_with = "deserialize_duration"
    )]
    pub safety_margin: Duration,
    /// Waits longer than this abort instead of sleeping.
    #[serde(
        default = "default_max_wait",
        deserialize_with = "deserialize_duration"
    )]
    pub max_wait: Duration,
    /// Per-attempt backoff used when the upstream gives no hint.
    #[serde(
        default = "default_base_backoff",
        deserialize_with = "deserialize_duration"
    )]
    pub base_backoff: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            safety_margin: default_safety_margin(),
            max_wait: default_max_wait(),
            base_backoff: default_base_backoff(),
        }
    }
}

/// Periods of the pre-warming triggers.
#[derive(Deserialize, Clone, Debug)]
pub struct SchedulerConfig {
    #[serde(
        default = "default_todays_matches_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub todays_matches_interval: Duration,
    #[serde(
        default = "default_standings_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub standings_interval: Duration,
    #[serde(
        default = "default_competitions_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub competitions_interval: Duration,
    #[serde(
        default = "default_purge_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub purge_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            todays_matches_interval: default_todays_matches_interval(),
            standings_interval: default_standings_interval(),
            competitions_interval: default_competitions_interval(),
            purge_interval: default_purge_interval(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_timezone() -> Tz {
    Tz::UTC
}

/// Premier League, Primera Division, Bundesliga, Serie A, Ligue 1, Champions League.
fn default_popular_competitions() -> Vec<u32> {
    vec![2021, 2014, 2002, 2019, 2015, 2001]
}

fn default_pending_retry_after() -> Duration {
    Duration::from_secs(5)
}

fn default_upstream_base_url() -> url::Url {
    url::Url::parse("https://api.football-data.org/v4/").expect("static base url is valid")
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_jobs_per_minute() -> u32 {
    9
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_rate_limit_delays() -> u32 {
    20
}

fn default_rate_limit_wait() -> Duration {
    Duration::from_secs(60)
}

fn default_admission_threshold() -> u32 {
    9
}

fn default_admission_window() -> Duration {
    Duration::from_secs(60)
}

fn default_admission_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_safety_margin() -> Duration {
    Duration::from_secs(5)
}

fn default_max_wait() -> Duration {
    Duration::from_secs(25)
}

fn default_base_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_todays_matches_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_standings_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_competitions_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_purge_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Raw duration as it may arrive from TOML or the environment.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Fractional(f64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, String> {
        match self {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Fractional(secs) => {
                Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration {secs}: {e}"))
            }
            RawDuration::Text(text) => parse_duration(&text),
        }
    }
}

/// Parse a duration string such as "90", "90s", "5m" or "1h".
///
/// Bare numbers are seconds.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let parsed = fundu::DurationParser::with_all_time_units()
        .parse(text)
        .map_err(|e| format!("invalid duration '{text}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{text}': {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    RawDuration::deserialize(deserializer)?
        .into_duration()
        .map_err(serde::de::Error::custom)
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawDuration>::deserialize(deserializer)?
        .map(RawDuration::into_duration)
        .transpose()
        .map_err(serde::de::Error::custom)
}

fn deserialize_timezone<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.parse::<Tz>()
        .map_err(|e| serde::de::Error::custom(format!("unknown timezone '{name}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn duration_strings_are_parsed() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn defaults_apply_without_any_input() {
        Jail::expect_with(|_| {
            let config: Config = Figment::new().extract()?;
            assert_eq!(config.port, 8080);
            assert!(config.database_url.is_none());
            assert_eq!(config.queue.jobs_per_minute, 9);
            assert_eq!(config.admission.threshold, 9);
            assert_eq!(config.coalescer.max_wait, Duration::from_secs(25));
            assert_eq!(config.pending_retry_after, Duration::from_secs(5));
            assert_eq!(config.timezone, Tz::UTC);
            Ok(())
        });
    }

    #[test]
    fn nested_environment_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("QUEUE__JOBS_PER_MINUTE", "4");
            jail.set_env("ADMISSION__COOLDOWN", "2m");
            jail.set_env("FRESHNESS__STANDINGS__STALE_AFTER", "10m");
            jail.set_env("TIMEZONE", "Europe/London");
            let config = Config::load()?;
            assert_eq!(config.queue.jobs_per_minute, 4);
            assert_eq!(config.admission.cooldown, Duration::from_secs(120));
            let standings = config.freshness.get("standings").expect("override present");
            assert_eq!(standings.stale_after, Some(Duration::from_secs(600)));
            assert_eq!(standings.expire_after, None);
            assert_eq!(config.timezone, chrono_tz::Europe::London);
            Ok(())
        });
    }

    #[test]
    fn config_file_is_layered_under_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                port = 9000
                popular_competitions = [2021]

                [coalescer]
                max_attempts = 5
                "#,
            )?;
            jail.set_env("PORT", "9100");
            let config = Config::load()?;
            assert_eq!(config.port, 9100);
            assert_eq!(config.popular_competitions, vec![2021]);
            assert_eq!(config.coalescer.max_attempts, 5);
            Ok(())
        });
    }
}
