//! Configuration for the cache barrier.
//!
//! The defaults are part of the client's contract and rarely need changing.
//! Turn on the "cli" feature to read them from flags or the environment with
//! [`Config::new_from_flags`].

use std::time::Duration;

#[cfg(feature = "cli")]
use structopt::StructOpt;

const DEFAULT_POLL_INTERVAL_MS: u64 = 5;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 2000;

/// Shortest delay the barrier sleeps between two cache reads.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Timing of the post-write cache barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Delay between two cache reads. Values below [`MIN_POLL_INTERVAL`]
    /// are raised to it.
    pub poll_interval: Duration,
    /// How long to wait for the cache before giving up.
    pub poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        }
    }
}

impl Config {
    /// Parses all command line flags and sets the proper defaults. The version
    /// of your application should be passed to set the proper version for the CLI
    #[cfg(feature = "cli")]
    pub fn new_from_flags(version: &str) -> Self {
        let app = Opts::clap().version(version);
        Opts::from_clap(&app.get_matches()).into()
    }
}

/// CLI options that can be configured for the cache barrier
#[derive(StructOpt, Clone, Debug)]
#[cfg(feature = "cli")]
#[structopt(name = "kiosk", about = "Read-your-writes Kubernetes client")]
pub struct Opts {
    #[structopt(
        long = "cache-poll-interval-ms",
        default_value = "5",
        env = "KIOSK_CACHE_POLL_INTERVAL_MS",
        help = "Milliseconds between cache reads while waiting for a write to become visible"
    )]
    cache_poll_interval_ms: u64,

    #[structopt(
        long = "cache-poll-timeout-ms",
        default_value = "2000",
        env = "KIOSK_CACHE_POLL_TIMEOUT_MS",
        help = "Milliseconds to wait for a write to become visible in the cache"
    )]
    cache_poll_timeout_ms: u64,
}

#[cfg(feature = "cli")]
impl From<Opts> for Config {
    fn from(opts: Opts) -> Self {
        Config {
            poll_interval: Duration::from_millis(opts.cache_poll_interval_ms)
                .max(MIN_POLL_INTERVAL),
            poll_timeout: Duration::from_millis(opts.cache_poll_timeout_ms),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_5ms_and_2s() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.poll_timeout, Duration::from_secs(2));
    }

    #[cfg(feature = "cli")]
    #[test]
    fn flags_override_defaults() {
        let opts = Opts::from_iter(&["kiosk", "--cache-poll-timeout-ms", "500"]);
        let config: Config = opts.into();
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.poll_timeout, Duration::from_millis(500));
    }

    #[cfg(feature = "cli")]
    #[test]
    fn zero_interval_flag_is_raised() {
        let opts = Opts::from_iter(&["kiosk", "--cache-poll-interval-ms", "0"]);
        let config: Config = opts.into();
        assert_eq!(config.poll_interval, MIN_POLL_INTERVAL);
    }
}
