//! Collector configuration (SPEC_FULL §7a, ambient).
//!
//! Grounded on `neptune/src/gc.rs`'s `Gc::new`, which reads `NEPTUNE_THREADS`
//! via `env::var(..).map_err(GcInitError::Env).and_then(|s|
//! s.parse().map_err(GcInitError::Parse))` against a hand-rolled
//! `GcInitError { Parse(ParseIntError), Env(VarError) }` enum. Same shape
//! here, applied to the collection-interval knob instead of a thread count.

use std::env;
use std::num::ParseIntError;

/// Default collection trigger: 8 MiB of cumulative allocation since the
/// last collection (SPEC_FULL §3 "collect_interval").
pub const DEFAULT_COLLECT_INTERVAL: usize = 8 * 1024 * 1024;

const COLLECT_INTERVAL_VAR: &str = "CELLMARK_COLLECT_INTERVAL";

#[derive(Debug)]
pub enum ConfigError {
    Env(env::VarError),
    Parse(ParseIntError),
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub collect_interval: usize,
}

impl Config {
    pub fn defaults() -> Self {
        Config {
            collect_interval: DEFAULT_COLLECT_INTERVAL,
        }
    }

    /// Read `CELLMARK_COLLECT_INTERVAL`, if present, overriding the default.
    /// A missing variable is not an error; a present-but-unparseable one is.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(COLLECT_INTERVAL_VAR) {
            Ok(raw) => {
                let collect_interval = raw.parse::<usize>().map_err(ConfigError::Parse)?;
                Ok(Config { collect_interval })
            }
            Err(env::VarError::NotPresent) => Ok(Config::defaults()),
            Err(e) => Err(ConfigError::Env(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        assert_eq!(Config::defaults().collect_interval, 8 * 1024 * 1024);
    }

    #[test]
    fn parse_error_surfaces_as_config_error() {
        let err = "not a number".parse::<usize>().unwrap_err();
        match ConfigError::Parse(err) {
            ConfigError::Parse(_) => {}
            _ => panic!("expected Parse variant"),
        }
    }

    #[test]
    fn from_env_overrides_and_rejects_garbage() {
        env::remove_var(COLLECT_INTERVAL_VAR);
        assert_eq!(Config::from_env().unwrap().collect_interval, DEFAULT_COLLECT_INTERVAL);

        env::set_var(COLLECT_INTERVAL_VAR, "4096");
        assert_eq!(Config::from_env().unwrap().collect_interval, 4096);

        env::set_var(COLLECT_INTERVAL_VAR, "not-a-number");
        assert!(matches!(Config::from_env(), Err(ConfigError::Parse(_))));

        env::remove_var(COLLECT_INTERVAL_VAR);
    }
}
