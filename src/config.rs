//! Executor configuration.
//!
//! Each thread's [Executor](crate::task::Executor) carries a [Config] that is
//! installed with [Executor::configure](crate::task::Executor::configure).
//! Library code consults it instead of probing global feature flags.

/// Environment variable read by [Config::from_env].
pub const DEBUG_ENV: &str = "PLEDGE_DEBUG";

/// Per-thread settings of the promise runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    /// Report misuse loudly.
    ///
    /// When set, settling an already settled promise or sending progress
    /// after settlement returns an `Err` from the offending
    /// [Resolver](crate::promise::Resolver) call. When clear the call is
    /// ignored and only logged.
    pub debug: bool,
}

impl Config {
    /// A configuration with debug reporting enabled.
    pub fn debug() -> Self {
        Self { debug: true }
    }

    /// Build a configuration from the process environment.
    ///
    /// `PLEDGE_DEBUG` set to `1`, `true` or `yes` enables [Config::debug].
    pub fn from_env() -> Self {
        let debug = std::env::var(DEBUG_ENV)
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        Self { debug }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}
