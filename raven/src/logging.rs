//! Structured logging setup (§4.13 ambient stack).
//!
//! `tracing` + `tracing-subscriber`, matching the
//! `tracing_subscriber::fmt()` setup in `swarm-agents/src/main.rs`.
//! `RAVEN_LOG_FORMAT=json` swaps the formatter; `RAVEN_DEBUG=1` forces
//! `debug`; `--quiet`/`--verbose` are CLI flags and so win over both per
//! the standard precedence rule.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool, quiet: bool) {
    let default_level = if std::env::var("RAVEN_DEBUG").as_deref() == Ok("1") {
        "debug"
    } else {
        "info"
    };
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        default_level
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if std::env::var("RAVEN_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
