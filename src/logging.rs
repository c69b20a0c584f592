//! Tracing initialization (spec §10.1).
//!
//! Same shape as the teacher's `run_server`/`run_supervisor_mode` setup in
//! `server/src/main.rs`: `RUST_LOG` wins outright if set, otherwise a level
//! derived from the CLI's `-v`/`-q` count is used.

use tracing_subscriber::EnvFilter;

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
/// Index into `LEVELS` with no `-v`/`-q` flags given.
const DEFAULT_LEVEL_INDEX: i8 = 2;

/// Resolve and install the global tracing subscriber.
///
/// `verbosity_delta` shifts the default level (`info`) up for positive
/// values (more `-v` than `-q`) and down for negative ones, clamped to the
/// `error..=trace` range. Ignored entirely when `RUST_LOG` is set.
pub fn init(verbosity_delta: i8) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(level_for(verbosity_delta)),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn level_for(verbosity_delta: i8) -> &'static str {
    let idx = (DEFAULT_LEVEL_INDEX + verbosity_delta).clamp(0, LEVELS.len() as i8 - 1);
    LEVELS[idx as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delta_is_info() {
        assert_eq!(level_for(0), "info");
    }

    #[test]
    fn positive_delta_raises_verbosity() {
        assert_eq!(level_for(1), "debug");
        assert_eq!(level_for(2), "trace");
    }

    #[test]
    fn negative_delta_lowers_verbosity() {
        assert_eq!(level_for(-1), "warn");
        assert_eq!(level_for(-2), "error");
    }

    #[test]
    fn delta_clamps_at_the_extremes() {
        assert_eq!(level_for(100), "trace");
        assert_eq!(level_for(-100), "error");
    }
}
