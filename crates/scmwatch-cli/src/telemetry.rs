//! Tracing setup for the `scmwatch` binary.
//!
//! Filter directives come from `SCMWATCH_LOG`, then `RUST_LOG`. Without
//! either, the scmwatch crates log at the level picked on the command line
//! and everything else (tokio, the process plumbing) only at `warn`.
//! Events always go to stderr; stdout carries the command's output.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

pub const LOG_ENV: &str = "SCMWATCH_LOG";

const SCMWATCH_TARGETS: [&str; 3] = ["scmwatch_core", "scmwatch_backends", "scmwatch_cli"];

/// Directives used when neither `SCMWATCH_LOG` nor `RUST_LOG` is set.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(SCMWATCH_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber; later calls are no-ops.
///
/// Targets are printed from `debug` upwards, where it matters whether an
/// event came from a connector or the shared runner.
pub fn init_tracing(json: bool, level: Level) {
    let show_targets = level >= Level::DEBUG;
    let output: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .json()
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(show_targets)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(env_filter(level))
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_level_to_scmwatch() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,scmwatch_core=debug,scmwatch_backends=debug,scmwatch_cli=debug"
        );
        assert!(EnvFilter::try_new(default_directives(Level::TRACE)).is_ok());
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
        tracing::info!(backend = "svn", "still logging");
    }
}
