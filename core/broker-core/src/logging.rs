//! Tracing subscriber setup for hosts embedding the broker.
//!
//! `BROKER_DEBUG_LOG=1` forces debug output; otherwise `RUST_LOG` is honored,
//! falling back to the configured level. With a log directory configured,
//! output goes to a daily rolling file instead of stderr.

use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

const DEBUG_ENV: &str = "BROKER_DEBUG_LOG";

fn debug_forced() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn filter(config: &LogConfig) -> EnvFilter {
    if debug_forced() {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| EnvFilter::try_new(&config.level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Installs the global subscriber. Safe to call more than once: later calls
/// leave the first subscriber in place.
///
/// Keep the returned guard alive for as long as file logging should flush.
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    if let Some(dir) = &config.dir {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("broker")
            .filename_suffix("log")
            .build(dir);
        match appender {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let installed = tracing_subscriber::fmt()
                    .with_env_filter(filter(config))
                    .with_writer(writer)
                    .with_ansi(false)
                    .try_init()
                    .is_ok();
                return installed.then_some(guard);
            }
            Err(err) => {
                eprintln!("broker: cannot log to {}: {err}", dir.display());
            }
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_writer(std::io::stderr)
        .try_init();
    None
}
