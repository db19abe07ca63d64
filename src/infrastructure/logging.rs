//! Tracing setup
//!
//! Console output goes to stderr so stdout carries only command results.
//! A log directory that cannot be created costs the file output, not startup.

use crate::domain::settings::LogSettings;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Flushes the file writer on drop
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// `RUST_LOG` wins when set; otherwise the configured level if it names one
fn filter_directive(env: Option<&str>, configured: &str) -> String {
    if let Some(env) = env.map(str::trim).filter(|e| !e.is_empty()) {
        return env.to_string();
    }
    let level = configured.trim().to_lowercase();
    if LEVELS.contains(&level.as_str()) {
        level
    } else {
        "info".to_string()
    }
}

fn rotation(name: &str) -> Rotation {
    match name.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn file_writer(settings: &LogSettings) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    let dir = Path::new(&settings.log_dir);
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(rotation(&settings.rotation))
        .filename_prefix(&settings.file_name_prefix)
        .filename_suffix("log")
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(env.as_deref(), &settings.level);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let console = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(settings.ansi_colors)
            .with_target(settings.show_target)
            .with_thread_ids(settings.show_thread_ids)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
    });

    let (file, file_guard, file_error) = if settings.file_logging_enabled {
        match file_writer(settings) {
            Ok((writer, guard)) => {
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(settings.show_target)
                    .with_thread_ids(settings.show_thread_ids)
                    .with_file(settings.show_file_line)
                    .with_line_number(settings.show_file_line);
                (Some(layer), Some(guard), None)
            }
            Err(e) => (None, None, Some(e)),
        }
    } else {
        (None, None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    if let Some(e) = file_error {
        tracing::warn!("File logging disabled, {} unusable: {}", settings.log_dir, e);
    }
    tracing::debug!("Logging at '{}'", directive);

    Ok(LoggingGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_directive_overrides_configured_level() {
        assert_eq!(
            filter_directive(Some("led_controller=trace"), "warn"),
            "led_controller=trace"
        );
        // Blank RUST_LOG counts as unset
        assert_eq!(filter_directive(Some("  "), "warn"), "warn");
    }

    #[test]
    fn test_configured_level_is_normalized_or_replaced() {
        assert_eq!(filter_directive(None, " DEBUG "), "debug");
        assert_eq!(filter_directive(None, "verbose"), "info");
        assert_eq!(filter_directive(None, ""), "info");
    }

    #[test]
    fn test_unknown_rotation_is_daily() {
        assert_eq!(rotation("Hourly"), Rotation::HOURLY);
        assert_eq!(rotation("never"), Rotation::NEVER);
        assert_eq!(rotation("weekly"), Rotation::DAILY);
    }

    #[test]
    fn test_file_writer_creates_missing_directory() {
        let dir = std::env::temp_dir().join(format!("led_logs_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let settings = LogSettings {
            log_dir: dir.join("nested").to_string_lossy().into_owned(),
            ..LogSettings::default()
        };

        let writer = file_writer(&settings);
        assert!(writer.is_ok());
        assert!(dir.join("nested").is_dir());

        drop(writer);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_writer_fails_when_directory_is_a_file() {
        let path = std::env::temp_dir().join(format!("led_log_file_{}", std::process::id()));
        std::fs::write(&path, b"not a directory").unwrap();
        let settings = LogSettings {
            log_dir: path.to_string_lossy().into_owned(),
            ..LogSettings::default()
        };

        assert!(file_writer(&settings).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
