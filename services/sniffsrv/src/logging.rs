//! Logging setup for sniffsrv
//!
//! Console output always; an additional daily-rolling file when a log
//! directory is given. `RUST_LOG` overrides the command-line level.

use std::path::Path;

use anyhow::Context;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log file prefix inside the log directory
const LOG_FILE_PREFIX: &str = "sniffsrv.log";

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Library module an event came from, e.g. `detector` for
/// `voltage_sniffer::detector`
fn sniffer_component(target: &str) -> Option<&str> {
    target
        .strip_prefix("voltage_sniffer::")
        .map(|module| module.split("::").next().unwrap_or(module))
}

/// Event formatter producing `timestamp [LEVEL] message`, with a
/// `component:` tag for events raised inside the sniffer library
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        if let Some(component) = sniffer_component(event.metadata().target()) {
            write!(writer, "{}: ", component)?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter directive: `RUST_LOG` if set, otherwise `level` for our crates
fn filter_directive(level: &str, rust_log: Option<&str>) -> String {
    match rust_log {
        Some(env) if !env.trim().is_empty() => env.to_string(),
        _ => format!("info,sniffsrv={level},voltage_sniffer={level}"),
    }
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop and must live until
/// the service exits.
pub fn init(
    level: &str,
    log_dir: Option<&Path>,
    json_file: bool,
    ansi: bool,
) -> anyhow::Result<Option<WorkerGuard>> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = filter_directive(level, rust_log.as_deref());
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log level '{directive}'"))?;

    let console_layer = fmt::layer()
        .with_ansi(ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = if json_file {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_level(true)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_uses_level() {
        assert_eq!(
            filter_directive("debug", None),
            "info,sniffsrv=debug,voltage_sniffer=debug"
        );
    }

    #[test]
    fn test_filter_directive_rust_log_wins() {
        assert_eq!(
            filter_directive("debug", Some("warn,voltage_sniffer=trace")),
            "warn,voltage_sniffer=trace"
        );
        assert_eq!(
            filter_directive("warn", Some("  ")),
            "info,sniffsrv=warn,voltage_sniffer=warn"
        );
    }

    #[test]
    fn test_sniffer_component() {
        assert_eq!(sniffer_component("voltage_sniffer::detector"), Some("detector"));
        assert_eq!(sniffer_component("voltage_sniffer::sniffer::inner"), Some("sniffer"));
        assert_eq!(sniffer_component("voltage_sniffer"), None);
        assert_eq!(sniffer_component("sniffsrv::sensors"), None);
    }

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }
}
