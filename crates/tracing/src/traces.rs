use std::env;
use std::io::IsTerminal;

use tfplugin_core::logging::Level;
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{DefaultFields, Format, Full, Writer};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::hclog::HclogFormat;

/// How events are rendered on stderr
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, parsed and re-emitted by the host
    #[default]
    Hclog,
    /// Human readable text, for running the plugin outside of a host
    Plain,
}

/// A struct that allows us to dynamically choose the output format without using dynamic
/// dispatch
enum HclogOrPlain {
    Hclog(HclogFormat),
    Plain(Format<Full, SystemTime>),
}

impl<S, N> FormatEvent<S, N> for HclogOrPlain
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        match self {
            HclogOrPlain::Hclog(f) => f.format_event(ctx, writer, event),
            HclogOrPlain::Plain(f) => f.format_event(ctx, writer, event),
        }
    }
}

/// This guard prevents early `drop()`ing of the non-blocking stderr writer. Events logged after
/// it is dropped are lost.
pub struct FlushGuard {
    _stderr: tracing_appender::non_blocking::WorkerGuard,
}

/// Configures a tracing subscriber, which includes:
/// - A level filter, which forms the base and applies to all other layers
/// - A stderr logging layer, in either hclog JSON or plain text
///
/// Stdout is never written to, it belongs to the plugin handshake.
///
/// # Errors
///
/// Returns an error if the `RUST_LOG` override cannot be parsed
pub fn configure_tracing(
    module: &str,
    format: LogFormat,
    log_level_override: Option<&Level>,
) -> anyhow::Result<(tracing::Dispatch, FlushGuard)> {
    let filter = get_log_level_filter(log_level_override)?;
    let reg = tracing_subscriber::Registry::default().with(filter);

    let stderr = std::io::stderr();
    // the host never renders colors, only enable them when a person is watching
    let ansi = format == LogFormat::Plain && stderr.is_terminal();
    let (stderr, stderr_guard) = tracing_appender::non_blocking(stderr);
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(stderr)
        .with_ansi(ansi);

    let event_format = match format {
        LogFormat::Hclog => HclogOrPlain::Hclog(HclogFormat::new(module)),
        LogFormat::Plain => HclogOrPlain::Plain(Format::default()),
    };
    let dispatch = reg
        .with(
            fmt.event_format(event_format)
                .fmt_fields(DefaultFields::new()),
        )
        .into();

    Ok((
        dispatch,
        FlushGuard {
            _stderr: stderr_guard,
        },
    ))
}

fn get_log_level_filter(log_level_override: Option<&Level>) -> anyhow::Result<EnvFilter> {
    let level = log_level_override.map_or(LevelFilter::OFF, level_to_filter);
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .parse("")?;
    if level != LevelFilter::OFF {
        // transport internals are far too chatty at debug and trace
        for directive in ["h2=info", "hyper=info", "hyper_util=info", "tower=info"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }

    // Allow RUST_LOG to override the other directives
    if let Ok(rust_log) = env::var("RUST_LOG") {
        match rust_log
            .split(',')
            .filter(|d| !d.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(directives) => {
                for directive in directives {
                    filter = filter.add_directive(directive);
                }
            }
            Err(err) => {
                eprintln!("ERROR: Ignoring invalid RUST_LOG directive: {err}");
            }
        }
    }

    Ok(filter)
}

fn level_to_filter(level: &Level) -> LevelFilter {
    match level {
        Level::Error => LevelFilter::ERROR,
        Level::Warn => LevelFilter::WARN,
        Level::Info => LevelFilter::INFO,
        Level::Debug => LevelFilter::DEBUG,
        Level::Trace => LevelFilter::TRACE,
        Level::Off => LevelFilter::OFF,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_levels_map_to_filters() {
        assert_eq!(level_to_filter(&Level::Trace), LevelFilter::TRACE);
        assert_eq!(level_to_filter(&Level::Off), LevelFilter::OFF);
    }

    #[test]
    fn missing_level_disables_logging() {
        if env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = get_log_level_filter(None).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::OFF));
    }
}
