//! Console log sink.
//!
//! Lines carry a timestamp, the level, and the file and line they were
//! logged from. Large blobs (IR text) go to [`RAW_TARGET`] at info level and
//! are written as-is, without that prefix.

use tracing::Level;
use tracing_subscriber::filter::{filter_fn, LevelFilter};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

use crate::config::LogConfig;
use crate::error::{Error, Result};

pub const RAW_TARGET: &str = "rt_pipeline::raw";

pub fn parse_level(level: &str) -> Result<Level> {
    level
        .trim()
        .parse::<Level>()
        .map_err(|_| Error::Config(format!("unknown log level '{level}'")))
}

/// Installs the global subscriber. A second call keeps the first subscriber.
pub fn init(config: &LogConfig) -> Result<()> {
    let level = parse_level(&config.level)?;
    let _ = subscriber(level, std::io::stdout).try_init();
    Ok(())
}

/// Prefixed lines for every target except [`RAW_TARGET`], bare text for it.
fn subscriber<W>(level: Level, writer: W) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Clone + Send + Sync + 'static,
{
    let prefixed = tracing_subscriber::fmt::layer()
        .with_writer(writer.clone())
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_filter(filter_fn(|meta| meta.target() != RAW_TARGET));
    let bare = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_filter(filter_fn(|meta| meta.target() == RAW_TARGET));
    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(prefixed)
        .with(bare)
}

/// Dumps `text` at info level with no prefix.
pub fn raw(text: &str) {
    tracing::info!(target: RAW_TARGET, "{text}");
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert_eq!(parse_level(" error ").unwrap(), Level::ERROR);
        assert!(matches!(parse_level("chatty"), Err(Error::Config(_))));
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = LogConfig::default();
        init(&config).unwrap();
        init(&config).unwrap();
    }

    #[test]
    fn raw_text_is_written_bare_at_info() {
        let text = capture::logged(Level::INFO, || {
            tracing::info!("prefixed line");
            raw(".visible .entry generatePrimaryRay()");
        });
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2, "{text}");
        assert!(lines[0].contains("INFO"), "{text}");
        assert!(lines[0].contains("logging.rs"), "{text}");
        assert!(lines[0].contains("prefixed line"), "{text}");
        assert_eq!(lines[1], ".visible .entry generatePrimaryRay()");
    }

    #[test]
    fn level_filter_applies_to_raw_text() {
        let text = capture::logged(Level::WARN, || raw("IR"));
        assert!(text.is_empty(), "{text}");
    }
}
