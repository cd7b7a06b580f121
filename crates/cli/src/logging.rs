//! Global `tracing` subscriber installation.
//!
//! `Level` filters engine-emitted spans/events; `UserLevel` independently
//! filters events tagged with the `user` target, via its own filter layer
//! rather than folding it into the engine's.

use crate::config::LoggingConfig;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter, fmt, Registry};

/// Parse a `{Trace,Debug,Info,Warn,Error}` level name from config, falling
/// back to `Info` for anything unrecognized rather than failing startup.
fn parse_level(name: &str) -> Level {
    Level::from_str(name).unwrap_or(Level::INFO)
}

/// Install the global subscriber described by `config`. Safe to call once,
/// at process startup, before any other crate emits a `tracing` event.
pub fn init(config: &LoggingConfig) {
    fn make_writer(path: &Option<String>) -> BoxMakeWriter {
        match path {
            Some(path) if !path.is_empty() => {
                let path = path.clone();
                BoxMakeWriter::new(move || {
                    std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .unwrap_or_else(|_| panic!("failed to open log file {path}"))
                })
            }
            _ => BoxMakeWriter::new(std::io::stdout),
        }
    }

    let engine_level = parse_level(&config.level);
    let user_level = parse_level(&config.user_level);

    let engine_layer = fmt::layer()
        .with_writer(make_writer(&config.path))
        .with_filter(filter::Targets::new().with_default(engine_level).with_target("user", filter::LevelFilter::OFF));

    let user_layer = fmt::layer()
        .with_writer(make_writer(&config.path))
        .with_filter(filter::Targets::new().with_target("user", user_level).with_default(filter::LevelFilter::OFF));

    let subscriber = Registry::default().with(engine_layer).with(user_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("global tracing subscriber already installed, skipping");
    }
}
