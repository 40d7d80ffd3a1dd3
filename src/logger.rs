//! Opt-in console logging for applications embedding the alignment engine.
//!
//! The engine itself never calls [`init_logger`]; it only emits [`log`]
//! records. Binaries and tests that want them on a terminal call this once.

use std::io::Write;
use std::time::Instant;

use log::info;
use once_cell::sync::Lazy;

/// Process-wide start instant, used to print elapsed-seconds timestamps.
pub static INIT_INSTANT: Lazy<Instant> = Lazy::new(Instant::now);

/// Seconds since [`INIT_INSTANT`] was first forced.
#[must_use]
pub fn uptime() -> u64 {
    INIT_INSTANT.elapsed().as_secs()
}

/// Initializes `env_logger` with a compact, leveled, colored format.
///
/// # Panics
/// This must only be called once per process.
pub fn init_logger(filter: log::LevelFilter) {
    let now = Lazy::force(&INIT_INSTANT);

    env_logger::Builder::new()
        .format(move |buf, record| {
            let mut style = buf.style();
            let level = match record.level() {
                log::Level::Debug => {
                    style.set_color(env_logger::fmt::Color::Blue);
                    "D"
                }
                log::Level::Trace => {
                    style.set_color(env_logger::fmt::Color::Magenta);
                    "T"
                }
                log::Level::Info => {
                    style.set_color(env_logger::fmt::Color::White);
                    "I"
                }
                log::Level::Warn => {
                    style.set_color(env_logger::fmt::Color::Yellow);
                    "W"
                }
                log::Level::Error => {
                    style.set_color(env_logger::fmt::Color::Red);
                    "E"
                }
            };
            writeln!(
                buf,
                "| {} | {: >9.3} | {: >24} @ {: <3} | {}",
                style.set_bold(true).value(level),
                buf.style()
                    .set_dimmed(true)
                    .value(now.elapsed().as_secs_f32()),
                buf.style()
                    .set_dimmed(true)
                    .value(record.file_static().unwrap_or("???")),
                buf.style()
                    .set_dimmed(true)
                    .value(record.line().unwrap_or(0)),
                record.args(),
            )
        })
        .filter_level(filter)
        .parse_default_env()
        .init();

    info!("audio-align logger initialized at level {filter}");
}
