//! stderr logger for the command-line tool.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Install an `env_logger` writing `[HH:MM:SS] LEVEL: message` lines, where
/// the clock is time since this call.
///
/// `verbosity` 0 logs warnings, 1 build and lookup progress, 2+ table
/// widths and sizing decisions. `RUST_LOG` still applies per module.
/// Calling it twice keeps the first logger.
pub fn init_logger(verbosity: u8) {
    let started = *STARTED.get_or_init(Instant::now);
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };

    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .format(move |buf, record| {
            let secs = started.elapsed().as_secs();
            writeln!(
                buf,
                "[{:02}:{:02}:{:02}] {}: {}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60,
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .try_init();
}
