use chrono::Utc;
use std::io;
use std::path::Path;

/// Route `log` records to stderr and, when it can be opened, `log_path`.
pub fn setup_logging(log_path: &Path, dev_mode: bool) {
    let level = if dev_mode {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let base = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {}: {}",
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stderr());

    let dispatch = if let Ok(log_file) = fern::log_file(log_path) {
        base.chain(log_file)
    } else {
        eprintln!(
            "Warning: could not open log file {:?}, logging to stderr only",
            log_path
        );
        base
    };

    if let Err(e) = dispatch.apply() {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }
}

/// Platform call failures are only surfaced while developing.
pub fn log_runtime_error(dev_mode: bool, context: &str, err: &dyn std::fmt::Display) {
    if dev_mode {
        log::warn!("Last seen error ({}): {}", context, err);
    }
}
