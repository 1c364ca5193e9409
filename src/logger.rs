use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;
use std::path::Path;

const LOG_FILE: &str = "staging.log";

/// Initializes the global logger.
///
/// Call once at the start of `main`. The level comes from `RUST_LOG` (default `info`).
/// Logs go to stderr and to `<log_dir>/staging.log`; if the file cannot be opened only the
/// console is used.
pub fn init(log_dir: &Path) {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level_filter = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

    let base_config = Dispatch::new().level(log_level_filter).level_for("globset", LevelFilter::Warn);

    let console_config = Dispatch::new()
        .format(|out, message, record| {
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let log_file_path = log_dir.join(LOG_FILE);
    let file_config = fs::create_dir_all(log_dir).and_then(|_| fern::log_file(&log_file_path)).map(|file| {
        Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!("[{} {} {}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), record.level(), record.target(), message))
            })
            .chain(file)
    });

    let dispatch = match file_config {
        Ok(file_config) => base_config.chain(console_config).chain(file_config),
        Err(e) => {
            eprintln!("Failed to open log file '{}': {}", log_file_path.display(), e);
            base_config.chain(console_config)
        }
    };

    if let Err(e) = dispatch.apply() {
        eprintln!("Failed to apply logger configuration: {}", e);
        return;
    }

    log::debug!("Logger initialized. Logging to console and '{}'.", log_file_path.display());
}
