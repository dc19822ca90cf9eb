//! Picks a logging backend based on `AppConfig::log_to`: `"stdout"` goes
//! through `env_logger` (the teacher's own dev-time convention, promoted to
//! a real startup dependency here), anything else is treated as a directory
//! and gets a `log4rs` rolling file appender — the same rotate-by-size
//! policy the original's `lumberjack` writer provided.

use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

const ROTATE_SIZE_BYTES: u64 = 64 * 1024 * 1024;
const MAX_ROTATED_FILES: u32 = 8;

pub fn init(log_to: &str) -> std::io::Result<()> {
    if log_to == "stdout" {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
        return Ok(());
    }

    std::fs::create_dir_all(log_to)?;
    let base = format!("{log_to}/mqueued.log");
    let rolled_pattern = format!("{log_to}/mqueued.{{}}.log");

    let trigger = SizeTrigger::new(ROTATE_SIZE_BYTES);
    let roller = FixedWindowRoller::builder()
        .build(&rolled_pattern, MAX_ROTATED_FILES)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} {t} - {m}{n}")))
        .build(&base, Box::new(policy))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(appender)))
        .build(Root::builder().appender("file").build(log::LevelFilter::Info))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    log4rs::init_config(config).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    Ok(())
}
