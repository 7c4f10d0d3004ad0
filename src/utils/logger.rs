use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

pub fn setup_logging() {
    Builder::from_default_env()
        .target(Target::Stdout)
        .filter_level(LevelFilter::Info)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
