use std::sync::Arc;

use mqueued::{AppConfig, QueueRegistry, RegistryDefaults};

fn parse_config_path(mut args: impl Iterator<Item = String>) -> String {
    args.next();
    while let Some(arg) = args.next() {
        if arg == "-c" {
            if let Some(path) = args.next() {
                return path;
            }
        }
    }
    "config.yml".to_string()
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config_path = parse_config_path(std::env::args());
    let config = AppConfig::from_file(std::path::Path::new(&config_path))
        .unwrap_or_else(|e| panic!("failed to read config {config_path}: {e}"));

    mqueued::logging::init(&config.log_to)?;

    let registry = Arc::new(QueueRegistry::new(RegistryDefaults {
        data_dir: config.data_dir.clone(),
        file_block_unit: config.file_block_unit_bytes(),
        cache_size: config.cache_size_bytes(),
    }));

    std::fs::create_dir_all(&config.data_dir)?;
    registry.load().map_err(|e| {
        log::error!("failed to load existing queues: {e}");
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    mqueued::server::run(&config.host_port, registry).await
}
