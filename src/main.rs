use resilience::{config::Config, init_server, init_tracing};
use std::env;
use std::path::Path;
use std::process;
use tracing::info;

#[tokio::main]
async fn main() {
    // Initialize tracing
    init_tracing();

    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/resilience.yaml".to_string());

    // Load configuration, defaults when no file is present
    let config = if Path::new(&config_path).exists() {
        match Config::from_file(&config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from {}: {}", config_path, e);
                eprintln!("Usage: resilience [config_file]");
                process::exit(1);
            }
        }
    } else {
        info!(path = %config_path, "No configuration file found, using defaults");
        Config::default()
    };

    // Start the server
    if let Err(e) = init_server(config).await {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}
