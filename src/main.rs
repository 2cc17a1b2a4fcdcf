use clap::Parser;
use tracing_subscriber::EnvFilter;

use kcube_runtime::config::{RuntimeOptions, TEARDOWN_GRACE};

fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init(); // installs the subscriber globally

    let options = RuntimeOptions::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start tokio runtime: {}", e);
            std::process::exit(1);
        }
    };
    let result = rt.block_on(kcube_runtime::runtime::run(options));
    // Dropping the runtime would wait on an abandoned init worker forever
    rt.shutdown_timeout(TEARDOWN_GRACE);

    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
