//! Example reading flags from a mounted directory, one file per flag.
//!
//! This example shows how to:
//! - Serve flags from a directory such as a mounted ConfigMap
//! - Pick up file writes without restarting
//!
//! Run with: cargo run --example directory_watch [DIR]
//!
//! Without DIR a temporary directory is created. While running, try:
//!   echo 32 > DIR/max_batch

use hotswap_flags::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hotswap_flags=info".into()),
        )
        .init();

    println!("=== Directory Watch Example ===\n");

    let dir = match std::env::args().nth(1) {
        Some(dir) => PathBuf::from(dir),
        None => {
            let dir = std::env::temp_dir().join("hotswap-flags-demo");
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join("max_batch"), "16")?;
            std::fs::write(dir.join("greeting"), "hello")?;
            println!("Created {}", dir.display());
            dir
        }
    };

    let flags = FlagSet::new();
    let max_batch = flags.dyn_int64("max_batch", 8, "largest batch size")?;
    let greeting = flags.dyn_string("greeting", "hi", "banner text")?;

    let updater = Updater::builder(DirectorySource::new(&dir)?)
        .with_flags(flags.clone())
        .build();
    if let Err(e) = updater.initialize().await {
        println!("Some files were not applied: {}", e);
    }
    updater.start()?;

    println!("Watching: {}", dir.display());
    println!("\n===> Try editing files in {} <===", dir.display());
    println!("\nPress Ctrl+C to exit\n");

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                println!("[Status] max_batch={} greeting={:?}", max_batch.value(), *greeting.get());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    updater.shutdown().await;
    println!("Updater stopped");
    Ok(())
}
