//! Example wiring dynamic flags to the in-process store.
//!
//! This example shows how to:
//! - Define dynamic and static flags in a registry
//! - Initialize them from a store and keep them in sync
//! - Watch a rejected value get rolled back in the store
//! - Render the registry for a status page
//!
//! Run with: cargo run --example memory_updater

use hotswap_flags::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const ROOT: &str = "/flagz/checkout";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Backends {
    primary: String,
    #[serde(default)]
    replicas: Vec<String>,
}

fn key(name: &str) -> String {
    format!("{}/{}", ROOT, name)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hotswap_flags=info".into()),
        )
        .init();

    println!("=== Memory Updater Example ===\n");

    let flags = FlagSet::new();
    let workers = flags
        .dyn_int64("workers", 4, "worker pool size")?
        .with_validator(in_range(1, 64))
        .with_notifier(|old: Arc<i64>, new: Arc<i64>| {
            println!("[Event] workers: {} -> {}", old, new);
        });
    let backends = flags.dyn_json(
        "backends",
        Backends {
            primary: "db-1".to_string(),
            replicas: Vec::new(),
        },
        "database pool",
    )?;
    flags.define_static("port", 8080i64, "listen port")?;

    // Seed the store the way a deploy tool would.
    let store = MemoryStore::new();
    store.set(&key("workers"), "8")?;
    store.set(&key("backends"), r#"{"primary": "db-2", "replicas": ["db-3"]}"#)?;

    let updater = Updater::builder(MemorySource::new(store.clone(), ROOT))
        .with_flags(flags.clone())
        .build();
    updater.initialize().await?;
    println!("Initialized at cursor {}", updater.cursor());
    println!("  workers  = {}", workers.value());
    println!("  backends = {:?}\n", *backends.get());

    updater.start()?;

    println!("--- Live update: workers = 16 ---");
    store.set(&key("workers"), "16")?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("  workers  = {}\n", workers.value());

    println!("--- Rejected update: workers = 500 ---");
    store.set(&key("workers"), "500")?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("  workers  = {}", workers.value());
    println!(
        "  store    = {}\n",
        store.get(&key("workers")).unwrap_or_default()
    );

    println!("--- Changed flags ---");
    print!("{}", flags.status(StatusFilter::changed()).to_text());

    updater.shutdown().await;
    println!("\nUpdater stopped");
    Ok(())
}
