//! Example keeping dynamic flags in sync with an etcd cluster.
//!
//! This example shows how to:
//! - Point an updater at an etcd v2 keys directory
//! - Report keys that could not be applied at startup
//! - Keep serving reads while the watch task applies changes
//!
//! Run with: cargo run --example etcd_updater --features etcd
//!
//! Then, from another shell:
//!   etcdctl set /flagz/checkout/sample_ratio 0.25

use hotswap_flags::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hotswap_flags=info".into()),
        )
        .init();

    println!("=== Etcd Updater Example ===\n");

    let endpoint =
        std::env::var("ETCD_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:2379".to_string());

    let flags = FlagSet::new();
    let ratio = flags
        .dyn_float64("sample_ratio", 0.1, "fraction of requests traced")?
        .with_validator(in_range(0.0, 1.0));
    let regions = flags.dyn_string_set("regions", &["us-east-1"], "enabled regions")?;

    let source = EtcdSource::builder()
        .with_endpoint(&endpoint)
        .with_root("/flagz/checkout")
        .with_watch_timeout(Duration::from_secs(30))
        .build()?;

    // Updater settings may come from a file and FLAGZ_* variables.
    let config = UpdaterConfig::load(None, Some("FLAGZ"))?;
    let updater = Updater::builder(source)
        .with_flags(flags.clone())
        .with_config(config)
        .build();

    match updater.initialize().await {
        Ok(()) => println!("Initialized from {}", endpoint),
        Err(FlagError::Aggregate(errors)) => {
            println!("Initialized from {} with {} problem(s):", endpoint, errors.len());
            for e in errors {
                println!("  - {}", e);
            }
        }
        Err(e) => return Err(e),
    }
    updater.start()?;

    println!("\nPress Ctrl+C to exit\n");
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                println!(
                    "[Status] sample_ratio={} regions={} cursor={}",
                    ratio.value(),
                    regions.value_string(),
                    updater.cursor()
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    updater.shutdown().await;
    println!("Updater stopped");
    Ok(())
}
