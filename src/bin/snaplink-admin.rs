use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snaplink::clock::SystemClock;
use snaplink::codegen::CodeGenerator;
use snaplink::config::Config;
use snaplink::models::{format_millis, UrlResponse};
use snaplink::registry::{RegistryError, UrlRegistry};
use snaplink::storage::{SqliteStorage, Storage};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "snaplink-admin")]
#[command(about = "Snaplink short link management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all short links, most recent first
    List,
    /// Show a single short link
    Show {
        /// Link id
        id: String,
    },
    /// Permanently delete a short link and its analytics
    Delete {
        /// Link id
        id: String,
    },
    /// Remove every expired link, freeing its code
    PurgeExpired,
    /// Print the analytics summary of a link
    Stats {
        /// Link id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
    );

    // Ensure database is initialized
    storage.init().await?;

    let registry = UrlRegistry::new(
        Arc::clone(&storage),
        CodeGenerator::new(config.short_code.length, config.short_code.max_attempts),
        Arc::new(SystemClock),
    );

    match cli.command {
        Commands::List => {
            let links = registry.list().await?;
            if links.is_empty() {
                println!("No short links found.");
            } else {
                println!(
                    "{:<38} {:<12} {:<26} {:<8} {:<8} {}",
                    "ID", "Code", "Created", "Clicks", "Expires", "Target"
                );
                println!("{}", "-".repeat(120));
                for link in links {
                    println!(
                        "{:<38} {:<12} {:<26} {:<8} {:<8} {}",
                        link.id,
                        link.code,
                        format_millis(link.created_at),
                        link.click_count,
                        link.expiration,
                        link.original_url
                    );
                }
            }
        }
        Commands::Show { id } => match registry.get_by_id(&id).await {
            Ok(link) => {
                let view = UrlResponse::from_record(&link, &config.public_base_url);
                println!("{}", serde_json::to_string_pretty(&view)?);
            }
            Err(RegistryError::NotFound) => println!("⚠ No link with id '{}'", id),
            Err(e) => return Err(e.into()),
        },
        Commands::Delete { id } => match registry.delete(&id).await {
            Ok(()) => println!("✓ Deleted link '{}'", id),
            Err(RegistryError::NotFound) => println!("⚠ No link with id '{}'", id),
            Err(e) => return Err(e.into()),
        },
        Commands::PurgeExpired => {
            let purged = registry.purge_expired().await?;
            println!("✓ Purged {} expired link(s)", purged);
        }
        Commands::Stats { id } => {
            let stats = storage
                .load_analytics(&id)
                .await
                .with_context(|| format!("Failed to load analytics for '{id}'"))?;

            let Some(stats) = stats else {
                println!("⚠ No link with id '{}'", id);
                return Ok(());
            };

            println!("Clicks:          {}", stats.clicks);
            println!("Unique visitors: {}", stats.unique_visitors);
            print_breakdown("Countries", &stats.countries);
            print_breakdown("Devices", &stats.devices);
            print_breakdown("Browsers", &stats.browsers);
            print_breakdown("Referrers", &stats.referrers);

            if !stats.daily_stats.is_empty() {
                println!("\nDaily:");
                for day in &stats.daily_stats {
                    println!(
                        "  {}  {:>6} clicks  {:>6} visitors",
                        day.date, day.clicks, day.unique_visitors
                    );
                }
            }

            if let Some(latest) = stats.ip_addresses.first() {
                println!("\nLast visit: {} from {}", latest.last_access, latest.ip);
            }
        }
    }

    Ok(())
}

fn print_breakdown(title: &str, counts: &BTreeMap<String, u64>) {
    if counts.is_empty() {
        return;
    }

    let mut rows: Vec<_> = counts.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    println!("\n{}:", title);
    for (key, count) in rows {
        println!("  {:<30} {}", key, count);
    }
}
