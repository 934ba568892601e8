//! leaseq CLI — operator interface to Postgres-backed queues.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use leaseq::config::Config;
use leaseq::db::{Collection, Db};
use leaseq::queue::{AddOptions, ClaimOptions, NackOptions, PingOptions, Queue};
use leaseq::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "leaseq", about = "Lease-based work queue on Postgres")]
struct Cli {
    /// Queue (collection) name
    queue: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run migrations and create indexes
    Init,
    /// Add a message
    Add {
        /// JSON payload; a JSON array with --many adds one message per element
        payload: String,
        /// Treat a JSON array payload as a batch
        #[arg(long)]
        many: bool,
        /// Seconds before the message becomes claimable
        #[arg(long)]
        delay: Option<u64>,
    },
    /// Claim the next message
    Claim {
        /// Lease length in seconds
        #[arg(long)]
        visibility: Option<u64>,
    },
    /// Extend a lease
    Ping {
        ack: String,
        /// Lease length in seconds
        #[arg(long)]
        visibility: Option<u64>,
    },
    /// Acknowledge a message
    Ack { ack: String },
    /// Release a lease
    Nack {
        ack: String,
        /// Seconds before the message becomes claimable again
        #[arg(long)]
        delay: Option<u64>,
    },
    /// Show message counts
    Stats,
    /// Delete acknowledged messages
    Clean,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "leaseq".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    let queue = open_queue(&db, &config, &cli.queue)?;

    match cli.command {
        Command::Init => {
            db.migrate().await?;
            queue.ensure_indexes().await?;
            if let Some(dead) = queue.dead_letter_queue() {
                dead.ensure_indexes().await?;
            }
            println!("Initialized queue {}", queue.name());
        }
        Command::Add {
            payload,
            many,
            delay,
        } => cmd_add(&queue, &payload, many, delay).await?,
        Command::Claim { visibility } => {
            let opts = ClaimOptions {
                visibility: visibility.map(Duration::from_secs),
            };
            match queue.claim_with(opts).await? {
                Some(msg) => println!("{}", serde_json::to_string_pretty(&msg)?),
                None => println!("Queue {} is empty.", queue.name()),
            }
        }
        Command::Ping { ack, visibility } => {
            let opts = PingOptions {
                visibility: visibility.map(Duration::from_secs),
            };
            let id = queue.ping_with(&ack, opts).await?;
            println!("Extended lease on {id}");
        }
        Command::Ack { ack } => {
            let id = queue.ack(&ack).await?;
            println!("Acknowledged {id}");
        }
        Command::Nack { ack, delay } => {
            let opts = NackOptions {
                delay: delay.map(Duration::from_secs),
            };
            let id = queue.nack_with(&ack, opts).await?;
            println!("Released {id}");
        }
        Command::Stats => {
            let stats = queue.stats().await?;
            println!("Total:      {}", stats.total);
            println!("Pending:    {}", stats.size);
            println!("In flight:  {}", stats.in_flight);
            println!("Done:       {}", stats.done);
        }
        Command::Clean => {
            let removed = queue.clean().await?;
            println!("Removed {removed} done message(s)");
        }
    }

    Ok(())
}

fn open_queue(db: &Db, config: &Config, name: &str) -> anyhow::Result<Queue<Collection>> {
    let options = config.queue_options();
    let mut queue = Queue::with_options(db.collection(name)?, options.clone())?;

    if let Some(ref dead_name) = config.dead_letter {
        anyhow::ensure!(
            dead_name != name,
            "queue {name} cannot be its own dead-letter queue"
        );
        let dead = Queue::with_options(db.collection(dead_name)?, options)?;
        queue = queue.dead_letter(Arc::new(dead));
    }

    Ok(queue)
}

async fn cmd_add(
    queue: &Queue<Collection>,
    payload: &str,
    many: bool,
    delay: Option<u64>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value = serde_json::from_str(payload)?;
    let opts = AddOptions {
        delay: delay.map(Duration::from_secs),
    };

    match payload {
        serde_json::Value::Array(items) if many => {
            let ids = queue.add_many_with(items, opts).await?;
            for id in &ids {
                println!("Added: {id}");
            }
            println!("\n{} message(s)", ids.len());
        }
        payload => {
            let id = queue.add_with(payload, opts).await?;
            println!("Added: {id}");
        }
    }

    Ok(())
}
