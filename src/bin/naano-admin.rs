use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use naano::config::{Config, DatabaseBackend};
use naano::models::{
    generate_hash, is_valid_hash, now_ts, AttributionState, LinkToggles, NewTrackedLink,
};
use naano::scoring::aggregate;
use naano::storage::{LeadFilter, PostgresStorage, SqliteStorage, Storage, StorageError};
use std::sync::Arc;

const GENERATED_HASH_LEN: usize = 8;
const HASH_ATTEMPTS: usize = 10;

#[derive(Parser)]
#[command(name = "naano-admin")]
#[command(about = "naano attribution admin CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tracked links
    #[command(subcommand)]
    Link(LinkCommand),
    /// Review a company inference
    #[command(subcommand)]
    Attribution(AttributionCommand),
    /// Intent aggregate for a company
    Company {
        name: String,
    },
    /// Leads ranked by effective confidence
    Leads(LeadsArgs),
}

#[derive(Subcommand)]
enum LinkCommand {
    /// Create a tracked link
    Create {
        #[arg(long)]
        destination: String,
        #[arg(long)]
        creator: String,
        #[arg(long)]
        saas: String,
        #[arg(long)]
        collaboration: String,
        /// Random when omitted
        #[arg(long)]
        hash: Option<String>,
        /// Lead price in cents; the configured default applies when omitted
        #[arg(long)]
        cost_cents: Option<i64>,
        #[arg(long)]
        no_impressions: bool,
        #[arg(long)]
        no_clicks: bool,
        #[arg(long)]
        no_revenue: bool,
    },
    /// Change what a link tracks; unspecified toggles keep their value
    Toggles {
        hash: String,
        #[arg(long)]
        impressions: Option<bool>,
        #[arg(long)]
        clicks: Option<bool>,
        #[arg(long)]
        revenue: Option<bool>,
    },
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[derive(Subcommand)]
enum AttributionCommand {
    Confirm { event_id: i64 },
    Dispute { event_id: i64 },
    Mismatch { event_id: i64 },
}

#[derive(Args)]
struct LeadsArgs {
    #[arg(long)]
    saas: Option<String>,
    #[arg(long)]
    creator: Option<String>,
    #[arg(long)]
    min_confidence: Option<f64>,
    /// Most recent leads considered before ranking
    #[arg(long, default_value_t = 200)]
    limit: i64,
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

async fn create_link(storage: &dyn Storage, mut link: NewTrackedLink, explicit: bool) -> Result<()> {
    url::Url::parse(&link.destination_url).context("Destination must be an absolute URL")?;

    for _ in 0..HASH_ATTEMPTS {
        match storage.create_link(&link).await {
            Ok(created) => {
                println!("✓ Created tracked link '{}' → {}", created.hash, created.destination_url);
                return Ok(());
            }
            Err(StorageError::Conflict) if explicit => {
                bail!("Hash '{}' is already taken", link.hash)
            }
            Err(StorageError::Conflict) => link.hash = generate_hash(GENERATED_HASH_LEN),
            Err(StorageError::Other(e)) => return Err(e),
        }
    }
    bail!("Failed to generate a unique hash after {HASH_ATTEMPTS} attempts")
}

async fn transition(storage: &dyn Storage, event_id: i64, to: AttributionState) -> Result<()> {
    let inference = storage
        .get_inference(event_id)
        .await?
        .with_context(|| format!("Event {event_id} has no company inference"))?;
    let from = inference.attribution_state;
    from.transition(to)?;

    if storage
        .transition_attribution(event_id, from, to, now_ts())
        .await?
    {
        println!("✓ Event {event_id}: {from} → {to}");
        Ok(())
    } else {
        bail!("Attribution of event {event_id} changed concurrently, retry")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };
    storage.init().await?;

    match cli.command {
        Commands::Link(LinkCommand::Create {
            destination,
            creator,
            saas,
            collaboration,
            hash,
            cost_cents,
            no_impressions,
            no_clicks,
            no_revenue,
        }) => {
            if let Some(h) = &hash {
                if !is_valid_hash(h) {
                    bail!("Hash must be 1-64 characters of [A-Za-z0-9_-]");
                }
            }
            let explicit = hash.is_some();
            let link = NewTrackedLink {
                hash: hash.unwrap_or_else(|| generate_hash(GENERATED_HASH_LEN)),
                destination_url: destination,
                creator_id: creator,
                saas_id: saas,
                collaboration_id: collaboration,
                cost_per_lead_cents: cost_cents,
                toggles: LinkToggles {
                    track_impressions: !no_impressions,
                    track_clicks: !no_clicks,
                    track_revenue: !no_revenue,
                },
            };
            create_link(storage.as_ref(), link, explicit).await?;
        }
        Commands::Link(LinkCommand::Toggles {
            hash,
            impressions,
            clicks,
            revenue,
        }) => {
            let link = storage
                .get_link(&hash)
                .await?
                .with_context(|| format!("Tracked link '{hash}' not found"))?;
            let current = link.toggles();
            let toggles = LinkToggles {
                track_impressions: impressions.unwrap_or(current.track_impressions),
                track_clicks: clicks.unwrap_or(current.track_clicks),
                track_revenue: revenue.unwrap_or(current.track_revenue),
            };
            storage.update_toggles(&hash, toggles).await?;
            println!(
                "✓ '{}': impressions {}, clicks {}, revenue {}",
                hash,
                on_off(toggles.track_impressions),
                on_off(toggles.track_clicks),
                on_off(toggles.track_revenue)
            );
        }
        Commands::Link(LinkCommand::List { limit, offset }) => {
            let links = storage.list_links(limit, offset).await?;
            if links.is_empty() {
                println!("No tracked links found.");
            } else {
                println!(
                    "{:<12} {:<16} {:<16} {:<5} {:<5} {}",
                    "Hash", "Creator", "SaaS", "Impr", "Click", "Destination"
                );
                println!("{}", "-".repeat(100));
                for link in links {
                    println!(
                        "{:<12} {:<16} {:<16} {:<5} {:<5} {}",
                        link.hash,
                        link.creator_id,
                        link.saas_id,
                        on_off(link.track_impressions),
                        on_off(link.track_clicks),
                        link.destination_url
                    );
                }
            }
        }
        Commands::Attribution(command) => {
            let (event_id, to) = match command {
                AttributionCommand::Confirm { event_id } => (event_id, AttributionState::Confirmed),
                AttributionCommand::Dispute { event_id } => (event_id, AttributionState::Disputed),
                AttributionCommand::Mismatch { event_id } => (event_id, AttributionState::Mismatch),
            };
            transition(storage.as_ref(), event_id, to).await?;
        }
        Commands::Company { name } => {
            let scores = storage.company_intent_scores(&name).await?;
            if scores.is_empty() {
                println!("No scored visits for '{name}'.");
            } else {
                let intent = aggregate(&name, &scores, now_ts());
                println!("{}", serde_json::to_string_pretty(&intent)?);
            }
        }
        Commands::Leads(args) => {
            let filter = LeadFilter {
                saas_id: args.saas,
                creator_id: args.creator,
                limit: args.limit.max(1),
                ..LeadFilter::default()
            };
            let mut leads = storage.list_leads(&filter, now_ts()).await?;
            if let Some(min) = args.min_confidence {
                leads.retain(|l| l.effective_confidence >= min);
            }
            leads.sort_by(|a, b| b.effective_confidence.total_cmp(&a.effective_confidence));

            if leads.is_empty() {
                println!("No leads found.");
            } else {
                println!(
                    "{:<8} {:<24} {:<11} {:<10} {:<9} {}",
                    "Lead", "Company", "Network", "Effective", "Qualified", "Creator"
                );
                println!("{}", "-".repeat(90));
                for view in leads {
                    println!(
                        "{:<8} {:<24} {:<11} {:<10.2} {:<9} {}",
                        view.lead.id,
                        view.company_name.as_deref().unwrap_or("-"),
                        view.network_type.map_or("-".to_string(), |n| n.to_string()),
                        view.effective_confidence,
                        if view.qualified { "yes" } else { "no" },
                        view.lead.creator_id
                    );
                }
            }
        }
    }

    Ok(())
}
