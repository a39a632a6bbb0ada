use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use rescue_dispatch::catalog::Catalog;
use rescue_dispatch::center::{start_event_writer, DispatchCenter};
use rescue_dispatch::config::{DispatchConfig, EventLogConfig};
use rescue_dispatch::ingest::{load_script, IncidentRequest, SubmitAck, SubmitClient};
use rescue_dispatch::scheduler::Priority;
use rescue_dispatch::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "rescue-dispatch")]
#[command(version)]
#[command(about = "Emergency dispatch center driving rescue-unit digital twins")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the dispatch center
    Serve(ServeArgs),

    /// Report incidents to a running center
    Submit(SubmitArgs),

    /// Load, validate and print a catalog
    Catalog(CatalogArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Directory holding env.conf, unit_types.conf and incident_kinds.conf
    #[arg(long, default_value = "catalog")]
    catalog_dir: PathBuf,

    /// Address to bind the ingestion listener and dashboard on
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port for incident ingestion (JSON lines over TCP)
    #[arg(long, default_value = "7400")]
    port: u16,

    /// Disable the ingestion listener (dashboard submissions still work)
    #[arg(long)]
    no_listen: bool,

    /// Port for the web dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Maximum number of queued incidents
    #[arg(long, default_value = "100")]
    queue_capacity: usize,

    /// Length of one simulated time unit, in milliseconds
    #[arg(long, default_value = "1000")]
    time_unit_ms: u64,

    /// Seconds to wait for busy units on shutdown
    #[arg(long, default_value = "30")]
    drain_timeout_secs: u64,

    /// Append dispatch events to this file
    #[arg(long)]
    event_log: Option<PathBuf>,

    /// Mirror dispatch events as JSON lines to this host:port
    #[arg(long)]
    event_mirror: Option<String>,

    /// Events buffered for the writer before new ones are dropped
    #[arg(long, default_value = "1024")]
    event_capacity: usize,
}

#[derive(Parser, Debug)]
#[command(allow_negative_numbers = true)]
struct SubmitArgs {
    /// Ingestion address of the center
    #[arg(long, short = 'a', default_value = "127.0.0.1:7400")]
    addr: SocketAddr,

    /// Incident kind name
    #[arg(required_unless_present = "file")]
    name: Option<String>,

    #[arg(required_unless_present = "file")]
    x: Option<i32>,

    #[arg(required_unless_present = "file")]
    y: Option<i32>,

    /// Submission script of `name x y delay_seconds` lines
    #[arg(long, short = 'f', conflicts_with_all = ["name", "x", "y"])]
    file: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct CatalogArgs {
    /// Catalog directory
    #[arg(default_value = "catalog")]
    dir: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct UnitTypeOutput {
    name: String,
    count: usize,
    speed: u32,
    base_x: i32,
    base_y: i32,
}

#[derive(Serialize)]
struct RequirementOutput {
    unit_type: String,
    count: usize,
    time_to_manage: u64,
}

#[derive(Serialize)]
struct IncidentKindOutput {
    name: String,
    priority: i32,
    budget: Option<u64>,
    requirements: Vec<RequirementOutput>,
}

#[derive(Serialize)]
struct CatalogOutput {
    queue: String,
    width: i32,
    height: i32,
    unit_types: Vec<UnitTypeOutput>,
    incident_kinds: Vec<IncidentKindOutput>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn catalog_output(catalog: &Catalog) -> CatalogOutput {
    CatalogOutput {
        queue: catalog.env.queue.clone(),
        width: catalog.env.bounds.width,
        height: catalog.env.bounds.height,
        unit_types: catalog
            .unit_pools
            .iter()
            .map(|pool| UnitTypeOutput {
                name: pool.unit_type.name.clone(),
                count: pool.count,
                speed: pool.unit_type.speed,
                base_x: pool.unit_type.base.x,
                base_y: pool.unit_type.base.y,
            })
            .collect(),
        incident_kinds: catalog
            .kinds
            .iter()
            .map(|kind| IncidentKindOutput {
                name: kind.name.clone(),
                priority: kind.priority,
                budget: Priority::from_level(kind.priority).and_then(Priority::budget),
                requirements: kind
                    .requirements
                    .iter()
                    .map(|r| RequirementOutput {
                        unit_type: r.unit_type.name.clone(),
                        count: r.count,
                        time_to_manage: r.time_to_manage,
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn print_ack(request: &IncidentRequest, ack: &SubmitAck) {
    if ack.accepted {
        println!(
            "{} at ({}, {}) accepted as incident {}",
            request.name,
            request.x,
            request.y,
            ack.incident_id.unwrap_or_default()
        );
    } else {
        println!(
            "{} at ({}, {}) rejected: {}",
            request.name,
            request.x,
            request.y,
            ack.error.as_deref().unwrap_or("unknown error")
        );
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let catalog = Catalog::load(&args.catalog_dir).await?;

    let listen_addr = (!args.no_listen).then(|| SocketAddr::new(args.host, args.port));
    let mut config = DispatchConfig::default()
        .with_listen_addr(listen_addr)
        .with_queue_capacity(args.queue_capacity)
        .with_time_unit(Duration::from_millis(args.time_unit_ms))
        .with_drain_timeout(Duration::from_secs(args.drain_timeout_secs))
        .with_event_log(EventLogConfig {
            path: args.event_log,
            mirror_addr: args.event_mirror,
            capacity: args.event_capacity,
        });
    if let Some(port) = args.dashboard_port {
        config = config.with_dashboard_addr(SocketAddr::new(args.host, port));
    }

    tracing::info!(
        catalog_dir = %args.catalog_dir.display(),
        listen_addr = ?config.listen_addr,
        dashboard_addr = ?config.dashboard_addr,
        queue = %catalog.env.queue,
        "Starting rescue-dispatch"
    );

    let (events, writer) = start_event_writer(&config.event_log);
    let shutdown = install_shutdown_handler()?;

    let center = DispatchCenter::new(config, catalog, events);
    center.run(shutdown).await?;

    // The center has dropped its sinks; the writer drains and exits.
    if let Some(writer) = writer {
        writer.await?;
    }
    Ok(())
}

async fn run_submit(args: SubmitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = SubmitClient::connect(args.addr).await?;

    let (requests, acks) = match (args.file, args.name, args.x, args.y) {
        (Some(path), ..) => {
            let script = load_script(&path).await?;
            let acks = client.send_script(&script).await?;
            let requests: Vec<IncidentRequest> =
                script.into_iter().map(|entry| entry.request).collect();
            (requests, acks)
        }
        (None, Some(name), Some(x), Some(y)) => {
            let request = IncidentRequest::new(name, x, y);
            let ack = client.send(&request).await?;
            (vec![request], vec![ack])
        }
        _ => return Err("either --file or NAME X Y is required".into()),
    };

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&acks)?),
        OutputFormat::Table => {
            for (request, ack) in requests.iter().zip(&acks) {
                print_ack(request, ack);
            }
        }
    }

    if acks.iter().any(|ack| !ack.accepted) {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_catalog(args: CatalogArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let catalog = Catalog::load(&args.dir).await?;
    let output = catalog_output(&catalog);

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            println!(
                "Map:   {}x{} (queue '{}')",
                output.width, output.height, output.queue
            );
            println!();
            println!("{:<16} {:>5} {:>6}  BASE", "UNIT TYPE", "COUNT", "SPEED");
            for unit in &output.unit_types {
                println!(
                    "{:<16} {:>5} {:>6}  ({}, {})",
                    unit.name, unit.count, unit.speed, unit.base_x, unit.base_y
                );
            }
            println!();
            println!("{:<16} {:>8} {:>7}  REQUIREMENTS", "INCIDENT", "PRIORITY", "BUDGET");
            for kind in &output.incident_kinds {
                let requirements: Vec<String> = kind
                    .requirements
                    .iter()
                    .map(|r| format!("{} x{} ({})", r.unit_type, r.count, r.time_to_manage))
                    .collect();
                let budget = kind
                    .budget
                    .map_or_else(|| "-".to_string(), |b| b.to_string());
                println!(
                    "{:<16} {:>8} {:>7}  {}",
                    kind.name,
                    kind.priority,
                    budget,
                    requirements.join(", ")
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_serve(serve_args).await,
        Commands::Submit(submit_args) => run_submit(submit_args).await,
        Commands::Catalog(catalog_args) => run_catalog(catalog_args).await,
    }
}
