use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use cropscan_rs::client::{DetectionClient, DEFAULT_DETECT_CONFIDENCE, DEFAULT_FRAME_SKIP};
use cropscan_rs::config::ClientConfig;
use cropscan_rs::error::{failure_message, ApiError};
use cropscan_rs::models::{AppSettingsPatch, FarmHealth, MediaKind, NewFarm};
use cropscan_rs::query::{DetectImageVars, DetectVideoVars, MutationCallbacks};
use cropscan_rs::{Analyzer, DetectionHooks, NativeDbStore, QueryClient, RecordStore};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, rename_all = "snake_case")]
struct Args {
    /// Command to execute: check_health, detect_image, detect_video, analyze, list_scans, get_scan, search_scans, delete_scan, clear_scans, list_farms, add_farm, set_farm_health, delete_farm, clear_farms, get_settings, save_settings, stats
    #[arg(short, long)]
    command: String,

    /// Detection service URL (or set CROPSCAN_API_URL env var)
    #[arg(long, name = "api_url")]
    api_url: Option<String>,

    /// Use the server URL stored in app settings instead of the environment
    #[arg(long, name = "use_settings_url", default_value = "false")]
    use_settings_url: bool,

    /// Local record database
    #[arg(long, name = "db_path", default_value = "cropscan.db")]
    db_path: String,

    /// Path or file:// URI of the image or video (for detect_image, detect_video, analyze)
    #[arg(long, name = "media_uri")]
    media_uri: Option<String>,

    /// image or video (for analyze)
    #[arg(long, name = "media_type", default_value = "image")]
    media_type: String,

    /// Detection confidence threshold (for detect_image, detect_video)
    #[arg(long)]
    confidence: Option<f64>,

    /// Process every nth frame (for detect_video)
    #[arg(long, name = "frame_skip")]
    frame_skip: Option<u32>,

    /// Record ID (for get_scan, delete_scan, set_farm_health, delete_farm)
    #[arg(long)]
    id: Option<String>,

    /// Search text (for search_scans)
    #[arg(long)]
    query: Option<String>,

    /// Farm data as JSON (for add_farm)
    #[arg(long, name = "farm_json")]
    farm_json: Option<String>,

    /// Healthy, Warning or Danger (for set_farm_health)
    #[arg(long)]
    health: Option<String>,

    /// Partial settings as JSON (for save_settings)
    #[arg(long, name = "settings_json")]
    settings_json: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

// example usage:
// CROPSCAN_API_URL=http://192.168.1.100:8000 ./target/release/cropscan_cli --command check_health
// ./target/release/cropscan_cli --command detect_image --media_uri ./leaf.jpg --confidence 0.4
// ./target/release/cropscan_cli --command detect_video --media_uri ./field.mov --frame_skip 5
// ./target/release/cropscan_cli --command analyze --media_uri file:///tmp/leaf.jpg --media_type image --use_settings_url
// ./target/release/cropscan_cli --command search_scans --query damage
// ./target/release/cropscan_cli --command add_farm --farm_json '{"name": "North Field", "location": "Nakuru", "size": "12 acres", "cropType": "Maize"}'
// ./target/release/cropscan_cli --command set_farm_health --id <farm id> --health Warning
// ./target/release/cropscan_cli --command save_settings --settings_json '{"confidence": 0.8, "autoSave": false}'

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(format!("cropscan_rs={}", args.log_level))
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        match e.downcast_ref::<ApiError>() {
            Some(_) => eprintln!("{}", failure_message(&e)),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let records = Arc::new(RecordStore::new(NativeDbStore::open(&args.db_path)?));

    match args.command.as_str() {
        "check_health" => {
            let hooks = detection_hooks(&args, &records).await?;
            let health = hooks.health().refetch().await?;
            print_json(health.as_ref())?;
        }
        "detect_image" => {
            let media_uri = required(args.media_uri.clone(), "media_uri", "detect_image")?;
            let hooks = detection_hooks(&args, &records).await?;
            let vars = DetectImageVars::new(media_uri)
                .with_confidence(args.confidence.unwrap_or(DEFAULT_DETECT_CONFIDENCE));
            let result = hooks.detect_image(vars, MutationCallbacks::new()).await?;
            print_json(&result)?;
        }
        "detect_video" => {
            let media_uri = required(args.media_uri.clone(), "media_uri", "detect_video")?;
            let hooks = detection_hooks(&args, &records).await?;
            let vars = DetectVideoVars::new(media_uri)
                .with_confidence(args.confidence.unwrap_or(DEFAULT_DETECT_CONFIDENCE))
                .with_frame_skip(args.frame_skip.unwrap_or(DEFAULT_FRAME_SKIP));
            let result = hooks.detect_video(vars, MutationCallbacks::new()).await?;
            print_json(&result)?;
        }
        "analyze" => {
            let media_uri = required(args.media_uri.clone(), "media_uri", "analyze")?;
            let media_type: MediaKind = args.media_type.parse()?;
            let hooks = Arc::new(detection_hooks(&args, &records).await?);
            let analyzer = Analyzer::new(hooks, records.clone());
            let outcome = analyzer.analyze(&media_uri, media_type).await?;
            print_json(&outcome)?;
        }
        "list_scans" => {
            print_json(&records.get_scans().await?)?;
        }
        "get_scan" => {
            let id = required(args.id, "id", "get_scan")?;
            match records.get_scan(&id).await? {
                Some(scan) => print_json(&scan.summary())?,
                None => return Err(anyhow!("Scan {} not found", id)),
            }
        }
        "search_scans" => {
            let query = args.query.unwrap_or_default();
            print_json(&records.search_scans(&query).await?)?;
        }
        "delete_scan" => {
            let id = required(args.id, "id", "delete_scan")?;
            records.delete_scan(&id).await?;
            println!("Scan deleted successfully");
        }
        "clear_scans" => {
            records.clear_scans().await?;
            println!("Scan history cleared");
        }
        "list_farms" => {
            print_json(&records.get_farms().await?)?;
        }
        "add_farm" => {
            let farm_json = required(args.farm_json, "farm_json", "add_farm")?;
            let farm: NewFarm = serde_json::from_str(&farm_json)?;
            farm.validate()?;
            let created = records.save_farm(farm).await?;
            println!("Farm created successfully");
            print_json(&created)?;
        }
        "set_farm_health" => {
            let id = required(args.id, "id", "set_farm_health")?;
            let health: FarmHealth = required(args.health, "health", "set_farm_health")?.parse()?;
            records.update_farm_health(&id, health).await?;
            println!("Farm health updated");
        }
        "delete_farm" => {
            let id = required(args.id, "id", "delete_farm")?;
            records.delete_farm(&id).await?;
            println!("Farm deleted successfully");
        }
        "clear_farms" => {
            records.clear_farms().await?;
            println!("Farms cleared");
        }
        "get_settings" => {
            print_json(&records.get_settings().await?)?;
        }
        "save_settings" => {
            let settings_json = required(args.settings_json, "settings_json", "save_settings")?;
            let patch: AppSettingsPatch = serde_json::from_str(&settings_json)?;
            if let Some(api_url) = &patch.api_url {
                ClientConfig::new(api_url.as_str())?;
            }
            let saved = records.save_settings(patch).await?;
            println!("Settings saved successfully");
            print_json(&saved)?;
        }
        "stats" => {
            print_json(&records.dashboard_stats().await?)?;
        }
        _ => {
            eprintln!("Unknown command: {}", args.command);
            eprintln!(
                "Available commands: check_health, detect_image, detect_video, analyze, list_scans, get_scan, search_scans, delete_scan, clear_scans, list_farms, add_farm, set_farm_health, delete_farm, clear_farms, get_settings, save_settings, stats"
            );
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Builds the detection hooks for the URL chosen by the flags
async fn detection_hooks(
    args: &Args,
    records: &RecordStore<NativeDbStore>,
) -> Result<DetectionHooks<DetectionClient>> {
    let config = match &args.api_url {
        Some(url) => ClientConfig::new(url.as_str())?,
        None if args.use_settings_url => ClientConfig::new(records.get_settings().await?.api_url)?,
        None => ClientConfig::from_env()?,
    };

    let client = Arc::new(DetectionClient::new(config)?);
    Ok(DetectionHooks::new(client, Arc::new(QueryClient::new())))
}

fn required<T>(value: Option<T>, flag: &str, command: &str) -> Result<T> {
    value.ok_or_else(|| anyhow!("--{} required for {}", flag, command))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
