use clap::Parser;
use serde_json;
use std::sync::Arc;

use gridcheck_rs::auth::{CredentialFile, TokenProvider};
use gridcheck_rs::catalog::CatalogReconciler;
use gridcheck_rs::client::{GatewayError, HttpGateway, LoginRequest, RemoteGateway};
use gridcheck_rs::config::AppConfig;
use gridcheck_rs::lifecycle::{InspectionLifecycle, ItemDraft};
use gridcheck_rs::models::{SyncStatus, UserLocal};
use gridcheck_rs::store::LocalStore;
use gridcheck_rs::sync::{SyncEngine, SyncOutcome};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, rename_all = "snake_case")]
struct Args {
    /// Command to execute: login, logout, facilities, zones, pull_checklist, start_inspection, record_item, finish_inspection, sync, status, cleanup
    #[arg(short, long)]
    command: String,

    /// Username (for login command)
    #[arg(long, name = "username")]
    username: Option<String>,

    /// Password (for login command)
    #[arg(long, name = "password")]
    password: Option<String>,

    /// Facility ID (for zones, pull_checklist and start_inspection commands)
    #[arg(long, name = "facility_id")]
    facility_id: Option<i64>,

    /// Zone ID (for pull_checklist command; omit for devices directly on the facility)
    #[arg(long, name = "zone_id")]
    zone_id: Option<i64>,

    /// Inspection local UUID (for record_item and finish_inspection commands)
    #[arg(long, name = "inspection_id")]
    inspection_id: Option<String>,

    /// Device ID (for record_item command)
    #[arg(long, name = "device_id")]
    device_id: Option<i64>,

    /// Parameter ID (for record_item command)
    #[arg(long, name = "parameter_id")]
    parameter_id: Option<i64>,

    /// Boolean value (for record_item command)
    #[arg(long, name = "value_bool")]
    value_bool: Option<bool>,

    /// Numeric value (for record_item command)
    #[arg(long, name = "value_num")]
    value_num: Option<f64>,

    /// Text value (for record_item command)
    #[arg(long, name = "value_text")]
    value_text: Option<String>,

    /// Optional note (for start_inspection and record_item commands)
    #[arg(long, name = "note")]
    note: Option<String>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,
}

// example usage:
// GRIDCHECK_SERVER_URL=https://example.com/api ./target/release/gridcheck_cli --command login --username ana --password secret
// ./target/release/gridcheck_cli --command facilities
// ./target/release/gridcheck_cli --command zones --facility_id 7
// ./target/release/gridcheck_cli --command pull_checklist --facility_id 7 --zone_id 3
// ./target/release/gridcheck_cli --command start_inspection --facility_id 7 --note 'Annual check'
// ./target/release/gridcheck_cli --command record_item --inspection_id <uuid> --device_id 100 --parameter_id 55 --value_bool true
// ./target/release/gridcheck_cli --command finish_inspection --inspection_id <uuid>
// ./target/release/gridcheck_cli --command sync
// ./target/release/gridcheck_cli --command status
// ./target/release/gridcheck_cli --command cleanup
// ./target/release/gridcheck_cli --command logout

fn require_session(credentials: &CredentialFile) -> String {
    if !credentials.is_valid() {
        eprintln!("Not logged in or session expired; run --command login first");
        std::process::exit(1);
    }
    match credentials.bearer_token() {
        Some(token) => token,
        None => {
            eprintln!("Not logged in or session expired; run --command login first");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(format!("gridcheck_rs={}", args.log_level))
        .init();

    let config = AppConfig::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(LocalStore::open(config.db_path())?);
    let credentials = Arc::new(CredentialFile::open(config.credentials_path())?);
    let gateway = HttpGateway::new(&config.server_url, config.request_timeout())?;
    let lifecycle = InspectionLifecycle::new(store.clone());
    let reconciler = CatalogReconciler::new(store.clone());

    match args.command.as_str() {
        "login" => {
            let username = args.username.expect("username required for login");
            let password = args.password.expect("password required for login");

            match gateway.login(&LoginRequest::new(username, password)).await {
                Ok(response) => {
                    credentials.save(&response)?;
                    // Make sure inspections started by this operator can
                    // reference a local user row.
                    if store.user(response.user_id)?.is_none() {
                        let mut user = UserLocal::default_worker(response.user_id);
                        user.username = response.username.clone();
                        store.upsert_user(user)?;
                    }
                    println!("Logged in as {}", response.username);
                }
                Err(GatewayError::Unauthorized) => {
                    eprintln!("Login failed: invalid credentials");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Login failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        "logout" => {
            credentials.clear()?;
            println!("Logged out");
        }
        "facilities" => {
            let bearer = require_session(&credentials);
            match gateway.fetch_facilities(&bearer).await {
                Ok(summaries) => reconciler.apply_facilities(&summaries)?,
                Err(e) if e.is_transient() => {
                    eprintln!("Offline ({}), showing cached data", e);
                }
                Err(e) => {
                    eprintln!("Failed to fetch facilities: {}", e);
                    std::process::exit(1);
                }
            }
            println!("{}", serde_json::to_string_pretty(&store.facilities()?)?);
        }
        "zones" => {
            let facility_id = args.facility_id.expect("facility_id required for zones");
            let bearer = require_session(&credentials);
            match gateway.fetch_zones(&bearer, facility_id).await {
                Ok(zones) => reconciler.apply_zones(facility_id, &zones)?,
                Err(e) if e.is_transient() => {
                    eprintln!("Offline ({}), showing cached data", e);
                }
                Err(e) => {
                    eprintln!("Failed to fetch zones: {}", e);
                    std::process::exit(1);
                }
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&store.zone_overview(facility_id)?)?
            );
        }
        "pull_checklist" => {
            let facility_id = args
                .facility_id
                .expect("facility_id required for pull_checklist");
            let bearer = require_session(&credentials);

            match gateway
                .fetch_checklist(&bearer, facility_id, args.zone_id)
                .await
            {
                Ok(entries) => {
                    reconciler.apply_checklist(facility_id, &entries)?;
                    let parameters: usize = entries.iter().map(|e| e.parameters.len()).sum();
                    println!(
                        "Checklist stored: {} device(s), {} parameter(s)",
                        entries.len(),
                        parameters
                    );
                }
                Err(e) => {
                    eprintln!("Failed to fetch checklist: {}", e);
                    std::process::exit(1);
                }
            }
        }
        "start_inspection" => {
            let facility_id = args
                .facility_id
                .expect("facility_id required for start_inspection");
            let inspection =
                lifecycle.create_inspection(facility_id, credentials.user_id(), args.note)?;
            println!("{}", serde_json::to_string_pretty(&inspection)?);
        }
        "record_item" => {
            let inspection_id = args
                .inspection_id
                .expect("inspection_id required for record_item");
            let device_id = args.device_id.expect("device_id required for record_item");
            let parameter_id = args
                .parameter_id
                .expect("parameter_id required for record_item");

            let draft = ItemDraft {
                device_id,
                parameter_id,
                value_bool: args.value_bool,
                value_num: args.value_num,
                value_text: args.value_text,
                note: args.note,
            };
            match lifecycle.save_items(&inspection_id, &[draft]) {
                Ok(saved) => println!("{}", serde_json::to_string_pretty(&saved)?),
                Err(e) => {
                    eprintln!("Failed to record item: {}", e);
                    std::process::exit(1);
                }
            }
        }
        "finish_inspection" => {
            let inspection_id = args
                .inspection_id
                .expect("inspection_id required for finish_inspection");
            let inspection = lifecycle.finalize_inspection(&inspection_id)?;
            println!("{}", serde_json::to_string_pretty(&inspection)?);
        }
        "sync" => {
            let tokens: Arc<dyn TokenProvider> = credentials.clone();
            let engine = SyncEngine::new(store.clone(), gateway, tokens);
            match engine.sync_all().await {
                SyncOutcome::Completed {
                    synced,
                    failed,
                    total,
                } => {
                    println!(
                        "Sync finished: {} synced, {} failed, {} total",
                        synced, failed, total
                    );
                }
                SyncOutcome::Failed { message } => {
                    eprintln!("Sync failed: {}", message);
                    std::process::exit(1);
                }
                SyncOutcome::AlreadyRunning => {
                    println!("A sync pass is already running");
                }
            }
        }
        "status" => {
            let inspections = store.inspections()?;
            let mut pending = 0;
            let mut syncing = 0;
            let mut synced = 0;
            let mut failed = 0;
            for inspection in &inspections {
                match inspection.status {
                    SyncStatus::Pending => pending += 1,
                    SyncStatus::Syncing => syncing += 1,
                    SyncStatus::Synced => synced += 1,
                    SyncStatus::Failed => failed += 1,
                }
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "total": inspections.len(),
                    "pending": pending,
                    "syncing": syncing,
                    "synced": synced,
                    "failed": failed,
                }))?
            );
            for inspection in &inspections {
                if inspection.status == SyncStatus::Failed {
                    if let Some(error) = &inspection.sync_error {
                        eprintln!("{}: {}", inspection.local_id, error);
                    }
                }
            }
        }
        "cleanup" => {
            let deleted = lifecycle.cleanup()?;
            println!("Removed {} empty inspection(s)", deleted.len());
            for local_id in deleted {
                println!("{}", local_id);
            }
        }
        _ => {
            eprintln!("Unknown command: {}", args.command);
            eprintln!(
                "Available commands: login, logout, facilities, zones, pull_checklist, start_inspection, record_item, finish_inspection, sync, status, cleanup"
            );
            std::process::exit(1);
        }
    }

    Ok(())
}
