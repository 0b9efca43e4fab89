//! CLI command implementations
//!
//! `watch` boots the layer against the configured HTTP backend:
//! load config → set log level → mount views → serve stdin commands until
//! EOF → unmount every view.

use std::path::Path;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{GuardMode, SyncConfig, ViewConfig};
use crate::observability::{log_event, Event, Logger, SyncMetrics};
use crate::sync::{
    DataSync, ResponseShape, Snapshot, StalePolicy, SyncError, SyncedView, ViewSpec,
};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{parse_request, write_error, write_response, Request};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Watch { config } => watch(&config),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// Load and validate the configuration, print the resolved setup
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = SyncConfig::load(config_path)?;
    write_response(describe_config(&config))
}

fn describe_config(config: &SyncConfig) -> Value {
    let mut routes = Map::new();
    for (resource, collections) in config.resource_routes().entries() {
        let keys: Vec<&str> = collections.iter().map(|c| c.as_str()).collect();
        routes.insert(resource.to_string(), json!(keys));
    }

    let views: Vec<Value> = config
        .views
        .iter()
        .map(|v| {
            json!({
                "name": v.name,
                "endpoint": v.endpoint,
                "collections": v.collections,
                "shape": v.shape,
                "guard": v.guard,
            })
        })
        .collect();

    json!({
        "base_url": config.base_url,
        "debounce_ms": config.debounce_ms,
        "stale_grace_ms": config.stale_grace_ms,
        "mutation_retries": config.mutation_retries,
        "routes": routes,
        "views": views,
    })
}

/// Mount every configured view and serve stdin commands until EOF
pub fn watch(config_path: &Path) -> CliResult<()> {
    log_event(Event::BootStart, &[("config", &config_path.display().to_string())]);

    let config = SyncConfig::load(config_path)?;
    config.require_backend()?;
    Logger::set_min_severity(config.severity());
    log_event(
        Event::ConfigLoaded,
        &[
            ("base_url", &config.base_url),
            ("views", &config.views.len().to_string()),
        ],
    );

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::BootFailed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(serve(config))
}

async fn serve(config: SyncConfig) -> CliResult<()> {
    let sync = DataSync::from_config(&config)?;
    let views: Vec<SyncedView<Value>> = config
        .views
        .iter()
        .map(|view| sync.use_global_data_sync(view_spec(view)))
        .collect::<Result<Vec<_>, SyncError>>()?;

    log_event(Event::Serving, &[("views", &views.len().to_string())]);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_request(&line) {
            Ok(request) => handle(&sync, &views, request).await?,
            Err(e) => write_error(e.code_str(), e.message())?,
        }
    }

    for view in &views {
        view.unmount();
    }
    log_event(Event::ShutdownComplete, &[]);

    Ok(())
}

async fn handle(sync: &DataSync, views: &[SyncedView<Value>], request: Request) -> CliResult<()> {
    match request {
        Request::Mutate(mutation) => match sync.mutate(&mutation).await {
            Ok(body) => write_response(json!({ "result": body })),
            Err(e) => write_error(e.code(), &e.to_string()),
        },
        Request::Announce { collection } => {
            let report = sync.trigger_data_mutation(&collection);
            write_response(json!({
                "collection": collection,
                "delivered": report.delivered,
                "failed": report.failed,
            }))
        }
        Request::RefreshAll => {
            let report = sync.refresh_all();
            write_response(json!({
                "delivered": report.delivered,
                "failed": report.failed,
            }))
        }
        Request::Status => {
            let views: Vec<Value> = views.iter().map(view_status).collect();
            write_response(json!({
                "views": views,
                "metrics": SyncMetrics::global().to_json(),
            }))
        }
    }
}

fn view_status(view: &SyncedView<Value>) -> Value {
    let snapshot = view.snapshot();
    json!({
        "name": view.name(),
        "state": view.state().to_string(),
        "refreshing": view.is_refreshing(),
        "items": snapshot.len(),
        "fetched_at": snapshot.fetched_at.map(|t| t.to_rfc3339()),
        "error": snapshot.error.as_ref().map(|e| e.to_string()),
        "guard": view.guard_state().map(|g| format!("{:?}", g)),
    })
}

fn view_spec(view: &ViewConfig) -> ViewSpec<Value> {
    let spec = ViewSpec::new(view.name.clone(), view.endpoint.clone())
        .collections(view.collections.iter().cloned())
        .shape(view.shape.clone());

    match guard_policy(view) {
        Some(policy) => spec.stale_guard(policy),
        None => spec,
    }
}

fn guard_policy(view: &ViewConfig) -> Option<StalePolicy<Value>> {
    match (view.guard, &view.shape) {
        (GuardMode::Off, _) => None,
        (GuardMode::Unpopulated, _) => Some(StalePolicy::Unpopulated),
        // An aggregate is one object; "empty" means every counter is zero
        (GuardMode::Empty, ResponseShape::Single) => {
            Some(StalePolicy::custom(|snapshot: &Snapshot<Value>| {
                snapshot.data.first().map_or(true, counters_all_zero)
            }))
        }
        (GuardMode::Empty, ResponseShape::List { .. }) => Some(StalePolicy::EmptyOrUnpopulated),
    }
}

fn counters_all_zero(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .values()
            .filter_map(Value::as_f64)
            .all(|n| n == 0.0),
        _ => true,
    }
}
