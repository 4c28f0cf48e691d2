use crate::scenario::{Scenario, Step};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use geofence_model::{Coordinate, RawTransition};
use geofence_provider::SimulatedProvider;
use geofence_registry::{new_callback, DispatchCounts, GeofenceConfig, Registry, TransitionEvent};
use geofence_storage::{FenceRepository, FenceStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Time given to the delivery pump after each step.
const SETTLE: Duration = Duration::from_millis(10);

/// Upper bound on waiting for the pump to drain queued host reports.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Args {
    pub scenario: PathBuf,
    pub config: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub json: bool,
}

pub async fn run(args: Args) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)?;
    let config = match &args.config {
        Some(path) => GeofenceConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => GeofenceConfig::default(),
    };
    let store = args
        .store
        .as_deref()
        .map(FenceStore::open)
        .transpose()
        .context("failed to open fence store")?;

    let provider = Arc::new(SimulatedProvider::new().auto_answer(scenario.permission));
    let registry = Registry::new(provider.clone());
    registry.initialize(config).await?;

    let permission = registry.request_permission().await;
    tracing::info!(%permission, "Permission resolved");

    let json = args.json;
    let _subscription = registry.subscribe(new_callback(move |event| print_event(event, json)))?;

    let mut updates = registry.permission_updates();
    let permission_watch = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = *updates.borrow_and_update();
            tracing::info!(permission = %state, "Permission changed");
        }
    });

    if let Some(store) = &store {
        let saved = store.load_all()?;
        if !saved.is_empty() {
            report_failures("restore", registry.restore(saved).await);
        }
    }
    report_failures("add", registry.add_all(scenario.fences).await);

    for step in scenario.steps {
        play(&registry, &provider, step).await;
        tokio::time::sleep(SETTLE).await;
    }

    if let Some(store) = &store {
        let snapshot = registry.snapshot().await;
        store.save_all(&snapshot)?;
        tracing::info!(fences = snapshot.len(), "Saved fence snapshot");
    }

    drain(&provider).await;
    registry.shutdown().await;
    permission_watch.abort();
    print_summary(registry.dispatcher().stats(), json);
    Ok(())
}

/// Wait until the pump has taken every queued report. Shutdown lets the
/// report being dispatched finish, so nothing queued is lost.
async fn drain(provider: &SimulatedProvider) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while provider.pending_events() > 0 {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(
                pending = provider.pending_events(),
                "Shutting down with undelivered host reports"
            );
            return;
        }
        tokio::time::sleep(SETTLE).await;
    }
}

async fn play(registry: &Registry, provider: &SimulatedProvider, step: Step) {
    tracing::debug!(?step, "Playing step");
    match step {
        Step::MoveTo {
            latitude,
            longitude,
        } => provider.move_to(Coordinate::new(latitude, longitude)),
        Step::Emit { code, fence_ids } => provider.emit(RawTransition {
            code,
            fence_ids,
            timestamp: Utc::now(),
            location: None,
        }),
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        Step::Add { fence } => report_failures("add", vec![registry.add(fence).await]),
        Step::Remove { id } => report_failures("remove", vec![registry.remove(&id).await]),
        Step::Clear => registry.clear().await,
        Step::SetPermission { permission } => provider.change_permission(permission),
    }
}

fn report_failures(operation: &str, results: Vec<geofence_registry::Result<()>>) {
    for err in results.into_iter().filter_map(|result| result.err()) {
        tracing::warn!(operation, error = %err, "Scenario operation failed");
    }
}

fn print_event(event: &TransitionEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::error!(error = %err, "Failed to encode transition"),
        }
        return;
    }

    let location = event
        .location
        .map(|at| format!(" at ({:.5}, {:.5})", at.latitude, at.longitude))
        .unwrap_or_default();
    println!(
        "{} {:<5} {}{}",
        event.timestamp.format("%H:%M:%S%.3f"),
        event.kind.as_str(),
        event.fence_id,
        location
    );
}

fn print_summary(stats: DispatchCounts, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(&stats) {
            println!("{line}");
        }
        return;
    }
    println!(
        "delivered={} coalesced={} stale={} anomalies={} undecodable={} listener_panics={}",
        stats.delivered,
        stats.coalesced,
        stats.stale,
        stats.anomalies,
        stats.undecodable,
        stats.listener_panics
    );
}

pub fn check(path: &Path) -> Result<()> {
    let scenario = Scenario::load(path)?;
    let errors = scenario.validation_errors();
    for err in &errors {
        println!("{err}");
    }
    if !errors.is_empty() {
        bail!("{} invalid fence(s) in {}", errors.len(), path.display());
    }
    println!(
        "{} fence(s), {} step(s): ok",
        scenario.fences.len(),
        scenario.steps.len()
    );
    Ok(())
}

pub fn list_fences(path: &Path, json: bool) -> Result<()> {
    let store = FenceStore::open(path).context("failed to open fence store")?;
    let fences = store.load_all()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&fences)?);
        return Ok(());
    }
    for fence in &fences {
        let transitions: Vec<_> = fence.transition_mask.iter().map(|t| t.as_str()).collect();
        println!(
            "{:<16} ({:.5}, {:.5}) r={}m [{}]",
            fence.id,
            fence.latitude,
            fence.longitude,
            fence.radius,
            transitions.join(",")
        );
    }
    Ok(())
}
