//! Daemon wiring: store, watch pump, cache sweep, and decision loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use fleet_core::{Fleet, FleetdConfig, Instance};
use fleet_scheduler::{
    Cache, DefaultStrategy, DiffGenerator, Informer, LogRecorder, PendingQueue, Scheduler,
    StoreBinder,
};
use fleet_state::{StateError, StateStore};

pub async fn run(config: FleetdConfig) -> anyhow::Result<()> {
    let settings = config.scheduler_settings()?;
    info!("fleetd starting");

    // ── Store ──────────────────────────────────────────────────

    let store = open_store(&config)?;
    seed(&store, &config)?;

    // ── Scheduler subsystems ───────────────────────────────────

    let cache = Arc::new(Cache::new(Box::new(DefaultStrategy)));
    let queue = Arc::new(PendingQueue::new());
    let scheduler = Arc::new(
        Scheduler::new(
            cache.clone(),
            queue.clone(),
            Arc::new(store.clone()),
            Arc::new(StoreBinder::new(store.clone())),
            Arc::new(LogRecorder),
        )
        .with_bind_retry(settings.bind_retry),
    );
    let informer = Informer::new(cache.clone(), queue.clone());

    let fleet_store = store.clone();
    let mut fleets = DiffGenerator::new(
        "fleets",
        settings.poll_interval,
        Box::new(move || -> anyhow::Result<Vec<Fleet>> {
            Ok(fleet_store.list_fleets()?)
        }),
    )
    .with_resync(settings.resync_polls);
    let fleet_events = fleets.subscribe(settings.queue_capacity);

    let instance_store = store.clone();
    let mut instances = DiffGenerator::new(
        "instances",
        settings.poll_interval,
        Box::new(move || -> anyhow::Result<Vec<Instance>> {
            Ok(instance_store.list_instances()?)
        }),
    )
    .with_resync(settings.resync_polls);
    let instance_events = instances.subscribe(settings.queue_capacity);

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweep = {
        let cache = cache.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { cache.run(settings.sweep_interval, shutdown).await })
    };
    let fleet_pump = tokio::spawn(fleets.run(shutdown_rx.clone()));
    let instance_pump = tokio::spawn(instances.run(shutdown_rx.clone()));
    let informer_task = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            informer
                .run(instance_events, fleet_events, shutdown)
                .await
        })
    };
    let decision_loop = tokio::spawn(scheduler.clone().run(shutdown_rx));

    info!(
        sweep_ms = settings.sweep_interval.as_millis() as u64,
        poll_ms = settings.poll_interval.as_millis() as u64,
        "fleetd running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for (name, handle) in [
        ("sweep", sweep),
        ("fleet pump", fleet_pump),
        ("instance pump", instance_pump),
        ("informer", informer_task),
        ("decision loop", decision_loop),
    ] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "task ended abnormally");
        }
    }

    info!(
        fleets = cache.fleet_count(),
        instances = cache.instance_count(),
        assumed = cache.assumed_count(),
        "fleetd stopped"
    );
    Ok(())
}

pub fn open_store(config: &FleetdConfig) -> anyhow::Result<StateStore> {
    match config.data_dir() {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let path = dir.join("fleetgrid.redb");
            let store = StateStore::open(&path)?;
            info!(path = ?path, "state store opened");
            Ok(store)
        }
        None => {
            let store = StateStore::open_in_memory()?;
            info!("in-memory state store opened");
            Ok(store)
        }
    }
}

/// Write configured seed objects. Instances that already exist are kept.
/// Returns how many instances were created.
pub fn seed(store: &StateStore, config: &FleetdConfig) -> anyhow::Result<usize> {
    let Some(seed) = &config.seed else {
        return Ok(0);
    };
    for fleet in &seed.fleets {
        store.put_fleet(fleet)?;
    }
    let mut created = 0;
    for instance in &seed.instances {
        match store.create_instance(instance) {
            Ok(_) => created += 1,
            Err(StateError::AlreadyExists(uid)) => {
                info!(%uid, "seed instance already present");
            }
            Err(e) => return Err(e.into()),
        }
    }
    info!(fleets = seed.fleets.len(), instances = created, "seed objects written");
    Ok(created)
}
