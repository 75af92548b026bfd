//! `fleetd check-config`: load a config file, validate it, and render the
//! effective settings.

use std::path::Path;

use fleet_core::FleetdConfig;

#[derive(Debug)]
pub struct ConfigReport {
    /// The parsed config, re-serialised as TOML or JSON.
    pub rendered: String,
    /// One-line account of the resolved settings.
    pub summary: String,
}

pub fn check_config(path: &Path, json: bool) -> anyhow::Result<ConfigReport> {
    let config = FleetdConfig::from_file(path)?;
    let settings = config.scheduler_settings()?;

    let rendered = if json {
        serde_json::to_string_pretty(&config)?
    } else {
        config.to_toml_string()?
    };

    let seed = config.seed.as_ref();
    let summary = format!(
        "ok: sweep={:?} bind_retry={:?} poll={:?} resync_polls={} queue_capacity={} seed_fleets={} seed_instances={}",
        settings.sweep_interval,
        settings.bind_retry,
        settings.poll_interval,
        settings.resync_polls,
        settings.queue_capacity,
        seed.map_or(0, |s| s.fleets.len()),
        seed.map_or(0, |s| s.instances.len()),
    );
    Ok(ConfigReport { rendered, summary })
}
