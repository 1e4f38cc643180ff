//! Serialized load/unload of backend model processes.
//!
//! Every planning-and-spawn sequence runs under one coarse lock: the planner
//! reads live telemetry and residency together, and two loads planning
//! concurrently would race on VRAM accounting and over-commit a GPU. The lock
//! is released before the request is forwarded upstream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::{ModelCatalog, ModelSpec};
use crate::error::{GatewayError, Result};
use crate::scheduler::estimate::estimate_vram_mib;
use crate::scheduler::planner::{EvictionPlanner, GpuSnapshot, Placement, PlanRequest, ResidentLoad};
use crate::scheduler::residency::{ResidencyEntry, ResidencyTable};
use crate::scheduler::spawn::ProcessSpawner;
use crate::telemetry::GpuTelemetry;

/// A post-spawn rise in used VRAM below this is allocator noise, not the model.
const LEARN_THRESHOLD_MIB: u64 = 300;

/// Safety margin folded into learned footprints.
const LEARN_MARGIN: f64 = 1.05;

pub struct LifecycleController {
    catalog: Arc<ModelCatalog>,
    residency: Arc<ResidencyTable>,
    telemetry: Arc<dyn GpuTelemetry>,
    spawner: Arc<dyn ProcessSpawner>,
    planner: Arc<dyn EvictionPlanner>,
    lock: Mutex<()>,
    settle_poll: Duration,
    settle_window: Duration,
}

impl LifecycleController {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        residency: Arc<ResidencyTable>,
        telemetry: Arc<dyn GpuTelemetry>,
        spawner: Arc<dyn ProcessSpawner>,
        planner: Arc<dyn EvictionPlanner>,
    ) -> Self {
        Self {
            catalog,
            residency,
            telemetry,
            spawner,
            planner,
            lock: Mutex::new(()),
            settle_poll: Duration::from_millis(250),
            settle_window: Duration::from_secs(3),
        }
    }

    /// Override how long to wait for a fresh backend to allocate VRAM before
    /// measuring its footprint.
    pub fn with_settle(mut self, poll: Duration, window: Duration) -> Self {
        self.settle_poll = poll;
        self.settle_window = window;
        self
    }

    /// Make the named model resident, evicting others if needed.
    ///
    /// Returns immediately if it already is. Concurrent calls for the same
    /// unresident model result in exactly one spawn; the rest observe the new
    /// entry once they acquire the lock.
    pub async fn ensure_loaded(&self, name: &str) -> Result<()> {
        let spec = self.catalog.get(name).ok_or(GatewayError::ModelUnknown)?;

        let _guard = self.lock.lock().await;
        if self.residency.contains(name) {
            return Ok(());
        }
        let Some(command) = spec.spawn_command.clone() else {
            // Remote model: nothing to spawn, no VRAM accounted.
            return Ok(());
        };

        let need = vram_requirement(&spec);
        let total = self.telemetry.total_mib()?;
        let used_before = self.telemetry.used_mib()?;
        let free = self.telemetry.free_mib()?;

        tracing::info!("Loading model {} ({} MiB needed)", name, need);

        let max_total = total.iter().copied().max().unwrap_or(0);
        if need > max_total {
            return Err(GatewayError::InsufficientCapacity {
                required: need,
                observed: total,
            });
        }

        let request = PlanRequest {
            need_mib: need,
            gpus: GpuSnapshot {
                total_mib: total,
                used_mib: used_before.clone(),
                free_mib: free,
            },
            residents: self.resident_loads(),
        };
        let Placement { gpu, evictions } = self.planner.plan(&request)?;
        for victim in &evictions {
            self.evict_locked(victim);
        }

        let process = self.spawner.spawn(&command)?;
        self.residency.insert(
            name.to_string(),
            ResidencyEntry {
                process,
                gpu,
                last_used: Instant::now(),
            },
        );
        tracing::info!("Model {} resident on GPU {}", name, gpu);

        if let Some(&before) = used_before.get(gpu) {
            self.learn_footprint(name, gpu, before).await;
        }
        Ok(())
    }

    /// Terminate a resident model's backend and drop its entry. No-op if the
    /// model is not resident.
    pub async fn evict(&self, name: &str) {
        let _guard = self.lock.lock().await;
        self.evict_locked(name);
    }

    /// Refresh a resident model's last-used timestamp.
    pub fn mark_used(&self, name: &str, now: Instant) {
        self.residency.touch(name, now);
    }

    /// Terminate every resident backend. Called once at shutdown.
    pub fn shutdown(&self) {
        for (name, mut entry) in self.residency.drain() {
            entry.process.terminate();
            tracing::info!("Unloaded model {} (shutdown)", name);
        }
    }

    fn evict_locked(&self, name: &str) {
        let Some(mut entry) = self.residency.remove(name) else {
            return;
        };
        entry.process.terminate();
        tracing::info!("Unloaded model {}", name);
    }

    /// Residency snapshot enriched with footprint estimates and ages.
    fn resident_loads(&self) -> Vec<ResidentLoad> {
        let now = Instant::now();
        self.residency
            .snapshot()
            .into_iter()
            .map(|resident| {
                let vram_mib = self
                    .catalog
                    .get(&resident.name)
                    .map(|spec| vram_requirement(&spec))
                    .unwrap_or_else(|| estimate_vram_mib(&resident.name));
                ResidentLoad {
                    age_secs: now.duration_since(resident.last_used).as_secs_f64(),
                    name: resident.name,
                    gpu: resident.gpu,
                    vram_mib,
                }
            })
            .collect()
    }

    /// Watch the target GPU until the fresh backend has visibly allocated,
    /// then record the measured footprint in the catalog.
    ///
    /// The backend needs a moment to start allocating, so a single immediate
    /// reading would mostly miss it; poll within a bounded window instead.
    async fn learn_footprint(&self, name: &str, gpu: usize, used_before: u64) {
        let deadline = Instant::now() + self.settle_window;
        loop {
            tokio::time::sleep(self.settle_poll).await;
            let used_now = match self.telemetry.used_mib() {
                Ok(used) => used,
                Err(e) => {
                    tracing::warn!("Skipping footprint measurement for {}: {}", name, e);
                    return;
                }
            };
            let Some(&now_mib) = used_now.get(gpu) else {
                return;
            };

            let delta = now_mib.saturating_sub(used_before);
            if delta > LEARN_THRESHOLD_MIB {
                let learned = ((delta as f64) * LEARN_MARGIN).ceil() as u64;
                self.catalog.update_vram(name, learned);
                tracing::info!("Model {} used {} MiB; learned estimate {} MiB", name, delta, learned);
                return;
            }
            if Instant::now() >= deadline {
                tracing::debug!("No VRAM rise observed for {} within the settle window", name);
                return;
            }
        }
    }
}

/// Configured or name-derived VRAM requirement in MiB.
pub fn vram_requirement(spec: &ModelSpec) -> u64 {
    spec.vram_estimate_mib
        .unwrap_or_else(|| estimate_vram_mib(&spec.name))
}
