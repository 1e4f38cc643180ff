//! Test doubles for the scheduler's service seams.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::{ModelCatalog, ModelSpec};
use crate::error::{GatewayError, Result};
use crate::scheduler::spawn::{ModelProcess, ProcessSpawner};
use crate::telemetry::GpuTelemetry;

/// Build a catalog from `(name, spawn_command, vram)` triples.
pub fn catalog(models: &[(&str, Option<&str>, Option<u64>)]) -> Arc<ModelCatalog> {
    let specs = models
        .iter()
        .map(|(name, command, vram)| ModelSpec {
            name: name.to_string(),
            upstream: format!("http://127.0.0.1:1/{}", name),
            spawn_command: command.map(str::to_string),
            vram_estimate_mib: *vram,
        })
        .collect();
    Arc::new(ModelCatalog::new(specs))
}

/// In-memory telemetry with mutable used-VRAM readings.
pub struct FakeTelemetry {
    total: Vec<u64>,
    used: Mutex<Vec<u64>>,
}

impl FakeTelemetry {
    pub fn new(total: Vec<u64>, used: Vec<u64>) -> Arc<Self> {
        Arc::new(Self {
            total,
            used: Mutex::new(used),
        })
    }

    pub fn add_used(&self, gpu: usize, mib: u64) {
        let mut used = self.used.lock().unwrap();
        used[gpu] += mib;
    }

    pub fn sub_used(&self, gpu: usize, mib: u64) {
        let mut used = self.used.lock().unwrap();
        used[gpu] = used[gpu].saturating_sub(mib);
    }
}

impl GpuTelemetry for FakeTelemetry {
    fn total_mib(&self) -> Result<Vec<u64>> {
        Ok(self.total.clone())
    }

    fn used_mib(&self) -> Result<Vec<u64>> {
        Ok(self.used.lock().unwrap().clone())
    }

    fn free_mib(&self) -> Result<Vec<u64>> {
        let used = self.used.lock().unwrap();
        Ok(self
            .total
            .iter()
            .zip(used.iter())
            .map(|(total, used)| total.saturating_sub(*used))
            .collect())
    }
}

/// Spawner that records spawns and simulates VRAM allocation.
///
/// Each spawn pops the next scripted `(gpu, mib)` rise and applies it to the
/// fake telemetry; terminating the returned process gives it back, so
/// evictions are visible in later readings.
pub struct FakeSpawner {
    telemetry: Arc<FakeTelemetry>,
    rises: Mutex<VecDeque<(usize, u64)>>,
    spawned: Mutex<Vec<String>>,
    terminated: Arc<Mutex<Vec<String>>>,
}

impl FakeSpawner {
    pub fn new(telemetry: Arc<FakeTelemetry>, rises: Vec<(usize, u64)>) -> Arc<Self> {
        Arc::new(Self {
            telemetry,
            rises: Mutex::new(rises.into()),
            spawned: Mutex::new(Vec::new()),
            terminated: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    /// Commands whose processes have been terminated, in order.
    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, command: &str) -> Result<Box<dyn ModelProcess>> {
        self.spawned.lock().unwrap().push(command.to_string());
        let rise = self.rises.lock().unwrap().pop_front();
        if let Some((gpu, mib)) = rise {
            self.telemetry.add_used(gpu, mib);
        }
        Ok(Box::new(FakeProcess {
            command: command.to_string(),
            rise,
            telemetry: self.telemetry.clone(),
            terminated: self.terminated.clone(),
        }))
    }
}

struct FakeProcess {
    command: String,
    rise: Option<(usize, u64)>,
    telemetry: Arc<FakeTelemetry>,
    terminated: Arc<Mutex<Vec<String>>>,
}

impl ModelProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn terminate(&mut self) {
        if let Some((gpu, mib)) = self.rise.take() {
            self.telemetry.sub_used(gpu, mib);
        }
        self.terminated.lock().unwrap().push(self.command.clone());
    }
}

/// Spawner whose every spawn fails.
pub struct FailingSpawner;

impl ProcessSpawner for FailingSpawner {
    fn spawn(&self, command: &str) -> Result<Box<dyn ModelProcess>> {
        Err(GatewayError::SpawnFailed(format!("{:?}: simulated", command)))
    }
}
