//! In-memory record of which models are resident on which GPU.
//!
//! An entry exists if and only if its backend process is believed alive and
//! holding VRAM on its GPU. The table exclusively owns each process handle;
//! `snapshot` hands out handle-free copies so the planner never touches (or
//! locks) the live entries during a solve.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::scheduler::spawn::ModelProcess;

/// A live entry. Created right after spawn, destroyed on eviction.
pub struct ResidencyEntry {
    pub process: Box<dyn ModelProcess>,
    pub gpu: usize,
    pub last_used: Instant,
}

/// Handle-free copy of an entry, safe to hold across a planner solve.
#[derive(Debug, Clone)]
pub struct ResidentModel {
    pub name: String,
    pub gpu: usize,
    pub last_used: Instant,
}

/// Thread-safe model-name → residency store.
#[derive(Default)]
pub struct ResidencyTable {
    inner: Mutex<HashMap<String, ResidencyEntry>>,
}

impl ResidencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<ResidentModel> {
        self.lock().get(name).map(|entry| ResidentModel {
            name: name.to_string(),
            gpu: entry.gpu,
            last_used: entry.last_used,
        })
    }

    pub fn insert(&self, name: String, entry: ResidencyEntry) {
        self.lock().insert(name, entry);
    }

    /// Remove an entry, handing its process handle back for termination.
    pub fn remove(&self, name: &str) -> Option<ResidencyEntry> {
        self.lock().remove(name)
    }

    /// Refresh `last_used`. Never moves the timestamp backwards; no-op for
    /// models that are not resident.
    pub fn touch(&self, name: &str, now: Instant) {
        if let Some(entry) = self.lock().get_mut(name) {
            if now > entry.last_used {
                entry.last_used = now;
            }
        }
    }

    /// Stable copy of all entries for the planner.
    pub fn snapshot(&self) -> Vec<ResidentModel> {
        self.lock()
            .iter()
            .map(|(name, entry)| ResidentModel {
                name: name.clone(),
                gpu: entry.gpu,
                last_used: entry.last_used,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every entry out of the table (shutdown sweep).
    pub fn drain(&self) -> Vec<(String, ResidencyEntry)> {
        self.lock().drain().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ResidencyEntry>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NullProcess;

    impl ModelProcess for NullProcess {
        fn id(&self) -> Option<u32> {
            None
        }
        fn terminate(&mut self) {}
    }

    fn entry(gpu: usize) -> ResidencyEntry {
        ResidencyEntry {
            process: Box::new(NullProcess),
            gpu,
            last_used: Instant::now(),
        }
    }

    #[test]
    fn test_insert_and_remove() {
        let table = ResidencyTable::new();
        assert!(table.is_empty());

        table.insert("a".into(), entry(0));
        assert!(table.contains("a"));
        assert_eq!(table.get("a").unwrap().gpu, 0);
        assert_eq!(table.len(), 1);

        assert!(table.remove("a").is_some());
        assert!(table.remove("a").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_touch_is_monotonic() {
        let table = ResidencyTable::new();
        table.insert("a".into(), entry(0));
        let loaded_at = table.get("a").unwrap().last_used;

        // An earlier timestamp must not move last_used backwards.
        table.touch("a", loaded_at - Duration::from_secs(5));
        assert_eq!(table.get("a").unwrap().last_used, loaded_at);

        let later = loaded_at + Duration::from_secs(5);
        table.touch("a", later);
        assert_eq!(table.get("a").unwrap().last_used, later);

        // Successive touches never decrease.
        table.touch("a", later - Duration::from_secs(1));
        assert_eq!(table.get("a").unwrap().last_used, later);
    }

    #[test]
    fn test_touch_missing_is_noop() {
        let table = ResidencyTable::new();
        table.touch("ghost", Instant::now());
        assert!(table.is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_copy() {
        let table = ResidencyTable::new();
        table.insert("a".into(), entry(0));
        table.insert("b".into(), entry(1));

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);

        table.remove("a");
        // The snapshot is unaffected by later mutation.
        assert_eq!(snapshot.len(), 2);
    }
}
