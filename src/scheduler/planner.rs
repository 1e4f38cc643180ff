//! Placement-and-eviction planning.
//!
//! Given a VRAM need, a residency snapshot and fresh telemetry, choose a
//! target GPU and a minimum-cost set of models to evict. Choosing the GPU and
//! the victims jointly matters: greedy per-GPU LRU can evict more models than
//! necessary or settle on a worse GPU, so the primary strategy formulates the
//! decision as a small integer program. A greedy strategy is kept as a
//! solver-free fallback.

use std::sync::mpsc;
use std::time::Duration;

use good_lp::{constraint, variable, Expression, ProblemVariables, Solution, SolverModel};

use crate::error::{GatewayError, Result};

/// Fresh per-GPU memory readings in MiB. Produced per decision, never cached.
#[derive(Debug, Clone)]
pub struct GpuSnapshot {
    pub total_mib: Vec<u64>,
    pub used_mib: Vec<u64>,
    pub free_mib: Vec<u64>,
}

/// A resident model as the planner sees it: no process handle, just its GPU,
/// estimated footprint, and how long ago it last served a request.
#[derive(Debug, Clone)]
pub struct ResidentLoad {
    pub name: String,
    pub gpu: usize,
    pub vram_mib: u64,
    pub age_secs: f64,
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub need_mib: u64,
    pub gpus: GpuSnapshot,
    pub residents: Vec<ResidentLoad>,
}

/// Planner verdict: load onto `gpu` after evicting `evictions`.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub gpu: usize,
    pub evictions: Vec<String>,
}

pub trait EvictionPlanner: Send + Sync {
    fn plan(&self, request: &PlanRequest) -> Result<Placement>;
}

/// Objective weight per eviction. Large against ages measured in seconds, so
/// the solver minimizes the eviction count first and breaks ties by evicting
/// the least-recently-used models.
const EVICTION_COST: f64 = 1_000.0;

/// Wall-clock budget for one solve.
const SOLVE_BUDGET: Duration = Duration::from_millis(1_500);

/// Lowest-index GPU that already fits the need, if any.
fn fits_without_eviction(request: &PlanRequest) -> Option<usize> {
    request
        .gpus
        .free_mib
        .iter()
        .position(|&free| free >= request.need_mib)
}

/// Primary strategy: joint GPU-selection and victim-selection as an ILP.
pub struct IlpPlanner;

impl EvictionPlanner for IlpPlanner {
    fn plan(&self, request: &PlanRequest) -> Result<Placement> {
        if let Some(gpu) = fits_without_eviction(request) {
            return Ok(Placement {
                gpu,
                evictions: Vec::new(),
            });
        }

        // The backend has no time-limit hook, so solve on a worker thread and
        // bound the wait. A solve that overruns is abandoned.
        let owned = request.clone();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(solve(&owned));
        });
        match rx.recv_timeout(SOLVE_BUDGET) {
            Ok(placement) => placement,
            Err(_) => Err(GatewayError::EvictionInfeasible(
                "solver exceeded its 1.5s budget".to_string(),
            )),
        }
    }
}

fn solve(request: &PlanRequest) -> Result<Placement> {
    let gpu_count = request.gpus.total_mib.len();
    let need = request.need_mib as f64;
    let mut vars = ProblemVariables::new();

    // x_m = 1 ⇔ evict resident m.
    let evict: Vec<_> = request
        .residents
        .iter()
        .map(|_| vars.add(variable().binary()))
        .collect();
    // y_i = 1 ⇔ GPU i receives the new model.
    let select: Vec<_> = (0..gpu_count)
        .map(|_| vars.add(variable().binary()))
        .collect();
    // Used VRAM on GPU i after evictions, bounded to the physical range.
    let used_after: Vec<_> = request
        .gpus
        .total_mib
        .iter()
        .map(|&total| vars.add(variable().integer().min(0).max(total as f64)))
        .collect();

    // minimize 1000·Σx − Σ x·age: fewest evictions, then least-recently-used.
    let objective = request
        .residents
        .iter()
        .zip(&evict)
        .fold(Expression::from(0.0), |acc, (resident, &x)| {
            acc + (EVICTION_COST - resident.age_secs) * x
        });

    let selector_sum = select
        .iter()
        .fold(Expression::from(0.0), |acc, &y| acc + y);

    let mut model = vars
        .minimise(objective)
        .using(good_lp::microlp)
        .with(constraint!(selector_sum == 1.0));

    for gpu in 0..gpu_count {
        let total = request.gpus.total_mib[gpu] as f64;
        let used = request.gpus.used_mib[gpu] as f64;

        let on_gpu = || {
            request
                .residents
                .iter()
                .zip(&evict)
                .filter(move |(resident, _)| resident.gpu == gpu)
        };

        // Used VRAM not attributable to gateway-owned processes. May go
        // negative when estimates overshoot; the variable floor clamps it.
        let owned_mib: f64 = on_gpu().map(|(r, _)| r.vram_mib as f64).sum();
        let mystery = used - owned_mib;

        // What remains after evictions: live reading minus evicted footprints.
        let remaining = on_gpu().fold(Expression::from(used), |acc, (resident, &x)| {
            acc - (resident.vram_mib as f64) * x
        });
        model = model.with(constraint!(used_after[gpu] >= remaining));
        // Mystery VRAM is an immovable floor.
        model = model.with(constraint!(used_after[gpu] >= mystery));

        // Indicator g = i ⇒ free_i ≥ D, big-M encoded. free_i is never
        // negative, so M = D suffices.
        model = model.with(constraint!(total - used_after[gpu] >= need * select[gpu]));
    }

    let solution = model
        .solve()
        .map_err(|e| GatewayError::EvictionInfeasible(e.to_string()))?;

    let gpu = select
        .iter()
        .position(|&y| solution.value(y) > 0.5)
        .ok_or_else(|| GatewayError::EvictionInfeasible("no GPU selected".to_string()))?;
    let evictions = request
        .residents
        .iter()
        .zip(&evict)
        .filter(|(_, &x)| solution.value(x) > 0.5)
        .map(|(resident, _)| resident.name.clone())
        .collect();

    Ok(Placement { gpu, evictions })
}

/// Fallback strategy: per GPU, evict least-recently-used models until the
/// need fits, then take the GPU requiring the fewest evictions (ties broken
/// toward the most aged victim set).
pub struct GreedyPlanner;

impl EvictionPlanner for GreedyPlanner {
    fn plan(&self, request: &PlanRequest) -> Result<Placement> {
        if let Some(gpu) = fits_without_eviction(request) {
            return Ok(Placement {
                gpu,
                evictions: Vec::new(),
            });
        }

        let mut best: Option<(usize, Vec<String>, f64)> = None;
        for gpu in 0..request.gpus.total_mib.len() {
            let total = request.gpus.total_mib[gpu];
            let used = request.gpus.used_mib[gpu];

            let mut candidates: Vec<&ResidentLoad> = request
                .residents
                .iter()
                .filter(|r| r.gpu == gpu)
                .collect();
            // Most stale first.
            candidates.sort_by(|a, b| b.age_secs.total_cmp(&a.age_secs));

            let owned: u64 = candidates.iter().map(|r| r.vram_mib).sum();
            let floor = used.saturating_sub(owned);

            let mut victims = Vec::new();
            let mut age_sum = 0.0;
            let mut reclaimed = 0u64;
            let mut candidates = candidates.into_iter();
            loop {
                let used_after = used.saturating_sub(reclaimed).max(floor);
                if total.saturating_sub(used_after) >= request.need_mib {
                    let better = match &best {
                        None => true,
                        Some((_, best_victims, best_age)) => {
                            victims.len() < best_victims.len()
                                || (victims.len() == best_victims.len() && age_sum > *best_age)
                        }
                    };
                    if better {
                        best = Some((gpu, victims.clone(), age_sum));
                    }
                    break;
                }
                match candidates.next() {
                    Some(victim) => {
                        reclaimed += victim.vram_mib;
                        age_sum += victim.age_secs;
                        victims.push(victim.name.clone());
                    }
                    None => break,
                }
            }
        }

        match best {
            Some((gpu, evictions, _)) => Ok(Placement { gpu, evictions }),
            None => Err(GatewayError::EvictionInfeasible(
                "no GPU can fit the model even after evicting everything".to_string(),
            )),
        }
    }
}
