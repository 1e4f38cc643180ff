//! The resident-model scheduler: VRAM estimation, placement-and-eviction
//! planning, the residency table, and the lifecycle controller that ties them
//! together under one lock.

pub mod estimate;
pub mod lifecycle;
pub mod planner;
pub mod residency;
pub mod spawn;
