//! GPU-aware model-serving gateway.
//!
//! Presents an OpenAI-compatible HTTP surface (completions, chat, embeddings,
//! moderations, model listing) and transparently dispatches each request to a
//! backend inference process. Backends compete for scarce VRAM, so the
//! gateway loads and evicts model processes on demand: per-GPU telemetry is
//! probed fresh, footprints are estimated (and learned), and evictions are
//! planned jointly with GPU selection so the fewest, least-recently-used
//! models get terminated.

pub mod config;
pub mod error;
pub mod forward;
pub mod scheduler;
pub mod server;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testutil;
