//! VRAM footprint estimation from model names.
//!
//! Models are commonly named after their parameter count ("llama-7b",
//! "foo-500k"). Assuming ~1 byte per parameter after quantization, that count
//! doubles as a memory estimate. The number is truncated to an integer before
//! scaling, and the result is used directly as MiB; callers never re-scale.

use std::sync::LazyLock;

use regex::Regex;

/// Fallback when the name carries no parameter-count token.
const DEFAULT_ESTIMATE_MIB: u64 = 8_000;

/// First decimal number (underscore or dot as separator) immediately followed
/// by a `b`/`B` or `k`/`K` suffix.
static PARAM_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[._]\d+)?)([bkBK])").expect("param token regex"));

/// Estimate a model's VRAM footprint in MiB from its name.
pub fn estimate_vram_mib(model_name: &str) -> u64 {
    let Some(caps) = PARAM_TOKEN.captures(model_name) else {
        return DEFAULT_ESTIMATE_MIB;
    };

    let number: f64 = caps[1].replace('_', ".").parse().unwrap_or_default();
    let multiplier: u64 = match &caps[2] {
        "b" | "B" => 1_000_000_000,
        _ => 1_000,
    };

    (number.trunc() as u64) * multiplier
}
