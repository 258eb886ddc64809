//! Cooldown Policy
//! Pure arithmetic from fetch outcome to sleep interval.

use serde::{Deserialize, Serialize};

use crate::config::FrontierConfig;

/// Maximum exponent for 403/429 escalation
const MAX_BACKOFF_EXP: u32 = 8;

/// Repeated-404 count at which the long cooldown kicks in
const NOTFOUND_REPEAT_THRESHOLD: u32 = 3;

/// An assigned cooldown on a URL record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cooldown {
    pub next_retry_ts: i64,
    pub reason: String,
    pub seconds: i64,
}

impl Cooldown {
    pub fn active_at(&self, now_ts: i64) -> bool {
        now_ts < self.next_retry_ts
    }
}

/// Cooldown seconds and reason for a terminal fetch outcome.
/// `None` means the outcome clears any existing cooldown (2xx/3xx).
pub fn cooldown_for(
    status: u16,
    fetch_count: u32,
    notfound_count: u32,
    cfg: &FrontierConfig,
) -> Option<(i64, &'static str)> {
    match status {
        200..=399 => None,
        404 => {
            if notfound_count >= NOTFOUND_REPEAT_THRESHOLD {
                Some((cfg.cooldown_404_repeat_secs, "404_not_found_repeat"))
            } else {
                Some((cfg.cooldown_404_secs, "404_not_found"))
            }
        }
        410 => Some((cfg.cooldown_410_secs, "410_gone")),
        451 => Some((cfg.cooldown_410_secs, "451_blocked")),
        403 => Some((
            escalate(cfg.cooldown_403_base_secs, fetch_count),
            "403_forbidden",
        )),
        429 => Some((
            escalate(cfg.cooldown_429_base_secs, fetch_count),
            "429_rate_limited",
        )),
        0 => Some((cfg.cooldown_timeout_secs, "network_timeout")),
        500..=599 => Some((cfg.cooldown_timeout_secs, "server_error")),
        _ => Some((cfg.cooldown_timeout_secs, "unexpected_status")),
    }
}

/// base × 2^min(fetch_count−1, 8)
fn escalate(base_secs: i64, fetch_count: u32) -> i64 {
    let exp = fetch_count.saturating_sub(1).min(MAX_BACKOFF_EXP);
    base_secs.saturating_mul(1i64 << exp)
}
