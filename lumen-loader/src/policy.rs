//! Retry gating and tier escalation.

use serde::Serialize;

/// Escalation level of a load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Original URI, untouched.
    Direct,
    /// Original URI plus a fresh `_t` query parameter.
    CacheBusted,
    /// Fetched, recompressed and served from a local object reference.
    Recompressed,
}

impl Tier {
    pub fn number(self) -> u8 {
        match self {
            Tier::Direct => 1,
            Tier::CacheBusted => 2,
            Tier::Recompressed => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// Tier for the next attempt; meaningless when `should_retry` is false.
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    ceiling: u32,
    allow_recompression: bool,
}

impl RetryPolicy {
    pub const DEFAULT_CEILING: u32 = 3;

    /// A ceiling of zero behaves like one: the direct attempt always happens.
    pub fn new(ceiling: u32, allow_recompression: bool) -> Self {
        Self {
            ceiling: ceiling.max(1),
            allow_recompression,
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Tier used for the 1-based `attempt`.
    pub fn tier_for(&self, attempt: u32) -> Tier {
        match attempt {
            0 | 1 => Tier::Direct,
            2 => Tier::CacheBusted,
            _ if self.allow_recompression => Tier::Recompressed,
            _ => Tier::CacheBusted,
        }
    }

    /// Decide what follows the failure of `failed_attempt`.
    ///
    /// The recompression tier is never retried.
    pub fn next_tier(&self, failed_attempt: u32) -> RetryDecision {
        let failed_tier = self.tier_for(failed_attempt);
        RetryDecision {
            should_retry: failed_attempt < self.ceiling && failed_tier != Tier::Recompressed,
            tier: self.tier_for(failed_attempt.saturating_add(1)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CEILING, true)
    }
}

/// `next_tier` for a policy that allows recompression.
pub fn next_tier(attempt_number: u32, ceiling: u32) -> RetryDecision {
    RetryPolicy::new(ceiling, true).next_tier(attempt_number)
}
