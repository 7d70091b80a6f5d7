//! Admission policy deciding whether a freshly computed result is worth
//! caching (C4). Four named strategies, selected by [`crate::config::StrategyKind`].

use crate::model::{CostScope, ProfilingData};

/// Decides whether to cache a result given its cost profile and size.
pub trait CachingStrategy: Send + Sync {
    fn do_cache(&self, profile: &ProfilingData, bytes: u64) -> bool;
}

/// Never admits anything.
pub struct NeverCache;

impl CachingStrategy for NeverCache {
    fn do_cache(&self, _profile: &ProfilingData, _bytes: u64) -> bool {
        false
    }
}

/// Admits everything.
pub struct AlwaysCache;

impl CachingStrategy for AlwaysCache {
    fn do_cache(&self, _profile: &ProfilingData, _bytes: u64) -> bool {
        true
    }
}

/// Admits iff the uncached cost of the subtree meets a single threshold.
pub struct SimpleStrategy {
    pub threshold: f64,
}

impl CachingStrategy for SimpleStrategy {
    fn do_cache(&self, profile: &ProfilingData, bytes: u64) -> bool {
        profile.cost(CostScope::Uncached, bytes) >= self.threshold
    }
}

/// Admits if either the operator's own cost already clears a low immediate
/// bar, or the uncached subtree cost clears a higher stacked bar -- cheap
/// individually-expensive operators get cached right away, others only once
/// enough uncached work has accumulated beneath them.
pub struct TwostepStrategy {
    pub stacked_threshold: f64,
    pub immediate_threshold: f64,
}

impl CachingStrategy for TwostepStrategy {
    fn do_cache(&self, profile: &ProfilingData, bytes: u64) -> bool {
        profile.cost(CostScope::Own, bytes) >= self.immediate_threshold
            || profile.cost(CostScope::Uncached, bytes) >= self.stacked_threshold
    }
}

/// Build the configured strategy.
pub fn from_config(cfg: &crate::config::CacheConfig) -> Box<dyn CachingStrategy> {
    use crate::config::StrategyKind;
    match cfg.strategy {
        StrategyKind::Never => Box::new(NeverCache),
        StrategyKind::Always => Box::new(AlwaysCache),
        StrategyKind::Simple => Box::new(SimpleStrategy {
            threshold: cfg.strategy_simple.threshold,
        }),
        StrategyKind::Twostep => Box::new(TwostepStrategy {
            stacked_threshold: cfg.strategy_twostep.stacked,
            immediate_threshold: cfg.strategy_twostep.immediate,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with_uncached_cpu(cpu: f64) -> ProfilingData {
        ProfilingData {
            own_cpu: cpu,
            own_gpu: 0.0,
            own_io: 0.0,
            subtree_cpu: cpu,
            subtree_gpu: 0.0,
            subtree_io: 0.0,
            uncached_cpu: cpu,
            uncached_gpu: 0.0,
            uncached_io: 0.0,
        }
    }

    #[test]
    fn never_and_always_ignore_input() {
        let p = profile_with_uncached_cpu(0.0);
        assert!(!NeverCache.do_cache(&p, 1));
        assert!(AlwaysCache.do_cache(&p, 1));
    }

    #[test]
    fn simple_strategy_is_monotone_in_cost_and_bytes() {
        let strategy = SimpleStrategy { threshold: 0.5 };
        let cheap = profile_with_uncached_cpu(1.0);
        let expensive = profile_with_uncached_cpu(1_000_000.0);

        // Higher cost at the same byte count must still admit.
        assert!(strategy.do_cache(&cheap, 10));
        assert!(strategy.do_cache(&expensive, 10));
        // Same cost but far more bytes drives cost below threshold.
        assert!(!strategy.do_cache(&cheap, 1_000_000_000));
    }

    #[test]
    fn twostep_admits_on_either_immediate_or_stacked_threshold() {
        let strategy = TwostepStrategy {
            stacked_threshold: 10.0,
            immediate_threshold: 1_000.0,
        };
        let cheap = profile_with_uncached_cpu(1.0);
        assert!(!strategy.do_cache(&cheap, 1_000_000));

        // Cheap on its own (own_cpu low) but expensive once uncached work
        // below it accumulates (uncached_cpu high): admitted via the
        // stacked threshold even though the immediate one never fires.
        let stacked_only = ProfilingData {
            own_cpu: 0.0,
            own_gpu: 0.0,
            own_io: 0.0,
            subtree_cpu: 0.0,
            subtree_gpu: 0.0,
            subtree_io: 0.0,
            uncached_cpu: 60_000_000.0,
            uncached_gpu: 0.0,
            uncached_io: 0.0,
        };
        assert!(!strategy.do_cache(&stacked_only, 2_000_000_000_000_000));
        assert!(strategy.do_cache(&stacked_only, 1));
    }
}
