use serde::{Deserialize, Serialize};

use crate::engine::Engine;

/// Learned compile statistics for one engine under one preamble fingerprint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineStats {
    pub engine: Engine,
    pub compile_count: u32,
    pub running_avg_ms: f64,
    pub running_success_rate: f64,
    pub last_used_ms: u64,
}

impl EngineStats {
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            compile_count: 0,
            running_avg_ms: 0.0,
            running_success_rate: 0.0,
            last_used_ms: 0,
        }
    }

    /// Fold one compile into the running means: incremental mean for the
    /// elapsed time, Bernoulli mean for the success flag.
    pub fn record(&mut self, success: bool, time_ms: f64, now_ms: u64) {
        self.compile_count += 1;
        let n = f64::from(self.compile_count);
        self.running_avg_ms += (time_ms - self.running_avg_ms) / n;
        let outcome = if success { 1.0 } else { 0.0 };
        self.running_success_rate += (outcome - self.running_success_rate) / n;
        self.last_used_ms = now_ms;
    }

    /// An entry is trusted once it has at least two compiles behind it and
    /// succeeds more often than not.
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.compile_count >= 2 && self.running_success_rate > 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tracks_incremental_means() {
        let mut stats = EngineStats::new(Engine::Pdflatex);
        stats.record(true, 100.0, 1);
        stats.record(true, 300.0, 2);
        assert_eq!(stats.compile_count, 2);
        assert!((stats.running_avg_ms - 200.0).abs() < f64::EPSILON);
        assert!((stats.running_success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.last_used_ms, 2);
    }

    #[test]
    fn success_rate_is_a_bernoulli_mean() {
        let mut stats = EngineStats::new(Engine::Xelatex);
        stats.record(true, 10.0, 1);
        stats.record(false, 10.0, 2);
        stats.record(false, 10.0, 3);
        stats.record(true, 10.0, 4);
        assert!((stats.running_success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn reliability_needs_two_compiles_and_majority_success() {
        let mut stats = EngineStats::new(Engine::Pdflatex);
        stats.record(true, 10.0, 1);
        assert!(!stats.is_reliable());
        stats.record(true, 10.0, 2);
        assert!(stats.is_reliable());

        let mut flaky = EngineStats::new(Engine::Lualatex);
        flaky.record(false, 10.0, 1);
        flaky.record(true, 10.0, 2);
        assert!(!flaky.is_reliable());
    }
}
