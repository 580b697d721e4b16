use std::time::Duration;

use super::config::Stage;
use super::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear VU target over elapsed run time.
///
/// Stages are laid end to end starting from a target of 0. Within a stage the
/// target moves linearly from the previous stage's target to its own, reaching
/// it exactly at the stage end. Once the last stage is over the target is 0.
#[derive(Debug, Clone)]
pub struct StageSchedule {
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl StageSchedule {
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::EmptyStages);
        }
        if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(Error::ZeroStageDuration { index });
        }

        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Ok(Self {
            stages,
            cumulative_ends,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Highest target any stage asks for.
    pub fn peak_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.is_done(elapsed) {
            return 0;
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end) = self.bounds(idx);
        let start_target = self.start_target(idx);
        let end_target = self.stages[idx].target;

        let stage_duration = stage_end.saturating_sub(stage_start).as_secs_f64();
        let stage_elapsed = elapsed.saturating_sub(stage_start).as_secs_f64();
        let frac = (stage_elapsed / stage_duration).clamp(0.0, 1.0);

        let start_f = start_target as f64;
        let end_f = end_target as f64;
        let cur = start_f + (end_f - start_f) * frac;

        // `round` goes half away from zero; the clamp keeps float error inside the stage's range.
        let lo = start_f.min(end_f);
        let hi = start_f.max(end_f);
        cur.round().clamp(lo, hi) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> StageSnapshot {
        let total = self.total_duration();
        let clamped = elapsed.min(total);

        let idx = if clamped >= total {
            self.stages.len().saturating_sub(1)
        } else {
            self.stage_index(clamped)
        };

        let (stage_start, stage_end) = self.bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);
        let stage_remaining = stage_duration.saturating_sub(stage_elapsed);

        StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining,
            start_target: self.start_target(idx),
            end_target: self.stages[idx].target,
            current_target: self.target_at(elapsed),
        }
    }

    // Index of the stage whose `[start, end)` contains `elapsed`.
    // Caller ensures `elapsed < total`.
    fn stage_index(&self, elapsed: Duration) -> usize {
        match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) => i + 1,
            Err(i) => i,
        }
        .min(self.stages.len() - 1)
    }

    fn bounds(&self, idx: usize) -> (Duration, Duration) {
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        (start, self.cumulative_ends[idx])
    }

    fn start_target(&self, idx: usize) -> u64 {
        if idx == 0 {
            0
        } else {
            self.stages[idx - 1].target
        }
    }
}
