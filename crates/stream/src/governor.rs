use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load-shedding level chosen by the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GovernorState {
    #[default]
    Normal,
    DetailReduced,
    EmergencyShedding,
}

impl GovernorState {
    fn cooler(self) -> Self {
        match self {
            GovernorState::EmergencyShedding => GovernorState::DetailReduced,
            _ => GovernorState::Normal,
        }
    }
}

/// A single state change reported by [`PerformanceGovernor::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorTransition {
    pub from: GovernorState,
    pub to: GovernorState,
}

/// Thresholds are ratios of rolling work time to the per-tick budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Number of samples in the rolling window.
    pub window: usize,
    pub detail_enter_ratio: f64,
    pub detail_enter_samples: usize,
    pub emergency_enter_ratio: f64,
    pub emergency_enter_samples: usize,
    /// DetailReduced falls back to Normal below this ratio.
    pub detail_recover_ratio: f64,
    /// EmergencyShedding falls back to DetailReduced below this ratio.
    pub emergency_recover_ratio: f64,
    pub recover_samples: usize,
    pub detail_cooldown_ticks: u32,
    pub emergency_cooldown_ticks: u32,
    /// Fraction of resident tiles evicted on entering EmergencyShedding.
    pub emergency_shed_fraction: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            window: 30,
            detail_enter_ratio: 0.8,
            detail_enter_samples: 5,
            emergency_enter_ratio: 1.2,
            emergency_enter_samples: 3,
            detail_recover_ratio: 0.6,
            emergency_recover_ratio: 0.9,
            recover_samples: 10,
            detail_cooldown_ticks: 60,
            emergency_cooldown_ticks: 120,
            emergency_shed_fraction: 0.25,
        }
    }
}

/// Fixed-capacity ring of recent durations.
#[derive(Debug)]
pub struct FrameTimer {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn recorded(&self) -> &[Duration] {
        &self.history[..self.count()]
    }

    pub fn average(&self) -> Duration {
        let samples = self.recorded();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        samples.iter().sum::<Duration>() / samples.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.recorded().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.recorded().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        if self.filled { self.capacity } else { self.index }
    }

    pub fn clear(&mut self) {
        self.index = 0;
        self.filled = false;
    }
}

/// Snapshot of governor timing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernorMetrics {
    pub state: GovernorState,
    pub rolling_frame_ms: f64,
    pub rolling_work_ms: f64,
    /// Rolling work time over the per-tick budget.
    pub usage_ratio: f64,
    pub rolling_fps: f64,
    pub cooldown_remaining: u32,
    pub transitions: u64,
}

/// Watches rolling timing and steps between shedding levels with hysteresis.
///
/// A transition needs a run of consecutive samples past its threshold and an
/// expired cooldown. Every transition moves exactly one level and starts a new
/// cooldown that blocks all further transitions.
#[derive(Debug)]
pub struct PerformanceGovernor {
    config: GovernorConfig,
    budget: Duration,
    frames: FrameTimer,
    work: FrameTimer,
    state: GovernorState,
    cooldown: u32,
    above_detail: usize,
    above_emergency: usize,
    below_detail_recover: usize,
    below_emergency_recover: usize,
    transitions: u64,
}

impl PerformanceGovernor {
    pub fn new(config: GovernorConfig, budget: Duration) -> Self {
        Self {
            frames: FrameTimer::new(config.window),
            work: FrameTimer::new(config.window),
            config,
            budget,
            state: GovernorState::Normal,
            cooldown: 0,
            above_detail: 0,
            above_emergency: 0,
            below_detail_recover: 0,
            below_emergency_recover: 0,
            transitions: 0,
        }
    }

    pub fn state(&self) -> GovernorState {
        self.state
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Rolling work time over the budget. Zero before any sample.
    pub fn usage_ratio(&self) -> f64 {
        let budget = self.budget.as_secs_f64();
        if budget <= 0.0 {
            return 0.0;
        }
        self.work.average().as_secs_f64() / budget
    }

    /// Record one tick: total frame time and the terrain work portion.
    pub fn record(&mut self, frame: Duration, work: Duration) -> Option<GovernorTransition> {
        self.frames.record(frame);
        self.work.record(work);

        let ratio = self.usage_ratio();
        let c = &self.config;
        bump(&mut self.above_detail, ratio > c.detail_enter_ratio);
        bump(&mut self.above_emergency, ratio > c.emergency_enter_ratio);
        bump(&mut self.below_detail_recover, ratio < c.detail_recover_ratio);
        bump(&mut self.below_emergency_recover, ratio < c.emergency_recover_ratio);

        if self.cooldown > 0 {
            self.cooldown -= 1;
            return None;
        }

        let next = match self.state {
            GovernorState::Normal if self.above_detail >= c.detail_enter_samples => {
                GovernorState::DetailReduced
            }
            GovernorState::DetailReduced
                if self.above_emergency >= c.emergency_enter_samples =>
            {
                GovernorState::EmergencyShedding
            }
            GovernorState::DetailReduced if self.below_detail_recover >= c.recover_samples => {
                GovernorState::Normal
            }
            GovernorState::EmergencyShedding
                if self.below_emergency_recover >= c.recover_samples =>
            {
                self.state.cooler()
            }
            _ => return None,
        };
        Some(self.transition(next, ratio))
    }

    fn transition(&mut self, to: GovernorState, ratio: f64) -> GovernorTransition {
        let from = self.state;
        self.state = to;
        self.cooldown = match to {
            GovernorState::EmergencyShedding => self.config.emergency_cooldown_ticks,
            _ => self.config.detail_cooldown_ticks,
        };
        self.above_detail = 0;
        self.above_emergency = 0;
        self.below_detail_recover = 0;
        self.below_emergency_recover = 0;
        self.transitions += 1;
        tracing::info!(?from, ?to, ratio, "governor transition");
        GovernorTransition { from, to }
    }

    pub fn metrics(&self) -> GovernorMetrics {
        let frame = self.frames.average().as_secs_f64();
        GovernorMetrics {
            state: self.state,
            rolling_frame_ms: frame * 1000.0,
            rolling_work_ms: self.work.average().as_secs_f64() * 1000.0,
            usage_ratio: self.usage_ratio(),
            rolling_fps: if frame > 0.0 { 1.0 / frame } else { 0.0 },
            cooldown_remaining: self.cooldown,
            transitions: self.transitions,
        }
    }
}

fn bump(counter: &mut usize, hit: bool) {
    *counter = if hit { *counter + 1 } else { 0 };
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET: Duration = Duration::from_millis(10);

    fn fast_config() -> GovernorConfig {
        GovernorConfig {
            window: 1,
            detail_cooldown_ticks: 4,
            emergency_cooldown_ticks: 6,
            ..GovernorConfig::default()
        }
    }

    fn feed(g: &mut PerformanceGovernor, work_ms: u64, n: usize) -> Vec<GovernorTransition> {
        (0..n)
            .filter_map(|_| {
                g.record(Duration::from_millis(16), Duration::from_millis(work_ms))
            })
            .collect()
    }

    #[test]
    fn frame_timer_tracks_history() {
        let mut timer = FrameTimer::new(3);
        assert_eq!(timer.average(), Duration::ZERO);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(20));
        assert_eq!(timer.max(), Duration::from_millis(30));
        assert_eq!(timer.min(), Duration::from_millis(10));
    }

    #[test]
    fn frame_timer_wraps_around() {
        let mut timer = FrameTimer::new(2);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.average(), Duration::from_millis(25));
        timer.clear();
        assert_eq!(timer.count(), 0);
    }

    #[test]
    fn enters_detail_reduced_after_run() {
        let mut g = PerformanceGovernor::new(fast_config(), BUDGET);
        assert!(feed(&mut g, 9, 4).is_empty());
        let t = feed(&mut g, 9, 1);
        assert_eq!(
            t,
            vec![GovernorTransition {
                from: GovernorState::Normal,
                to: GovernorState::DetailReduced
            }]
        );
    }

    #[test]
    fn interrupted_run_starts_over() {
        let mut g = PerformanceGovernor::new(fast_config(), BUDGET);
        feed(&mut g, 9, 4);
        feed(&mut g, 1, 1);
        assert!(feed(&mut g, 9, 4).is_empty());
        assert_eq!(g.state(), GovernorState::Normal);
    }

    #[test]
    fn never_skips_to_emergency() {
        let mut g = PerformanceGovernor::new(fast_config(), BUDGET);
        let transitions = feed(&mut g, 50, 40);
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].to, GovernorState::DetailReduced);
        assert_eq!(transitions[1].from, GovernorState::DetailReduced);
        assert_eq!(transitions[1].to, GovernorState::EmergencyShedding);
    }

    #[test]
    fn cooldown_blocks_transitions() {
        let config = fast_config();
        let mut g = PerformanceGovernor::new(config.clone(), BUDGET);
        let mut ticks_since = None;
        for _ in 0..60 {
            let t = g.record(Duration::from_millis(16), Duration::from_millis(50));
            if let Some(t) = t {
                if let Some(n) = ticks_since {
                    assert!(n >= config.detail_cooldown_ticks, "transition after {n} ticks");
                }
                assert_ne!(t.to, t.from);
                ticks_since = Some(0);
            } else if let Some(n) = ticks_since.as_mut() {
                *n += 1;
            }
        }
        assert_eq!(g.state(), GovernorState::EmergencyShedding);
        assert_eq!(g.metrics().transitions, 2);
    }

    #[test]
    fn recovers_one_level_at_a_time() {
        let mut g = PerformanceGovernor::new(fast_config(), BUDGET);
        feed(&mut g, 50, 40);
        assert_eq!(g.state(), GovernorState::EmergencyShedding);

        let t = feed(&mut g, 1, 200);
        assert_eq!(t.len(), 2);
        assert_eq!(t[0].to, GovernorState::DetailReduced);
        assert_eq!(t[1].to, GovernorState::Normal);
        assert_eq!(g.state(), GovernorState::Normal);
    }

    #[test]
    fn between_thresholds_holds_state() {
        let mut g = PerformanceGovernor::new(fast_config(), BUDGET);
        feed(&mut g, 9, 10);
        assert_eq!(g.state(), GovernorState::DetailReduced);
        // 7ms: below enter, above recover.
        assert!(feed(&mut g, 7, 100).is_empty());
        assert_eq!(g.state(), GovernorState::DetailReduced);
    }

    #[test]
    fn metrics_report_rolling_values() {
        let mut g = PerformanceGovernor::new(GovernorConfig::default(), BUDGET);
        g.record(Duration::from_millis(20), Duration::from_millis(5));
        let m = g.metrics();
        assert_eq!(m.state, GovernorState::Normal);
        assert!((m.rolling_frame_ms - 20.0).abs() < 1e-9);
        assert!((m.rolling_work_ms - 5.0).abs() < 1e-9);
        assert!((m.usage_ratio - 0.5).abs() < 1e-9);
        assert!((m.rolling_fps - 50.0).abs() < 1e-9);
    }
}
