use std::collections::VecDeque;

use glam::DVec3;

use crate::orchestrator::{StreamMetrics, StreamingOrchestrator};
use crate::query::CollisionResult;

/// Keeps a bounded history of published metrics.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    capacity: usize,
    history: VecDeque<StreamMetrics>,
    peak_memory_bytes: usize,
}

impl MetricsRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: VecDeque::with_capacity(capacity),
            peak_memory_bytes: 0,
        }
    }

    pub fn record(&mut self, metrics: StreamMetrics) {
        self.peak_memory_bytes = self.peak_memory_bytes.max(metrics.memory_used_bytes);
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(metrics);
    }

    pub fn latest(&self) -> Option<&StreamMetrics> {
        self.history.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &StreamMetrics> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Highest memory use seen since creation, including evicted history.
    pub fn peak_memory_bytes(&self) -> usize {
        self.peak_memory_bytes
    }
}

/// Probes the ground under the observer each tick.
#[derive(Debug, Clone)]
pub struct CollisionProbe {
    radius: f64,
    last: CollisionResult,
    contacts: u64,
    misses: u64,
}

impl CollisionProbe {
    pub fn new(radius: f64) -> Self {
        Self {
            radius,
            last: CollisionResult::NoData,
            contacts: 0,
            misses: 0,
        }
    }

    pub fn probe(&mut self, orchestrator: &StreamingOrchestrator, observer: DVec3) -> CollisionResult {
        let result = orchestrator.collision_at(observer, self.radius);
        match result {
            CollisionResult::NoData => self.misses += 1,
            CollisionResult::Contact { .. } => self.contacts += 1,
            CollisionResult::Clear { .. } => {}
        }
        self.last = result;
        result
    }

    pub fn last(&self) -> CollisionResult {
        self.last
    }

    pub fn contacts(&self) -> u64 {
        self.contacts
    }

    /// Probes that found no resident terrain.
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// Read-only observers of the orchestrator, driven once per tick.
#[derive(Debug, Clone)]
pub enum Consumer {
    Metrics(MetricsRecorder),
    Collision(CollisionProbe),
}

impl Consumer {
    pub fn observe(&mut self, orchestrator: &StreamingOrchestrator, observer: DVec3) {
        match self {
            Consumer::Metrics(recorder) => recorder.record(orchestrator.get_metrics()),
            Consumer::Collision(probe) => {
                probe.probe(orchestrator, observer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use terrastream_elevation::{ElevationSource, VerticalScale};

    fn orchestrator() -> StreamingOrchestrator {
        let config = StreamConfig {
            tile_resolution: 5,
            lod_levels: 1,
            load_distance: 600.0,
            unload_distance: 900.0,
            max_tick_budget_ms: 10_000.0,
            ..StreamConfig::default()
        };
        let source = ElevationSource::unavailable(VerticalScale::default());
        StreamingOrchestrator::new(config, source).unwrap()
    }

    #[test]
    fn recorder_is_bounded() {
        let mut orch = orchestrator();
        let mut consumer = Consumer::Metrics(MetricsRecorder::new(3));
        for _ in 0..5 {
            orch.tick(DVec3::new(256.0, 0.0, 256.0));
            consumer.observe(&orch, DVec3::ZERO);
        }
        let Consumer::Metrics(recorder) = consumer else {
            unreachable!()
        };
        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.latest().map(|m| m.tick), Some(5));
        assert_eq!(recorder.history().next().map(|m| m.tick), Some(3));
        assert!(recorder.peak_memory_bytes() > 0);
    }

    #[test]
    fn probe_counts_outcomes() {
        let mut orch = orchestrator();
        let mut probe = CollisionProbe::new(1.0);
        let observer = DVec3::new(256.0, 5000.0, 256.0);
        assert_eq!(probe.probe(&orch, observer), CollisionResult::NoData);
        // Stream from the ground; the high observer is out of load range.
        orch.tick(DVec3::new(256.0, 0.0, 256.0));
        assert!(matches!(
            probe.probe(&orch, observer),
            CollisionResult::Clear { .. }
        ));
        let buried = DVec3::new(256.0, -5000.0, 256.0);
        assert!(probe.probe(&orch, buried).is_contact());
        assert_eq!(probe.misses(), 1);
        assert_eq!(probe.contacts(), 1);
        assert!(probe.last().is_contact());
    }
}
