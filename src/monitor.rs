//! Monitors sampling the state of populations and projections during a simulation.
//!
//! - [`population`]: per-unit variables, accumulators and spike events of one population
//! - [`projection`]: per-synapse variables of selected dendrites of one projection
//! - [`registry`]: the arena of monitors, addressed by small integer handles
use serde::{Deserialize, Serialize};

use crate::core::network::Network;
use crate::error::SimError;

pub mod population;
pub mod projection;
pub mod registry;

pub use population::PopulationMonitor;
pub use projection::ProjectionMonitor;
pub use registry::{MonitorHandle, MonitorRegistry};

/// Which units (or dendrites, by post-synaptic rank) a monitor tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ranks {
    All,
    /// The given ranks, sampled in the given order.
    Subset(Vec<usize>),
}

/// When a monitor samples: at every step `t >= offset` with `(t - offset) mod period == period_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    period: i64,
    period_offset: i64,
    offset: i64,
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule {
            period: 1,
            period_offset: 0,
            offset: 0,
        }
    }
}

impl Schedule {
    pub fn new(period: i64, period_offset: i64, offset: i64) -> Result<Self, SimError> {
        if period <= 0 {
            return Err(SimError::InvalidParameter(format!(
                "sampling period must be positive, got {}",
                period
            )));
        }
        if !(0..period).contains(&period_offset) {
            return Err(SimError::InvalidParameter(format!(
                "period offset {} must lie in [0, {})",
                period_offset, period
            )));
        }
        Ok(Schedule {
            period,
            period_offset,
            offset,
        })
    }

    /// Sample every `period` steps, starting at step `offset`.
    pub fn every(period: i64) -> Result<Self, SimError> {
        Self::new(period, 0, 0)
    }

    pub fn period(&self) -> i64 {
        self.period
    }

    pub fn period_offset(&self) -> i64 {
        self.period_offset
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn should_sample(&self, t: i64) -> bool {
        t >= self.offset && (t - self.offset) % self.period == self.period_offset
    }
}

/// The samples of one recorded variable, with the steps they were taken at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace<T> {
    name: String,
    enabled: bool,
    times: Vec<i64>,
    data: Vec<T>,
}

impl<T> Trace<T> {
    pub(crate) fn new(name: &str) -> Self {
        Trace {
            name: name.to_string(),
            enabled: true,
            times: vec![],
            data: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn times(&self) -> &[i64] {
        &self.times
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn push(&mut self, t: i64, sample: T) {
        self.times.push(t);
        self.data.push(sample);
    }

    /// Hand over the samples recorded so far and start afresh.
    pub(crate) fn take(&mut self) -> (Vec<i64>, Vec<T>) {
        (std::mem::take(&mut self.times), std::mem::take(&mut self.data))
    }
}

/// A monitor of either kind, as stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Monitor {
    Population(PopulationMonitor),
    Projection(ProjectionMonitor),
}

impl Monitor {
    /// Hook run after transmission and before the populations update.
    pub fn record_targets(&mut self, t: i64, network: &Network) {
        if let Monitor::Population(monitor) = self {
            monitor.record_targets(t, network);
        }
    }

    /// Hook run after the populations updated and emitted their spikes.
    pub fn record(&mut self, t: i64, network: &Network) {
        match self {
            Monitor::Population(monitor) => monitor.record(t, network),
            Monitor::Projection(monitor) => monitor.record(t, network),
        }
    }

    /// Release every recorded sample.
    pub fn clear(&mut self) {
        match self {
            Monitor::Population(monitor) => monitor.clear(),
            Monitor::Projection(monitor) => monitor.clear(),
        }
    }

    pub fn as_population(&self) -> Option<&PopulationMonitor> {
        match self {
            Monitor::Population(monitor) => Some(monitor),
            Monitor::Projection(_) => None,
        }
    }

    pub fn as_population_mut(&mut self) -> Option<&mut PopulationMonitor> {
        match self {
            Monitor::Population(monitor) => Some(monitor),
            Monitor::Projection(_) => None,
        }
    }

    pub fn as_projection(&self) -> Option<&ProjectionMonitor> {
        match self {
            Monitor::Projection(monitor) => Some(monitor),
            Monitor::Population(_) => None,
        }
    }

    pub fn as_projection_mut(&mut self) -> Option<&mut ProjectionMonitor> {
        match self {
            Monitor::Projection(monitor) => Some(monitor),
            Monitor::Population(_) => None,
        }
    }
}

impl From<PopulationMonitor> for Monitor {
    fn from(monitor: PopulationMonitor) -> Self {
        Monitor::Population(monitor)
    }
}

impl From<ProjectionMonitor> for Monitor {
    fn from(monitor: ProjectionMonitor) -> Self {
        Monitor::Projection(monitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_period_offset() {
        let schedule = Schedule::new(3, 1, 0).unwrap();
        let steps: Vec<i64> = (0..12).filter(|&t| schedule.should_sample(t)).collect();
        assert_eq!(steps, vec![1, 4, 7, 10]);
    }

    #[test]
    fn test_schedule_offset() {
        let schedule = Schedule::new(2, 0, 5).unwrap();
        let steps: Vec<i64> = (0..12).filter(|&t| schedule.should_sample(t)).collect();
        assert_eq!(steps, vec![5, 7, 9, 11]);

        let schedule = Schedule::default();
        assert!((0..5).all(|t| schedule.should_sample(t)));
    }

    #[test]
    fn test_invalid_schedule() {
        assert!(matches!(
            Schedule::every(0),
            Err(SimError::InvalidParameter(_))
        ));
        assert!(matches!(
            Schedule::new(3, 3, 0),
            Err(SimError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_trace_take() {
        let mut trace = Trace::new("v");
        trace.push(1, 0.5);
        trace.push(4, 0.7);
        assert_eq!(trace.times(), &[1, 4]);
        assert_eq!(trace.take(), (vec![1, 4], vec![0.5, 0.7]));
        assert!(trace.data().is_empty());
    }
}
