//! Recording of population variables, accumulators and spikes.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Ranks, Schedule, Trace};
use crate::core::network::Network;
use crate::error::SimError;

/// The name under which spike events are requested.
pub const SPIKE: &str = "spike";

/// The values at the tracked ranks, or `None` once the population freed its arrays.
fn select(values: &[f64], ranks: &Ranks, size: usize) -> Option<Vec<f64>> {
    match ranks {
        Ranks::All => (values.len() == size).then(|| values.to_vec()),
        Ranks::Subset(ranks) => ranks.iter().map(|&rank| values.get(rank).copied()).collect(),
    }
}

/// Every tracked rank gets an entry, even if it never spikes.
fn empty_events(ranks: &Ranks, size: usize) -> BTreeMap<usize, Vec<i64>> {
    match ranks {
        Ranks::All => (0..size).map(|rank| (rank, vec![])).collect(),
        Ranks::Subset(subset) => subset.iter().map(|&rank| (rank, vec![])).collect(),
    }
}

/// Spike events per tracked rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SpikeLog {
    enabled: bool,
    events: BTreeMap<usize, Vec<i64>>,
}

/// A monitor attached to one population.
///
/// Variables and accumulators are sampled on the schedule, spikes are logged at every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationMonitor {
    population: usize,
    size: usize,
    ranks: Ranks,
    schedule: Schedule,
    variables: Vec<Trace<Vec<f64>>>,
    targets: Vec<Trace<Vec<f64>>>,
    spikes: Option<SpikeLog>,
}

impl PopulationMonitor {
    /// Record `names` of population `population`.
    ///
    /// A name is either a variable or parameter of the population, the name of one of its
    /// accumulators (e.g., `exc`), or `spike`.
    pub fn new(
        network: &Network,
        population: usize,
        names: &[&str],
        ranks: Ranks,
        schedule: Schedule,
    ) -> Result<Self, SimError> {
        let pop = network.population(population).ok_or_else(|| {
            SimError::OutOfBounds(format!("population {} does not exist", population))
        })?;

        if let Ranks::Subset(subset) = &ranks {
            if let Some(rank) = subset.iter().find(|&&rank| rank >= pop.size()) {
                return Err(SimError::OutOfBounds(format!(
                    "rank {} in population {} of size {}",
                    rank,
                    pop.name(),
                    pop.size()
                )));
            }
        }

        let mut monitor = PopulationMonitor {
            population,
            size: pop.size(),
            ranks,
            schedule,
            variables: vec![],
            targets: vec![],
            spikes: None,
        };

        for &name in names {
            if name == SPIKE && pop.is_spiking() {
                monitor.spikes = Some(SpikeLog {
                    enabled: true,
                    events: empty_events(&monitor.ranks, monitor.size),
                });
            } else if pop.attribute(name).is_some() {
                monitor.variables.push(Trace::new(name));
            } else if pop.accumulator(name).is_some() {
                monitor.targets.push(Trace::new(name));
            } else {
                return Err(SimError::UnknownAttribute(format!(
                    "{} cannot be recorded from population {}",
                    name,
                    pop.name()
                )));
            }
        }

        Ok(monitor)
    }

    pub fn population(&self) -> usize {
        self.population
    }

    pub fn ranks(&self) -> &Ranks {
        &self.ranks
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Sample the accumulators, right after they were filled by the projections.
    pub fn record_targets(&mut self, t: i64, network: &Network) {
        if !self.schedule.should_sample(t) {
            return;
        }
        let Some(pop) = network.population(self.population) else {
            return;
        };
        for trace in self.targets.iter_mut().filter(|trace| trace.is_enabled()) {
            if let Some(sample) = pop
                .accumulator(trace.name())
                .and_then(|values| select(values, &self.ranks, self.size))
            {
                trace.push(t, sample);
            }
        }
    }

    /// Sample the variables on schedule and log the spikes of step `t`.
    pub fn record(&mut self, t: i64, network: &Network) {
        let Some(pop) = network.population(self.population) else {
            return;
        };

        if self.schedule.should_sample(t) {
            for trace in self.variables.iter_mut().filter(|trace| trace.is_enabled()) {
                if let Some(sample) = pop
                    .attribute(trace.name())
                    .and_then(|values| select(values, &self.ranks, self.size))
                {
                    trace.push(t, sample);
                }
            }
        }

        if let Some(log) = self.spikes.as_mut().filter(|log| log.enabled) {
            for &rank in pop.spiked() {
                if let Some(events) = log.events.get_mut(&rank) {
                    events.push(t);
                }
            }
        }
    }

    /// Names of everything the monitor records.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .variables
            .iter()
            .chain(self.targets.iter())
            .map(|trace| trace.name())
            .collect();
        if self.spikes.is_some() {
            names.push(SPIKE);
        }
        names
    }

    fn trace(&self, name: &str) -> Option<&Trace<Vec<f64>>> {
        self.variables
            .iter()
            .chain(self.targets.iter())
            .find(|trace| trace.name() == name)
    }

    fn trace_mut(&mut self, name: &str) -> Option<&mut Trace<Vec<f64>>> {
        self.variables
            .iter_mut()
            .chain(self.targets.iter_mut())
            .find(|trace| trace.name() == name)
    }

    /// The samples recorded for `name`, one per sampling step.
    pub fn get(&self, name: &str) -> Option<&[Vec<f64>]> {
        self.trace(name).map(|trace| trace.data())
    }

    /// The steps at which `name` was sampled.
    pub fn times(&self, name: &str) -> Option<&[i64]> {
        self.trace(name).map(|trace| trace.times())
    }

    /// Hand over the samples of `name` recorded so far; recording goes on from an empty buffer.
    pub fn take(&mut self, name: &str) -> Result<(Vec<i64>, Vec<Vec<f64>>), SimError> {
        self.trace_mut(name)
            .map(|trace| trace.take())
            .ok_or_else(|| SimError::UnknownAttribute(format!("{} is not recorded", name)))
    }

    /// The spike events of every tracked rank.
    pub fn spikes(&self) -> Option<&BTreeMap<usize, Vec<i64>>> {
        self.spikes.as_ref().map(|log| &log.events)
    }

    /// Hand over the spike events recorded so far.
    pub fn take_spikes(&mut self) -> Option<BTreeMap<usize, Vec<i64>>> {
        let fresh = empty_events(&self.ranks, self.size);
        self.spikes
            .as_mut()
            .map(|log| std::mem::replace(&mut log.events, fresh))
    }

    /// Pause (`false`) or resume (`true`) the recording of `name`.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), SimError> {
        if name == SPIKE {
            if let Some(log) = self.spikes.as_mut() {
                log.enabled = enabled;
                return Ok(());
            }
        }
        match self.trace_mut(name) {
            Some(trace) => {
                trace.set_enabled(enabled);
                Ok(())
            }
            None => Err(SimError::UnknownAttribute(format!("{} is not recorded", name))),
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        if name == SPIKE {
            return self.spikes.as_ref().is_some_and(|log| log.enabled);
        }
        self.trace(name).is_some_and(|trace| trace.is_enabled())
    }

    /// Pause every recording.
    pub fn pause(&mut self) {
        self.set_all(false);
    }

    /// Resume every recording.
    pub fn resume(&mut self) {
        self.set_all(true);
    }

    fn set_all(&mut self, enabled: bool) {
        self.variables
            .iter_mut()
            .chain(self.targets.iter_mut())
            .for_each(|trace| trace.set_enabled(enabled));
        if let Some(log) = self.spikes.as_mut() {
            log.enabled = enabled;
        }
    }

    /// Free every recorded sample.
    pub fn clear(&mut self) {
        self.variables.iter_mut().for_each(|trace| *trace = Trace::new(trace.name()));
        self.targets.iter_mut().for_each(|trace| *trace = Trace::new(trace.name()));
        if let Some(log) = self.spikes.as_mut() {
            log.events = empty_events(&self.ranks, self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::neuron::NeuronModel;

    fn network() -> (Network, usize) {
        let mut network = Network::new();
        let pop = network.add_population("lif", NeuronModel::leaky_integrate_and_fire(3));
        network
            .population_mut(pop)
            .unwrap()
            .set_attribute_all("i_offset", vec![0.6, 0.0, 2.0])
            .unwrap();
        (network, pop)
    }

    fn run(network: &mut Network, monitor: &mut PopulationMonitor, steps: i64) {
        for t in 0..steps {
            network.update_populations(t, 1.0, false);
            monitor.record(t, network);
        }
    }

    #[test]
    fn test_unknown_names_fail_fast() {
        let (network, pop) = network();
        assert!(matches!(
            PopulationMonitor::new(&network, pop, &["w"], Ranks::All, Schedule::default()),
            Err(SimError::UnknownAttribute(_))
        ));
        assert!(matches!(
            PopulationMonitor::new(&network, pop, &["v"], Ranks::Subset(vec![3]), Schedule::default()),
            Err(SimError::OutOfBounds(_))
        ));
        assert!(matches!(
            PopulationMonitor::new(&network, 5, &["v"], Ranks::All, Schedule::default()),
            Err(SimError::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_partial_ranks_in_given_order() {
        let (mut network, pop) = network();
        let mut monitor = PopulationMonitor::new(
            &network,
            pop,
            &["i_offset"],
            Ranks::Subset(vec![2, 0]),
            Schedule::every(2).unwrap(),
        )
        .unwrap();
        run(&mut network, &mut monitor, 5);
        assert_eq!(monitor.times("i_offset"), Some(&[0, 2, 4][..]));
        assert_eq!(monitor.get("i_offset").unwrap(), &vec![vec![2.0, 0.6]; 3][..]);
    }

    #[test]
    fn test_spikes_are_logged_every_step() {
        let (mut network, pop) = network();
        let mut monitor = PopulationMonitor::new(
            &network,
            pop,
            &["spike"],
            Ranks::All,
            Schedule::every(10).unwrap(),
        )
        .unwrap();
        run(&mut network, &mut monitor, 4);

        let spikes = monitor.spikes().unwrap();
        assert_eq!(spikes.get(&0), Some(&vec![1, 3]));
        // silent units are listed too
        assert_eq!(spikes.get(&1), Some(&vec![]));
        assert_eq!(spikes.get(&2), Some(&vec![0, 1, 2, 3]));

        let taken = monitor.take_spikes().unwrap();
        assert_eq!(taken.len(), 3);
        assert_eq!(monitor.spikes().unwrap().keys().copied().collect::<Vec<usize>>(), vec![0, 1, 2]);
        assert!(monitor.spikes().unwrap().values().all(|events| events.is_empty()));
    }

    #[test]
    fn test_spikes_of_partial_ranks() {
        let (mut network, pop) = network();
        let mut monitor = PopulationMonitor::new(
            &network,
            pop,
            &["spike"],
            Ranks::Subset(vec![0, 1]),
            Schedule::default(),
        )
        .unwrap();
        run(&mut network, &mut monitor, 4);

        let spikes = monitor.spikes().unwrap();
        assert_eq!(spikes.get(&0), Some(&vec![1, 3]));
        assert_eq!(spikes.get(&1), Some(&vec![]));
        assert_eq!(spikes.get(&2), None);
    }

    #[test]
    fn test_pause_and_resume() {
        let (mut network, pop) = network();
        let mut monitor = PopulationMonitor::new(
            &network,
            pop,
            &["v", "spike"],
            Ranks::All,
            Schedule::default(),
        )
        .unwrap();
        assert_eq!(monitor.names(), vec!["v", "spike"]);

        monitor.set_enabled("v", false).unwrap();
        run(&mut network, &mut monitor, 3);
        assert!(monitor.get("v").unwrap().is_empty());
        assert!(!monitor.spikes().unwrap().is_empty());

        monitor.pause();
        assert!(!monitor.is_enabled("spike"));
        monitor.resume();
        assert!(monitor.is_enabled("v"));
        assert!(matches!(
            monitor.set_enabled("u", true),
            Err(SimError::UnknownAttribute(_))
        ));

        monitor.record(3, &network);
        assert_eq!(monitor.times("v"), Some(&[3][..]));

        let (times, data) = monitor.take("v").unwrap();
        assert_eq!(times, vec![3]);
        assert_eq!(data.len(), 1);
        assert!(monitor.get("v").unwrap().is_empty());

        monitor.clear();
        assert_eq!(monitor.spikes().unwrap().len(), 3);
        assert!(monitor.spikes().unwrap().values().all(|events| events.is_empty()));
    }

    #[test]
    fn test_cleared_population_is_not_sampled() {
        let (mut network, pop) = network();
        let mut partial = PopulationMonitor::new(
            &network,
            pop,
            &["v", "spike"],
            Ranks::Subset(vec![2]),
            Schedule::default(),
        )
        .unwrap();
        let mut full =
            PopulationMonitor::new(&network, pop, &["v"], Ranks::All, Schedule::default()).unwrap();
        run(&mut network, &mut partial, 2);
        assert_eq!(partial.get("v").unwrap().len(), 2);

        network.population_mut(pop).unwrap().clear();
        for t in 2..4 {
            network.update_populations(t, 1.0, false);
            partial.record(t, &network);
            full.record(t, &network);
        }
        assert_eq!(partial.times("v"), Some(&[0, 1][..]));
        assert!(full.get("v").unwrap().is_empty());
        assert_eq!(partial.spikes().unwrap().get(&2), Some(&vec![0, 1]));
    }
}
