//! The scheduler: one step of the whole network, in a fixed phase order.
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::context::SimulationContext;
use crate::config::SimulationConfig;
use crate::core::network::Network;
use crate::core::population::Population;
use crate::monitor::{
    Monitor, MonitorHandle, MonitorRegistry, PopulationMonitor, ProjectionMonitor, Ranks,
    Schedule,
};
use crate::error::SimError;

/// How the condition of `run_until` combines over the watched populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopMode {
    /// Stop as soon as one population satisfies the condition.
    Any,
    /// Stop once every population satisfies the condition.
    All,
}

/// A network together with its monitors and its clock.
#[derive(Debug, Clone)]
pub struct Simulation {
    network: Network,
    monitors: MonitorRegistry,
    context: SimulationContext,
    config: SimulationConfig,
    initialized: bool,
}

impl Simulation {
    /// Wrap a network with the default configuration. The simulation must be initialized before running.
    pub fn new(network: Network) -> Self {
        let config = SimulationConfig::default();
        Simulation {
            network,
            monitors: MonitorRegistry::new(),
            context: SimulationContext::new(config.dt, config.seed),
            config,
            initialized: false,
        }
    }

    /// Wrap a network and initialize it with the time step of the configuration.
    pub fn from_config(network: Network, config: &SimulationConfig) -> Result<Self, SimError> {
        config.validate()?;
        let mut simulation = Simulation {
            network,
            monitors: MonitorRegistry::new(),
            context: SimulationContext::new(config.dt, config.seed),
            config: config.clone(),
            initialized: false,
        };
        simulation.initialize(config.dt)?;
        Ok(simulation)
    }

    /// Set the time step and make the simulation ready to run.
    pub fn initialize(&mut self, dt: f64) -> Result<(), SimError> {
        self.set_dt(dt)?;
        self.initialized = true;
        log::info!(
            "Simulation initialized: populations [{}], {} projections, dt = {}",
            self.network.populations().iter().map(|pop| pop.name()).join(", "),
            self.network.num_projections(),
            dt
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn monitors(&self) -> &MonitorRegistry {
        &self.monitors
    }

    pub fn monitors_mut(&mut self) -> &mut MonitorRegistry {
        &mut self.monitors
    }

    /// The current step.
    pub fn time(&self) -> i64 {
        self.context.t()
    }

    pub fn set_time(&mut self, t: i64) {
        self.context.set_t(t);
    }

    pub fn dt(&self) -> f64 {
        self.context.dt()
    }

    pub fn set_dt(&mut self, dt: f64) -> Result<(), SimError> {
        if !(dt > 0.0) {
            return Err(SimError::InvalidParameter(format!(
                "time step must be positive, got {}",
                dt
            )));
        }
        self.context.set_dt(dt);
        self.config.dt = dt;
        Ok(())
    }

    pub fn seed(&self) -> u64 {
        self.context.seed()
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.context.set_seed(seed);
        self.config.seed = seed;
    }

    /// Record `names` of a population. See [`PopulationMonitor::new`].
    pub fn monitor_population(
        &mut self,
        population: usize,
        names: &[&str],
        ranks: Ranks,
        schedule: Schedule,
    ) -> Result<MonitorHandle, SimError> {
        let monitor = PopulationMonitor::new(&self.network, population, names, ranks, schedule)?;
        Ok(self.monitors.add(monitor))
    }

    /// Record per-synapse `names` of a projection. See [`ProjectionMonitor::new`].
    pub fn monitor_projection(
        &mut self,
        projection: usize,
        names: &[&str],
        ranks: Ranks,
        schedule: Schedule,
    ) -> Result<MonitorHandle, SimError> {
        let monitor = ProjectionMonitor::new(&self.network, projection, names, ranks, schedule)?;
        Ok(self.monitors.add(monitor))
    }

    pub fn monitor(&self, handle: MonitorHandle) -> Option<&Monitor> {
        self.monitors.get(handle)
    }

    pub fn monitor_mut(&mut self, handle: MonitorHandle) -> Option<&mut Monitor> {
        self.monitors.get_mut(handle)
    }

    /// Deregister a monitor and hand back what it recorded.
    pub fn remove_monitor(&mut self, handle: MonitorHandle) -> Option<Monitor> {
        self.monitors.remove(handle)
    }

    /// Collect a new baseline for a BOLD input projection over the next `period` steps.
    pub fn start_baseline(&mut self, projection: usize, period: i64) -> Result<(), SimError> {
        let t = self.context.t();
        self.network
            .projection_mut(projection)
            .ok_or_else(|| SimError::OutOfBounds(format!("projection {} does not exist", projection)))?
            .start_baseline(t, period)
    }

    /// Restore the spike bookkeeping and the synaptic state; the clock is left as is.
    pub fn reset(&mut self) {
        self.network.reset();
    }

    /// Advance the network by one step.
    pub fn step(&mut self) -> Result<(), SimError> {
        if !self.initialized {
            return Err(SimError::NotInitialized);
        }
        self.single_step();
        Ok(())
    }

    fn single_step(&mut self) {
        let (t, dt, parallel) = (self.context.t(), self.context.dt(), self.config.parallel);

        log::trace!("Step {}: clearing accumulators", t);
        self.network.clear_accumulators();

        log::trace!("Step {}: transmitting", t);
        self.network.compute_psp(t, dt, parallel);

        self.monitors.record_targets(t, &self.network);

        log::trace!("Step {}: updating populations", t);
        self.network.update_rng(self.context.rng());
        self.network.update_populations(t, dt, parallel);

        self.monitors.record(t, &self.network);

        self.context.advance();
    }

    fn log_progress(&self, done: u64, total: u64) {
        let interval = self.config.progress_interval;
        if interval > 0 && done % interval == 0 {
            log::debug!(
                "Simulation progress: {}/{} steps (t = {})",
                done,
                total,
                self.context.t()
            );
        }
    }

    /// Advance the network by `steps` steps.
    pub fn run(&mut self, steps: u64) -> Result<(), SimError> {
        if !self.initialized {
            return Err(SimError::NotInitialized);
        }

        log::info!("Starting simulation of {} steps at t = {}...", steps, self.time());
        for done in 1..=steps {
            self.single_step();
            self.log_progress(done, steps);
        }
        log::info!("Simulation completed successfully! (t = {})", self.time());
        Ok(())
    }

    /// Advance the network until `condition` holds for any or all of `populations`, for at most
    /// `max_steps` steps. The condition is evaluated after every step; the number of steps run
    /// is returned.
    pub fn run_until<F>(
        &mut self,
        max_steps: u64,
        populations: &[usize],
        mode: StopMode,
        mut condition: F,
    ) -> Result<u64, SimError>
    where
        F: FnMut(&Population) -> bool,
    {
        if !self.initialized {
            return Err(SimError::NotInitialized);
        }
        if populations.is_empty() {
            return Err(SimError::InvalidParameter(
                "run_until needs at least one population to watch".to_string(),
            ));
        }
        if let Some(&id) = populations
            .iter()
            .find(|&&id| id >= self.network.num_populations())
        {
            return Err(SimError::OutOfBounds(format!(
                "population {} does not exist",
                id
            )));
        }

        log::info!(
            "Starting simulation of at most {} steps at t = {}...",
            max_steps,
            self.time()
        );
        for done in 1..=max_steps {
            self.single_step();
            self.log_progress(done, max_steps);

            let mut watched = populations
                .iter()
                .filter_map(|&id| self.network.population(id));
            let stop = match mode {
                StopMode::Any => watched.any(&mut condition),
                StopMode::All => watched.all(&mut condition),
            };
            if stop {
                log::info!("Stop condition reached after {} steps (t = {})", done, self.time());
                return Ok(done);
            }
        }
        log::info!("Simulation completed successfully! (t = {})", self.time());
        Ok(max_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::neuron::NeuronModel;

    fn lif_network(i_offsets: Vec<f64>) -> Network {
        let mut network = Network::new();
        let size = i_offsets.len();
        let pop = network.add_population("lif", NeuronModel::leaky_integrate_and_fire(size));
        let pop = network.population_mut(pop).unwrap();
        pop.set_attribute_all("tau", vec![1e9; size]).unwrap();
        pop.set_attribute_all("i_offset", i_offsets).unwrap();
        network
    }

    #[test]
    fn test_not_initialized() {
        let mut simulation = Simulation::new(lif_network(vec![0.1]));
        assert_eq!(simulation.step(), Err(SimError::NotInitialized));
        assert_eq!(simulation.run(3), Err(SimError::NotInitialized));
        assert_eq!(
            simulation.run_until(3, &[0], StopMode::Any, |_| true),
            Err(SimError::NotInitialized)
        );
        assert_eq!(simulation.time(), 0);
    }

    #[test]
    fn test_clock_control() {
        let mut simulation = Simulation::new(lif_network(vec![0.1]));
        assert!(matches!(
            simulation.initialize(0.0),
            Err(SimError::InvalidParameter(_))
        ));
        simulation.initialize(0.5).unwrap();
        assert_eq!(simulation.dt(), 0.5);

        simulation.run(4).unwrap();
        assert_eq!(simulation.time(), 4);
        simulation.step().unwrap();
        assert_eq!(simulation.time(), 5);

        simulation.set_time(100);
        simulation.step().unwrap();
        assert_eq!(simulation.time(), 101);
    }

    #[test]
    fn test_run_until() {
        let network = lif_network(vec![0.22, 0.0]);
        let config = SimulationConfig {
            progress_interval: 2,
            ..Default::default()
        };
        let mut simulation = Simulation::from_config(network, &config).unwrap();

        let steps = simulation
            .run_until(100, &[0], StopMode::Any, |pop| !pop.spiked().is_empty())
            .unwrap();
        assert_eq!(steps, 5);
        assert_eq!(simulation.time(), 5);

        let steps = simulation
            .run_until(7, &[0], StopMode::All, |pop| pop.spiked().len() == 2)
            .unwrap();
        assert_eq!(steps, 7);

        assert!(matches!(
            simulation.run_until(7, &[], StopMode::All, |_| true),
            Err(SimError::InvalidParameter(_))
        ));
        assert!(matches!(
            simulation.run_until(7, &[3], StopMode::All, |_| true),
            Err(SimError::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_seed_reproducibility() {
        let mut network = Network::new();
        let pop = network.add_population("izh", NeuronModel::izhikevich(10));
        network
            .population_mut(pop)
            .unwrap()
            .set_attribute_all("noise", vec![10.0; 10])
            .unwrap();

        let mut first = Simulation::new(network.clone());
        first.initialize(1.0).unwrap();
        first.set_seed(11);
        first.run(100).unwrap();

        let mut second = Simulation::new(network);
        second.initialize(1.0).unwrap();
        second.set_seed(11);
        second.run(100).unwrap();

        assert_eq!(first.network(), second.network());
        assert_eq!(first.seed(), 11);
    }

    #[test]
    fn test_monitor_handles() {
        let mut simulation = Simulation::new(lif_network(vec![0.22, 0.0]));
        simulation.initialize(1.0).unwrap();
        let first = simulation
            .monitor_population(0, &["v"], Ranks::All, Schedule::default())
            .unwrap();
        let second = simulation
            .monitor_population(0, &["spike"], Ranks::All, Schedule::default())
            .unwrap();
        simulation.run(10).unwrap();

        let removed = simulation.remove_monitor(first).unwrap();
        assert_eq!(removed.as_population().unwrap().get("v").unwrap().len(), 10);
        assert!(simulation.monitor(first).is_none());

        let third = simulation
            .monitor_population(0, &["I"], Ranks::All, Schedule::default())
            .unwrap();
        assert_eq!(third, first);

        let spikes = simulation
            .monitor(second)
            .and_then(|monitor| monitor.as_population())
            .and_then(|monitor| monitor.spikes())
            .unwrap();
        assert_eq!(spikes.get(&0), Some(&vec![4, 9]));
    }
}
