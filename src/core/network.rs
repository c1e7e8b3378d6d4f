//! The network: populations and the projections between them, in declaration order.
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::neuron::NeuronModel;
use super::population::Population;
use super::projection::{Connectivity, Projection, SynapseModel};
use super::MIN_PARALLEL_POPULATIONS;
use crate::error::SimError;

/// A network of populations coupled by projections.
///
/// Populations and projections are identified by their index of declaration, which is also
/// the order in which the scheduler visits them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Network {
    populations: Vec<Population>,
    projections: Vec<Projection>,
}

impl Network {
    pub fn new() -> Self {
        Network::default()
    }

    /// Add a population carrying the given model. Its size is the number of units of the model.
    pub fn add_population(&mut self, name: &str, model: NeuronModel) -> usize {
        self.populations.push(Population::new(name, model));
        self.populations.len() - 1
    }

    /// Connect population `source` to the accumulator `target_name` of population `target`.
    pub fn connect(
        &mut self,
        source: usize,
        target: usize,
        target_name: &str,
        connectivity: Connectivity,
        synapse: SynapseModel,
    ) -> Result<usize, SimError> {
        let source_pop = self.population(source).ok_or_else(|| {
            SimError::OutOfBounds(format!("source population {} does not exist", source))
        })?;
        let target_pop = self.population(target).ok_or_else(|| {
            SimError::OutOfBounds(format!("target population {} does not exist", target))
        })?;

        let mut projection = Projection::new(
            source,
            source_pop,
            target,
            target_pop,
            target_name,
            connectivity,
            synapse,
        )?;
        log::info!(
            "Projection {} -> {} ({}): {:?} transmission over {} synapses",
            source_pop.name(),
            target_pop.name(),
            target_name,
            projection.protocol(),
            projection.nb_synapses()
        );

        let index = self.populations[target].ensure_accumulator(target_name);
        projection.bind_accumulator(index);
        self.projections.push(projection);
        Ok(self.projections.len() - 1)
    }

    pub fn num_populations(&self) -> usize {
        self.populations.len()
    }

    pub fn num_projections(&self) -> usize {
        self.projections.len()
    }

    pub fn population(&self, id: usize) -> Option<&Population> {
        self.populations.get(id)
    }

    pub fn population_mut(&mut self, id: usize) -> Option<&mut Population> {
        self.populations.get_mut(id)
    }

    /// The id of the first population with the given name.
    pub fn population_id(&self, name: &str) -> Option<usize> {
        self.populations.iter().position(|pop| pop.name() == name)
    }

    pub fn populations(&self) -> &[Population] {
        &self.populations
    }

    pub fn projection(&self, id: usize) -> Option<&Projection> {
        self.projections.get(id)
    }

    pub fn projection_mut(&mut self, id: usize) -> Option<&mut Projection> {
        self.projections.get_mut(id)
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    /// Zero the accumulators of every active population.
    pub fn clear_accumulators(&mut self) {
        self.populations
            .iter_mut()
            .for_each(|pop| pop.clear_accumulators());
    }

    /// Let every projection add its input of step `t`, in declaration order.
    pub fn compute_psp(&mut self, t: i64, dt: f64, parallel: bool) {
        for proj in self.projections.iter_mut() {
            let (source, target) = (proj.source(), proj.target());
            if !self.populations[target].is_active() {
                continue;
            }
            let index = proj.accumulator();
            // The accumulator is moved out so that a population can project onto itself.
            let mut acc = self.populations[target].take_accumulator(index);
            proj.compute_psp(&self.populations[source], &mut acc, t, dt, parallel);
            self.populations[target].restore_accumulator(index, acc);
        }
    }

    /// Draw the random numbers every population consumes at its next update.
    pub fn update_rng<R: Rng>(&mut self, rng: &mut R) {
        self.populations
            .iter_mut()
            .for_each(|pop| pop.update_rng(rng));
    }

    /// Integrate every population over one step and gather the spikes emitted at step `t`.
    pub fn update_populations(&mut self, t: i64, dt: f64, parallel: bool) {
        if parallel && self.populations.len() >= MIN_PARALLEL_POPULATIONS {
            self.populations.par_iter_mut().for_each(|pop| {
                pop.update(dt);
                pop.spike_gather(t, dt);
            });
        } else {
            self.populations.iter_mut().for_each(|pop| {
                pop.update(dt);
                pop.spike_gather(t, dt);
            });
        }
    }

    /// Restore the spike bookkeeping of every population and bring every synapse back to rest.
    pub fn reset(&mut self) {
        self.populations.iter_mut().for_each(|pop| pop.reset());
        self.projections.iter_mut().for_each(|proj| proj.reset());
    }

    /// Save the network to a file.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SimError> {
        let file = File::create(path).map_err(|e| SimError::IOError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| SimError::IOError(e.to_string()))?;
        writer.flush().map_err(|e| SimError::IOError(e.to_string()))
    }

    /// Load a network from a file. The populations and projections are validated before use.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let file = File::open(path).map_err(|e| SimError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        let network: Network =
            serde_json::from_reader(reader).map_err(|e| SimError::IOError(e.to_string()))?;
        network.validate()?;
        Ok(network)
    }

    /// Check every population, and every projection against the populations it connects.
    pub fn validate(&self) -> Result<(), SimError> {
        for pop in self.populations.iter() {
            pop.validate()?;
        }
        for (id, proj) in self.projections.iter().enumerate() {
            let missing = |pop: usize| {
                SimError::InvalidTopology(format!(
                    "projection {} refers to population {}, which does not exist",
                    id, pop
                ))
            };
            let source = self
                .population(proj.source())
                .ok_or_else(|| missing(proj.source()))?;
            let target = self
                .population(proj.target())
                .ok_or_else(|| missing(proj.target()))?;
            proj.validate(source, target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connectivity::LilMatrix;
    use crate::core::synapse::Weights;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tempfile::NamedTempFile;

    #[test]
    fn test_connect() {
        let mut network = Network::new();
        let input = network.add_population("input", NeuronModel::rate_input(3));
        let output = network.add_population("output", NeuronModel::leaky_integrator(2));
        assert_eq!(network.population_id("output"), Some(output));

        let proj = network
            .connect(
                input,
                output,
                "inh",
                Connectivity::Lil(LilMatrix::all_to_all(2, 3, true)),
                SynapseModel::Static(Weights::Uniform(1.0)),
            )
            .unwrap();
        assert_eq!(network.num_projections(), 1);
        assert_eq!(network.projection(proj).unwrap().target_name(), "inh");
        assert_eq!(
            network.population(output).unwrap().accumulator("inh"),
            Some(&[0.0, 0.0][..])
        );

        assert!(matches!(
            network.connect(
                input,
                7,
                "exc",
                Connectivity::Lil(LilMatrix::all_to_all(2, 3, true)),
                SynapseModel::Static(Weights::Uniform(1.0)),
            ),
            Err(SimError::OutOfBounds(_))
        ));
        assert!(matches!(
            network.connect(
                output,
                input,
                "exc",
                Connectivity::Lil(LilMatrix::all_to_all(2, 3, true)),
                SynapseModel::Static(Weights::Uniform(1.0)),
            ),
            Err(SimError::ShapeMismatch(_))
        ));
        // a failed connection leaves no accumulator behind
        assert_eq!(network.population(input).unwrap().accumulator("exc"), None);
    }

    #[test]
    fn test_recurrent_projection() {
        let mut network = Network::new();
        let pop = network.add_population("pop", NeuronModel::leaky_integrate_and_fire(2));
        network
            .population_mut(pop)
            .unwrap()
            .set_attribute_all("i_offset", vec![2.0, 0.0])
            .unwrap();
        network
            .connect(
                pop,
                pop,
                "exc",
                Connectivity::Lil(LilMatrix::all_to_all(2, 2, false)),
                SynapseModel::Static(Weights::Uniform(0.25)),
            )
            .unwrap();

        network.clear_accumulators();
        network.compute_psp(0, 1.0, false);
        network.update_populations(0, 1.0, false);
        assert_eq!(network.population(pop).unwrap().spiked(), &[0]);

        network.clear_accumulators();
        network.compute_psp(1, 1.0, false);
        assert_eq!(
            network.population(pop).unwrap().accumulator("exc"),
            Some(&[0.0, 0.25][..])
        );
    }

    #[test]
    fn test_parallel_update_matches_serial() {
        let mut network = Network::new();
        for i in 0..2 * MIN_PARALLEL_POPULATIONS {
            let pop = network.add_population(&format!("pop{}", i), NeuronModel::izhikevich(20));
            network
                .population_mut(pop)
                .unwrap()
                .set_attribute_all("noise", vec![5.0; 20])
                .unwrap();
        }
        let mut serial = network.clone();
        let mut rng_serial = ChaCha8Rng::seed_from_u64(1);
        let mut rng_parallel = ChaCha8Rng::seed_from_u64(1);

        for t in 0..50 {
            network.update_rng(&mut rng_parallel);
            network.update_populations(t, 1.0, true);
            serial.update_rng(&mut rng_serial);
            serial.update_populations(t, 1.0, false);
        }
        assert_eq!(network, serial);
    }

    #[test]
    fn test_save_load() {
        let mut network = Network::new();
        let input = network.add_population("input", NeuronModel::izhikevich(3));
        let output = network.add_population("output", NeuronModel::conductance_lif(2));
        network
            .connect(
                input,
                output,
                "exc",
                Connectivity::Lil(LilMatrix::all_to_all(2, 3, true)),
                SynapseModel::Static(Weights::Uniform(0.1)),
            )
            .unwrap();

        let temp_file = NamedTempFile::new().expect("Failed to create temporary file");
        network.save_to(temp_file.path()).unwrap();
        let loaded = Network::load_from(temp_file.path()).unwrap();
        assert_eq!(network, loaded);
    }

    #[test]
    fn test_load_rejects_tampered_file() {
        let mut network = Network::new();
        let input = network.add_population("input", NeuronModel::leaky_integrate_and_fire(2));
        let output = network.add_population("output", NeuronModel::leaky_integrate_and_fire(1));
        network
            .connect(
                input,
                output,
                "exc",
                Connectivity::Lil(LilMatrix::all_to_all(1, 2, true)),
                SynapseModel::Static(Weights::Uniform(1.0)),
            )
            .unwrap();
        assert_eq!(network.validate(), Ok(()));

        let temp_file = NamedTempFile::new().expect("Failed to create temporary file");
        network.save_to(temp_file.path()).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(temp_file.path()).unwrap()).unwrap();
        let pre_rank = &mut json["projections"][0]["synapses"]["EventDriven"]["matrix"]["pre_rank"];
        assert_eq!(*pre_rank, serde_json::json!([[0, 1]]));
        *pre_rank = serde_json::json!([[0, 7]]);
        std::fs::write(temp_file.path(), json.to_string()).unwrap();
        assert!(matches!(
            Network::load_from(temp_file.path()),
            Err(SimError::InvalidTopology(_))
        ));

        let mut json: serde_json::Value = serde_json::to_value(&network).unwrap();
        json["projections"][0]["target"] = serde_json::json!(5);
        std::fs::write(temp_file.path(), json.to_string()).unwrap();
        assert!(matches!(
            Network::load_from(temp_file.path()),
            Err(SimError::InvalidTopology(_))
        ));

        let mut json: serde_json::Value = serde_json::to_value(&network).unwrap();
        json["populations"][1]["size"] = serde_json::json!(3);
        std::fs::write(temp_file.path(), json.to_string()).unwrap();
        assert!(matches!(
            Network::load_from(temp_file.path()),
            Err(SimError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Network::load_from("no/such/network.json"),
            Err(SimError::IOError(_))
        ));
    }
}
