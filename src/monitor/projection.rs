//! Recording of per-synapse variables.
use serde::{Deserialize, Serialize};

use super::{Ranks, Schedule, Trace};
use crate::core::network::Network;
use crate::error::SimError;

/// A monitor attached to one projection, sampling whole dendrites.
///
/// Post-synaptic ranks are resolved to rows of the connectivity once, at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionMonitor {
    projection: usize,
    post_ranks: Vec<usize>,
    rows: Vec<usize>,
    schedule: Schedule,
    variables: Vec<Trace<Vec<Vec<f64>>>>,
}

impl ProjectionMonitor {
    pub fn new(
        network: &Network,
        projection: usize,
        names: &[&str],
        ranks: Ranks,
        schedule: Schedule,
    ) -> Result<Self, SimError> {
        let proj = network.projection(projection).ok_or_else(|| {
            SimError::OutOfBounds(format!("projection {} does not exist", projection))
        })?;
        let matrix = proj.matrix().ok_or_else(|| {
            SimError::InvalidParameter(format!(
                "projection {} has no per-synapse variables to record",
                projection
            ))
        })?;

        let post_ranks = match ranks {
            Ranks::All => matrix.post_ranks().to_vec(),
            Ranks::Subset(subset) => subset,
        };
        let rows = post_ranks
            .iter()
            .map(|&post| {
                matrix.row_of(post).ok_or_else(|| {
                    SimError::OutOfBounds(format!(
                        "post-synaptic rank {} has no dendrite in projection {}",
                        post, projection
                    ))
                })
            })
            .collect::<Result<Vec<usize>, SimError>>()?;

        let names_available = proj.attribute_names();
        let variables = names
            .iter()
            .map(|&name| {
                if names_available.contains(&name) {
                    Ok(Trace::new(name))
                } else {
                    Err(SimError::UnknownAttribute(format!(
                        "{} cannot be recorded from projection {}",
                        name, projection
                    )))
                }
            })
            .collect::<Result<Vec<_>, SimError>>()?;

        Ok(ProjectionMonitor {
            projection,
            post_ranks,
            rows,
            schedule,
            variables,
        })
    }

    pub fn projection(&self) -> usize {
        self.projection
    }

    /// The post-synaptic ranks of the recorded dendrites, in sampling order.
    pub fn post_ranks(&self) -> &[usize] {
        &self.post_ranks
    }

    pub fn record(&mut self, t: i64, network: &Network) {
        if !self.schedule.should_sample(t) {
            return;
        }
        let Some(proj) = network.projection(self.projection) else {
            return;
        };
        for trace in self.variables.iter_mut().filter(|trace| trace.is_enabled()) {
            if let Some(values) = proj.attribute(trace.name()) {
                let sample = self.rows.iter().map(|&row| values[row].clone()).collect();
                trace.push(t, sample);
            }
        }
    }

    fn trace(&self, name: &str) -> Option<&Trace<Vec<Vec<f64>>>> {
        self.variables.iter().find(|trace| trace.name() == name)
    }

    /// The samples recorded for `name`: per sampling step, one array per recorded dendrite.
    pub fn get(&self, name: &str) -> Option<&[Vec<Vec<f64>>]> {
        self.trace(name).map(|trace| trace.data())
    }

    pub fn times(&self, name: &str) -> Option<&[i64]> {
        self.trace(name).map(|trace| trace.times())
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), SimError> {
        match self.variables.iter_mut().find(|trace| trace.name() == name) {
            Some(trace) => {
                trace.set_enabled(enabled);
                Ok(())
            }
            None => Err(SimError::UnknownAttribute(format!("{} is not recorded", name))),
        }
    }

    pub fn clear(&mut self) {
        self.variables.iter_mut().for_each(|trace| *trace = Trace::new(trace.name()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connectivity::LilMatrix;
    use crate::core::neuron::NeuronModel;
    use crate::core::projection::{Connectivity, SynapseModel};
    use crate::core::synapse::{StpParameters, Weights};

    fn network() -> (Network, usize) {
        let mut network = Network::new();
        let input = network.add_population("input", NeuronModel::leaky_integrate_and_fire(2));
        let output = network.add_population("output", NeuronModel::leaky_integrate_and_fire(3));
        network
            .population_mut(input)
            .unwrap()
            .set_attribute_all("i_offset", vec![2.0, 0.0])
            .unwrap();
        let matrix = LilMatrix::from_lil(3, 2, vec![2, 0], vec![vec![0, 1], vec![0]]).unwrap();
        let proj = network
            .connect(
                input,
                output,
                "exc",
                Connectivity::Lil(matrix),
                SynapseModel::ShortTerm(StpParameters {
                    w: Weights::Uniform(1.0),
                    U: 0.5,
                    ..Default::default()
                }),
            )
            .unwrap();
        (network, proj)
    }

    #[test]
    fn test_ranks_resolved_to_rows() {
        let (network, proj) = network();
        let monitor =
            ProjectionMonitor::new(&network, proj, &["x"], Ranks::All, Schedule::default()).unwrap();
        assert_eq!(monitor.post_ranks(), &[2, 0]);

        assert!(matches!(
            ProjectionMonitor::new(&network, proj, &["x"], Ranks::Subset(vec![1]), Schedule::default()),
            Err(SimError::OutOfBounds(_))
        ));
        assert!(matches!(
            ProjectionMonitor::new(&network, proj, &["v"], Ranks::All, Schedule::default()),
            Err(SimError::UnknownAttribute(_))
        ));
    }

    #[test]
    fn test_record_dendrites() {
        let (mut network, proj) = network();
        let mut monitor = ProjectionMonitor::new(
            &network,
            proj,
            &["x", "w"],
            Ranks::Subset(vec![0, 2]),
            Schedule::default(),
        )
        .unwrap();

        for t in 0..2 {
            network.clear_accumulators();
            network.compute_psp(t, 1.0, false);
            network.update_populations(t, 1.0, false);
            monitor.record(t, &network);
        }

        assert_eq!(monitor.times("x"), Some(&[0, 1][..]));
        let x = monitor.get("x").unwrap();
        assert_eq!(x[0], vec![vec![1.0], vec![1.0, 1.0]]);
        // the spike of input 0 at step 0 reaches both dendrites at step 1
        assert_eq!(x[1], vec![vec![0.5], vec![0.5, 1.0]]);
        assert_eq!(monitor.get("w").unwrap()[1], vec![vec![1.0], vec![1.0, 1.0]]);

        monitor.set_enabled("w", false).unwrap();
        monitor.record(2, &network);
        assert_eq!(monitor.get("w").unwrap().len(), 2);
        assert_eq!(monitor.get("x").unwrap().len(), 3);

        monitor.clear();
        assert!(monitor.get("x").unwrap().is_empty());
    }
}
