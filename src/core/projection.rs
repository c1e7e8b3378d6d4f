//! Projections: the synapses between two populations and their transmission rule.
//!
//! The rule is chosen once, from the source population and the connectivity:
//! - rate-coded source and list-of-lists connectivity: every row sums `r[pre] * w` each step;
//! - rate-coded source and convolution: every row sums the kernel over its neighbourhood each step;
//! - spiking source: every spike is propagated through the inverse index, optionally through
//!   short-term plasticity;
//! - BOLD input: every row averages the rates `r` of its sources and, once a baseline was
//!   collected, delivers that average relative to the baseline mean.
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::connectivity::{Convolution, LilMatrix};
use super::population::Population;
use super::synapse::{BoldBaseline, ShortTermPlasticity, StpParameters, Weights, BOLD_INPUT_GAIN};
use super::MIN_PARALLEL_ROWS;
use crate::error::SimError;

/// The connectivity a projection is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Connectivity {
    Lil(LilMatrix),
    Convolution(Convolution),
}

/// The synapse model of a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SynapseModel {
    /// Fixed weights. A convolution only accepts a uniform weight, which scales its kernel.
    Static(Weights),
    /// Depressing/facilitating synapses driven by presynaptic spikes.
    ShortTerm(StpParameters),
    /// Drive of a haemodynamic model: the mean source rate of each row relative to a baseline
    /// collected over the first `baseline_steps` steps.
    BoldInput { baseline_steps: i64 },
}

/// How a projection delivers its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Dense,
    Convolution,
    EventDriven,
    BoldInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Synapses {
    Dense {
        matrix: LilMatrix,
        w: Vec<Vec<f64>>,
    },
    Convolution {
        conv: Convolution,
        w: f64,
    },
    EventDriven {
        matrix: LilMatrix,
        w: Vec<Vec<f64>>,
        stp: Option<ShortTermPlasticity>,
    },
    BoldInput {
        matrix: LilMatrix,
        baseline: BoldBaseline,
    },
}

#[inline]
fn row_sum(pres: &[usize], w: &[f64], rates: &[f64]) -> f64 {
    pres.iter().zip(w).map(|(&pre, &w)| rates[pre] * w).sum()
}

#[inline]
fn row_mean(pres: &[usize], rates: &[f64]) -> f64 {
    if pres.is_empty() {
        return 0.0;
    }
    pres.iter().map(|&pre| rates[pre]).sum::<f64>() / pres.len() as f64
}

fn check_lil_shape(matrix: &LilMatrix, source: &Population, target: &Population) -> Result<(), SimError> {
    if matrix.num_rows() != target.size() || matrix.num_columns() != source.size() {
        return Err(SimError::ShapeMismatch(format!(
            "connectivity of shape ({}, {}) between {} ({} units) and {} ({} units)",
            matrix.num_rows(),
            matrix.num_columns(),
            source.name(),
            source.size(),
            target.name(),
            target.size()
        )));
    }
    Ok(())
}

fn incompatible_short_term(source: &Population) -> SimError {
    SimError::IncompatibleProjection(format!(
        "short-term plasticity needs spikes, but {} is rate-coded",
        source.name()
    ))
}

fn incompatible_convolution(source: &Population) -> SimError {
    SimError::IncompatibleProjection(format!(
        "convolutions read rates, but {} is spiking",
        source.name()
    ))
}

/// A set of synapses from a source population onto one accumulator of a target population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    source: usize,
    target: usize,
    target_name: String,
    accumulator: usize,
    synapses: Synapses,
    transmission: bool,
    plasticity: bool,
    update: bool,
    update_period: i64,
    update_offset: i64,
}

impl Projection {
    /// Create a projection from `source` (with id `source_id`) onto the `target_name` accumulator of
    /// `target` (with id `target_id`).
    ///
    /// The shapes are checked against both populations, and synapse models the source cannot drive
    /// are rejected with an `IncompatibleProjection` error.
    pub fn new(
        source_id: usize,
        source: &Population,
        target_id: usize,
        target: &Population,
        target_name: &str,
        connectivity: Connectivity,
        synapse: SynapseModel,
    ) -> Result<Self, SimError> {
        let synapses = match connectivity {
            Connectivity::Lil(matrix) => {
                check_lil_shape(&matrix, source, target)?;
                match (source.is_spiking(), synapse) {
                    (_, SynapseModel::BoldInput { baseline_steps }) => Synapses::BoldInput {
                        baseline: BoldBaseline::new(matrix.nb_dendrites(), baseline_steps)?,
                        matrix,
                    },
                    (true, SynapseModel::Static(weights)) => Synapses::EventDriven {
                        w: weights.materialize(&matrix)?,
                        matrix,
                        stp: None,
                    },
                    (true, SynapseModel::ShortTerm(params)) => {
                        let stp = ShortTermPlasticity::new(&matrix, &params)?;
                        Synapses::EventDriven {
                            w: params.w.materialize(&matrix)?,
                            matrix,
                            stp: Some(stp),
                        }
                    }
                    (false, SynapseModel::Static(weights)) => Synapses::Dense {
                        w: weights.materialize(&matrix)?,
                        matrix,
                    },
                    (false, SynapseModel::ShortTerm(_)) => {
                        return Err(incompatible_short_term(source))
                    }
                }
            }
            Connectivity::Convolution(conv) => {
                if source.is_spiking() {
                    return Err(incompatible_convolution(source));
                }
                if conv.source_size() != source.size() {
                    return Err(SimError::ShapeMismatch(format!(
                        "geometry {:?} for {} of {} units",
                        conv.geometry(),
                        source.name(),
                        source.size()
                    )));
                }
                if conv.post_ranks().iter().any(|&post| post >= target.size()) {
                    return Err(SimError::ShapeMismatch(format!(
                        "convolution rows out of range for {} of {} units",
                        target.name(),
                        target.size()
                    )));
                }
                match synapse {
                    SynapseModel::Static(Weights::Uniform(w)) => Synapses::Convolution { conv, w },
                    _ => {
                        return Err(SimError::IncompatibleProjection(
                            "convolutions only accept a uniform static weight".to_string(),
                        ))
                    }
                }
            }
        };

        Ok(Projection {
            source: source_id,
            target: target_id,
            target_name: target_name.to_string(),
            accumulator: 0,
            synapses,
            transmission: true,
            plasticity: true,
            update: true,
            update_period: 1,
            update_offset: 0,
        })
    }

    pub(crate) fn bind_accumulator(&mut self, index: usize) {
        self.accumulator = index;
    }

    pub(crate) fn accumulator(&self) -> usize {
        self.accumulator
    }

    pub fn source(&self) -> usize {
        self.source
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Name of the accumulator the projection feeds, e.g., `exc`.
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn protocol(&self) -> Protocol {
        match self.synapses {
            Synapses::Dense { .. } => Protocol::Dense,
            Synapses::Convolution { .. } => Protocol::Convolution,
            Synapses::EventDriven { .. } => Protocol::EventDriven,
            Synapses::BoldInput { .. } => Protocol::BoldInput,
        }
    }

    /// The list-of-lists connectivity, if the projection has one.
    pub fn matrix(&self) -> Option<&LilMatrix> {
        match &self.synapses {
            Synapses::Dense { matrix, .. }
            | Synapses::EventDriven { matrix, .. }
            | Synapses::BoldInput { matrix, .. } => Some(matrix),
            Synapses::Convolution { .. } => None,
        }
    }

    pub fn post_ranks(&self) -> &[usize] {
        match &self.synapses {
            Synapses::Convolution { conv, .. } => conv.post_ranks(),
            Synapses::Dense { matrix, .. }
            | Synapses::EventDriven { matrix, .. }
            | Synapses::BoldInput { matrix, .. } => matrix.post_ranks(),
        }
    }

    pub fn nb_dendrites(&self) -> usize {
        self.post_ranks().len()
    }

    pub fn nb_synapses(&self) -> usize {
        match &self.synapses {
            Synapses::Dense { matrix, .. }
            | Synapses::EventDriven { matrix, .. }
            | Synapses::BoldInput { matrix, .. } => matrix.nb_synapses(),
            Synapses::Convolution { conv, .. } => {
                conv.nb_dendrites() * conv.kernel().weights().len()
            }
        }
    }

    pub fn transmission(&self) -> bool {
        self.transmission
    }

    /// Switch the delivery of inputs on or off. While off, the synaptic state is left untouched.
    pub fn set_transmission(&mut self, transmission: bool) {
        self.transmission = transmission;
    }

    pub fn plasticity(&self) -> bool {
        self.plasticity
    }

    /// Freeze or unfreeze the short-term plasticity state.
    pub fn set_plasticity(&mut self, plasticity: bool) {
        self.plasticity = plasticity;
    }

    pub fn update(&self) -> bool {
        self.update
    }

    pub fn set_update(&mut self, update: bool) {
        self.update = update;
    }

    pub fn update_period(&self) -> i64 {
        self.update_period
    }

    pub fn set_update_period(&mut self, period: i64) -> Result<(), SimError> {
        if period <= 0 {
            return Err(SimError::InvalidParameter(format!(
                "update period must be positive, got {}",
                period
            )));
        }
        self.update_period = period;
        Ok(())
    }

    pub fn update_offset(&self) -> i64 {
        self.update_offset
    }

    pub fn set_update_offset(&mut self, offset: i64) {
        self.update_offset = offset;
    }

    /// Whether the synaptic variables are due for an update at step `t`.
    /// Events arriving at other steps are delivered with the stored state, which stays untouched.
    pub fn synapse_update_due(&self, t: i64) -> bool {
        self.update && (t - self.update_offset).rem_euclid(self.update_period) == 0
    }

    /// The baseline of a BOLD input projection.
    pub fn bold_baseline(&self) -> Option<&BoldBaseline> {
        match &self.synapses {
            Synapses::BoldInput { baseline, .. } => Some(baseline),
            _ => None,
        }
    }

    /// Collect a new baseline over the `period` steps starting at step `t`.
    pub fn start_baseline(&mut self, t: i64, period: i64) -> Result<(), SimError> {
        match &mut self.synapses {
            Synapses::BoldInput { baseline, .. } => baseline.start(t, period),
            _ => Err(SimError::IncompatibleProjection(format!(
                "projection {} -> {} ({}) has no baseline",
                self.source, self.target, self.target_name
            ))),
        }
    }

    /// Check the projection against its populations, e.g., after loading it from a file.
    pub fn validate(&self, source: &Population, target: &Population) -> Result<(), SimError> {
        match &self.synapses {
            Synapses::Dense { matrix, w } => {
                if source.is_spiking() {
                    return Err(SimError::IncompatibleProjection(format!(
                        "dense summation reads rates, but {} is spiking",
                        source.name()
                    )));
                }
                matrix.validate()?;
                check_lil_shape(matrix, source, target)?;
                matrix.check_matrix_shape("w", w)?;
            }
            Synapses::EventDriven { matrix, w, stp } => {
                if !source.is_spiking() {
                    return Err(incompatible_short_term(source));
                }
                matrix.validate()?;
                check_lil_shape(matrix, source, target)?;
                matrix.check_matrix_shape("w", w)?;
                if let Some(stp) = stp {
                    stp.check_shape(matrix)?;
                }
            }
            Synapses::Convolution { conv, .. } => {
                if source.is_spiking() {
                    return Err(incompatible_convolution(source));
                }
                conv.validate(target.size())?;
                if conv.source_size() != source.size() {
                    return Err(SimError::ShapeMismatch(format!(
                        "geometry {:?} for {} of {} units",
                        conv.geometry(),
                        source.name(),
                        source.size()
                    )));
                }
            }
            Synapses::BoldInput { matrix, baseline } => {
                matrix.validate()?;
                check_lil_shape(matrix, source, target)?;
                baseline.check_shape(matrix.nb_dendrites())?;
            }
        }

        if target
            .accumulators()
            .get(self.accumulator)
            .map(|acc| acc.name())
            != Some(self.target_name.as_str())
        {
            return Err(SimError::InvalidTopology(format!(
                "{} has no accumulator {} at index {}",
                target.name(),
                self.target_name,
                self.accumulator
            )));
        }
        if self.update_period <= 0 {
            return Err(SimError::InvalidParameter(format!(
                "update period must be positive, got {}",
                self.update_period
            )));
        }
        Ok(())
    }

    /// Add the input of step `t` into `acc`, the target accumulator.
    pub fn compute_psp(
        &mut self,
        source: &Population,
        acc: &mut [f64],
        t: i64,
        dt: f64,
        parallel: bool,
    ) {
        if !self.transmission || !source.is_active() {
            return;
        }

        let plastic = self.plasticity && self.synapse_update_due(t);
        match &mut self.synapses {
            Synapses::Dense { matrix, w } => {
                let Some(rates) = source.rate() else {
                    return;
                };
                let sums: Vec<f64> = if parallel && matrix.nb_dendrites() >= MIN_PARALLEL_ROWS {
                    matrix
                        .pre_ranks()
                        .par_iter()
                        .zip(w.par_iter())
                        .map(|(pres, w)| row_sum(pres, w, rates))
                        .collect()
                } else {
                    matrix
                        .pre_ranks()
                        .iter()
                        .zip(w.iter())
                        .map(|(pres, w)| row_sum(pres, w, rates))
                        .collect()
                };
                for (&post, sum) in matrix.post_ranks().iter().zip(sums) {
                    acc[post] += sum;
                }
            }
            Synapses::Convolution { conv, w } => {
                let Some(rates) = source.rate() else {
                    return;
                };
                let rows = 0..conv.nb_dendrites();
                let sums: Vec<f64> = if parallel && conv.nb_dendrites() >= MIN_PARALLEL_ROWS {
                    rows.into_par_iter()
                        .map(|row| conv.weighted_sum(row, rates))
                        .collect()
                } else {
                    rows.map(|row| conv.weighted_sum(row, rates)).collect()
                };
                for (&post, sum) in conv.post_ranks().iter().zip(sums) {
                    acc[post] += *w * sum;
                }
            }
            Synapses::EventDriven { matrix, w, stp } => {
                for &rank in source.spiked() {
                    for &(row, col) in matrix.inverse(rank) {
                        let weight = w[row][col];
                        let psp = match stp.as_mut() {
                            Some(stp) => stp.on_event(row, col, weight, t, dt, plastic),
                            None => weight,
                        };
                        acc[matrix.post_ranks()[row]] += psp;
                    }
                }
            }
            Synapses::BoldInput { matrix, baseline } => {
                let Some(rates) = source.attribute("r") else {
                    return;
                };
                for (row, (&post, pres)) in matrix
                    .post_ranks()
                    .iter()
                    .zip(matrix.pre_ranks())
                    .enumerate()
                {
                    if let Some(relative) = baseline.relative(row, row_mean(pres, rates), t) {
                        acc[post] += BOLD_INPUT_GAIN * relative;
                    }
                }
            }
        }
    }

    /// Bring the short-term plasticity state back to rest and restart BOLD baselines.
    pub fn reset(&mut self) {
        match &mut self.synapses {
            Synapses::EventDriven { stp: Some(stp), .. } => stp.reset(),
            Synapses::BoldInput { baseline, .. } => baseline.reset(),
            _ => {}
        }
    }

    /// Names of the per-synapse arrays reachable through the attribute accessors.
    pub fn attribute_names(&self) -> Vec<&'static str> {
        match &self.synapses {
            Synapses::Dense { .. } | Synapses::EventDriven { stp: None, .. } => vec!["w"],
            Synapses::EventDriven { stp: Some(_), .. } => {
                let mut names = vec!["w"];
                names.extend_from_slice(ShortTermPlasticity::VARIABLES);
                names
            }
            Synapses::Convolution { .. } | Synapses::BoldInput { .. } => vec![],
        }
    }

    /// The named per-synapse array, row by row.
    pub fn attribute(&self, name: &str) -> Option<&Vec<Vec<f64>>> {
        match &self.synapses {
            Synapses::Dense { w, .. } => (name == "w").then_some(w),
            Synapses::EventDriven { w, stp, .. } => {
                if name == "w" {
                    Some(w)
                } else {
                    stp.as_ref()?.variable(name)
                }
            }
            Synapses::Convolution { .. } | Synapses::BoldInput { .. } => None,
        }
    }

    fn attribute_mut(&mut self, name: &str) -> Option<(&LilMatrix, &mut Vec<Vec<f64>>)> {
        match &mut self.synapses {
            Synapses::Dense { matrix, w } => (name == "w").then_some((&*matrix, w)),
            Synapses::EventDriven { matrix, w, stp } => {
                if name == "w" {
                    Some((&*matrix, w))
                } else {
                    let values = stp.as_mut()?.variable_mut(name)?;
                    Some((&*matrix, values))
                }
            }
            Synapses::Convolution { .. } | Synapses::BoldInput { .. } => None,
        }
    }

    fn unknown(&self, name: &str) {
        log::warn!(
            "Projection {} -> {} ({}): attribute {} not found",
            self.source,
            self.target,
            self.target_name,
            name
        );
    }

    fn no_dendrite(post: usize) -> SimError {
        SimError::OutOfBounds(format!("no dendrite for post-synaptic rank {}", post))
    }

    fn no_synapse(post: usize, pre: usize) -> SimError {
        SimError::OutOfBounds(format!("no synapse from {} onto {}", pre, post))
    }

    /// A copy of the named array; unknown names are logged and answered with an empty array.
    pub fn get_attribute_all(&self, name: &str) -> Vec<Vec<f64>> {
        match self.attribute(name) {
            Some(values) => values.clone(),
            None => {
                self.unknown(name);
                vec![]
            }
        }
    }

    /// The named attribute of the dendrite of target unit `post`.
    pub fn get_attribute_row(&self, name: &str, post: usize) -> Result<Vec<f64>, SimError> {
        let (Some(values), Some(matrix)) = (self.attribute(name), self.matrix()) else {
            self.unknown(name);
            return Ok(vec![]);
        };
        let row = matrix.row_of(post).ok_or_else(|| Self::no_dendrite(post))?;
        Ok(values[row].clone())
    }

    /// The named attribute of the synapse from `pre` onto `post`.
    pub fn get_attribute(&self, name: &str, post: usize, pre: usize) -> Result<f64, SimError> {
        let (Some(values), Some(matrix)) = (self.attribute(name), self.matrix()) else {
            self.unknown(name);
            return Ok(0.0);
        };
        let (row, col) = matrix
            .synapse_index(post, pre)
            .ok_or_else(|| Self::no_synapse(post, pre))?;
        Ok(values[row][col])
    }

    pub fn set_attribute_all(&mut self, name: &str, values: Vec<Vec<f64>>) -> Result<(), SimError> {
        let Some((matrix, attribute)) = self.attribute_mut(name) else {
            self.unknown(name);
            return Ok(());
        };
        matrix.check_matrix_shape(name, &values)?;
        *attribute = values;
        Ok(())
    }

    pub fn set_attribute_row(
        &mut self,
        name: &str,
        post: usize,
        values: Vec<f64>,
    ) -> Result<(), SimError> {
        let Some((matrix, attribute)) = self.attribute_mut(name) else {
            self.unknown(name);
            return Ok(());
        };
        let row = matrix.row_of(post).ok_or_else(|| Self::no_dendrite(post))?;
        if values.len() != attribute[row].len() {
            return Err(SimError::ShapeMismatch(format!(
                "{} values for a dendrite of {} synapses",
                values.len(),
                attribute[row].len()
            )));
        }
        attribute[row] = values;
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        name: &str,
        post: usize,
        pre: usize,
        value: f64,
    ) -> Result<(), SimError> {
        let Some((matrix, attribute)) = self.attribute_mut(name) else {
            self.unknown(name);
            return Ok(());
        };
        let (row, col) = matrix
            .synapse_index(post, pre)
            .ok_or_else(|| Self::no_synapse(post, pre))?;
        attribute[row][col] = value;
        Ok(())
    }
}
