//! Populations: per-unit state arrays, input accumulators and spike bookkeeping.
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::neuron::NeuronModel;
use super::LAST_SPIKE_SENTINEL;
use crate::error::SimError;

/// A named per-unit input sum that projections add into before the population consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    name: String,
    values: Vec<f64>,
}

impl Accumulator {
    pub fn new(name: &str, values: Vec<f64>) -> Self {
        Accumulator {
            name: name.to_string(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// What a model reads during its update besides its own state.
pub struct Inputs<'a> {
    accumulators: &'a [Accumulator],
    normal: &'a [f64],
}

impl<'a> Inputs<'a> {
    pub fn new(accumulators: &'a [Accumulator], normal: &'a [f64]) -> Self {
        Inputs {
            accumulators,
            normal,
        }
    }

    /// The accumulator for the given target, if any projection feeds it.
    pub fn sum(&self, target: &str) -> Option<&'a [f64]> {
        self.accumulators
            .iter()
            .find(|acc| acc.name == target)
            .map(|acc| acc.values.as_slice())
    }

    /// The value of an accumulator at rank `i`, zero for targets nobody projects to.
    #[inline]
    pub fn at(sum: Option<&[f64]>, i: usize) -> f64 {
        sum.map_or(0.0, |values| values[i])
    }

    /// The standard normal deviate drawn for unit `i` this step.
    #[inline]
    pub fn normal(&self, i: usize) -> f64 {
        self.normal.get(i).copied().unwrap_or(0.0)
    }
}

/// Sliding window over the recent spikes of each unit, used to estimate firing rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FiringRateWindow {
    window_steps: i64,
    rate_constant: f64,
    history: Vec<VecDeque<i64>>,
}

/// A population of units sharing one neuron model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    name: String,
    size: usize,
    active: bool,
    model: NeuronModel,
    accumulators: Vec<Accumulator>,
    spiked: Vec<usize>,
    last_spike: Vec<i64>,
    refractory_remaining: Vec<i64>,
    in_ref: Vec<bool>,
    rate: Vec<f64>,
    window: Option<FiringRateWindow>,
    normal: Vec<f64>,
}

impl Population {
    /// Create a population whose size is the number of units the model was allocated for.
    pub fn new(name: &str, model: NeuronModel) -> Self {
        let size = model.len();
        let normal = if model.draws_normal() {
            vec![0.0; size]
        } else {
            vec![]
        };
        Population {
            name: name.to_string(),
            size,
            active: true,
            model,
            accumulators: vec![],
            spiked: vec![],
            last_spike: vec![LAST_SPIKE_SENTINEL; size],
            refractory_remaining: vec![0; size],
            in_ref: vec![true; size],
            rate: vec![0.0; size],
            window: None,
            normal,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Switch the population on or off. An inactive population keeps its state but emits no spikes.
    ///
    /// A cleared population has no state left and stays off.
    pub fn set_active(&mut self, active: bool) {
        if active && self.is_cleared() {
            log::warn!("Population {}: cannot be activated after clear()", self.name);
            return;
        }
        if !active {
            self.spiked.clear();
        }
        self.active = active;
    }

    /// Whether `clear()` freed the state arrays.
    pub fn is_cleared(&self) -> bool {
        self.in_ref.len() != self.size
    }

    pub fn is_spiking(&self) -> bool {
        self.model.is_spiking()
    }

    pub fn model(&self) -> &NeuronModel {
        &self.model
    }

    /// Ranks of the units that spiked during the last step, in ascending order.
    pub fn spiked(&self) -> &[usize] {
        &self.spiked
    }

    pub fn last_spike(&self) -> &[i64] {
        &self.last_spike
    }

    pub fn refractory_remaining(&self) -> &[i64] {
        &self.refractory_remaining
    }

    /// The output rate read by rate-coded projections.
    pub fn rate(&self) -> Option<&[f64]> {
        self.model.rate()
    }

    /// Enable the firing-rate estimate `r` over a sliding window (in the unit of `dt`, typically ms).
    /// A non-positive window disables it.
    pub fn compute_firing_rate(&mut self, window: f64, dt: f64) {
        if window > 0.0 {
            self.window = Some(FiringRateWindow {
                window_steps: (window / dt) as i64,
                rate_constant: 1000.0 / window,
                history: vec![VecDeque::new(); self.size],
            });
        } else {
            self.window = None;
        }
    }

    /// Index of the accumulator for `target`, creating it if no projection fed it yet.
    pub fn ensure_accumulator(&mut self, target: &str) -> usize {
        match self.accumulator_index(target) {
            Some(index) => index,
            None => {
                self.accumulators
                    .push(Accumulator::new(target, vec![0.0; self.size]));
                self.accumulators.len() - 1
            }
        }
    }

    pub fn accumulator_index(&self, target: &str) -> Option<usize> {
        self.accumulators.iter().position(|acc| acc.name == target)
    }

    pub fn accumulator(&self, target: &str) -> Option<&[f64]> {
        self.accumulators
            .iter()
            .find(|acc| acc.name == target)
            .map(|acc| acc.values.as_slice())
    }

    pub fn accumulators(&self) -> &[Accumulator] {
        &self.accumulators
    }

    /// Reset every accumulator to zero, unless the population is inactive.
    pub fn clear_accumulators(&mut self) {
        if self.active {
            self.accumulators
                .iter_mut()
                .for_each(|acc| acc.values.fill(0.0));
        }
    }

    /// Move an accumulator out so that a projection can write into it while reading other populations.
    pub(crate) fn take_accumulator(&mut self, index: usize) -> Vec<f64> {
        std::mem::take(&mut self.accumulators[index].values)
    }

    pub(crate) fn restore_accumulator(&mut self, index: usize, values: Vec<f64>) {
        self.accumulators[index].values = values;
    }

    /// Draw the random numbers of the next update.
    pub fn update_rng<R: Rng>(&mut self, rng: &mut R) {
        if self.active {
            self.model.draw_normal(rng, &mut self.normal);
        }
    }

    /// Integrate the neuron equations over one step.
    pub fn update(&mut self, dt: f64) {
        if !self.active {
            return;
        }

        if self.is_spiking() {
            for (flag, remaining) in self.in_ref.iter_mut().zip(&self.refractory_remaining) {
                *flag = *remaining <= 0;
            }
            self.spiked.clear();
        }

        let inputs = Inputs::new(&self.accumulators, &self.normal);
        self.model.update(dt, &self.in_ref, &inputs);

        if self.is_spiking() {
            for (remaining, flag) in self.refractory_remaining.iter_mut().zip(&self.in_ref) {
                if !flag {
                    *remaining -= 1;
                }
            }
        }
    }

    /// Detect threshold crossings, apply resets and update the spike bookkeeping of step `t`.
    pub fn spike_gather(&mut self, t: i64, dt: f64) {
        if !self.active || !self.is_spiking() {
            return;
        }

        for i in 0..self.size {
            if !self.in_ref[i] {
                continue;
            }

            if self.model.crossed_threshold(i) {
                self.model.reset_unit(i);
                self.spiked.push(i);
                self.last_spike[i] = t;
                self.refractory_remaining[i] = (self.model.tau_refrac(i) / dt) as i64;
                if let Some(window) = self.window.as_mut() {
                    window.history[i].push_back(t);
                }
            }

            if let Some(window) = self.window.as_mut() {
                let history = &mut window.history[i];
                while history
                    .front()
                    .is_some_and(|&ts| ts <= t - window.window_steps)
                {
                    history.pop_front();
                }
                self.rate[i] = window.rate_constant * history.len() as f64;
            }
        }
    }

    /// Restore the spike bookkeeping to its initial state; parameters and variables are untouched.
    pub fn reset(&mut self) {
        self.spiked.clear();
        self.last_spike.fill(LAST_SPIKE_SENTINEL);
        self.refractory_remaining.fill(0);
        self.in_ref.fill(true);
        if let Some(window) = self.window.as_mut() {
            window.history.iter_mut().for_each(|history| history.clear());
        }
    }

    /// Free the variable arrays and the spike bookkeeping. The population is deactivated.
    pub fn clear(&mut self) {
        self.model.clear();
        self.spiked = vec![];
        self.last_spike = vec![];
        self.refractory_remaining = vec![];
        self.in_ref = vec![];
        self.rate = vec![];
        self.window = None;
        self.normal = vec![];
        self.accumulators.iter_mut().for_each(|acc| acc.values = vec![]);
        self.active = false;
    }

    /// Check that every array matches the size of the population, e.g., after loading it from a file.
    pub fn validate(&self) -> Result<(), SimError> {
        let state_len = if self.is_cleared() { 0 } else { self.size };
        if self.active && state_len != self.size {
            return Err(SimError::ShapeMismatch(format!(
                "population {} is active without state",
                self.name
            )));
        }

        let check = |what: &str, len: usize, expected: usize| {
            if len == expected {
                Ok(())
            } else {
                Err(SimError::ShapeMismatch(format!(
                    "{} of population {} has {} entries, expected {}",
                    what, self.name, len, expected
                )))
            }
        };
        for &name in self.model.parameters() {
            check(name, self.model.attribute(name).map_or(0, Vec::len), self.size)?;
        }
        for &name in self.model.variables() {
            check(name, self.model.attribute(name).map_or(0, Vec::len), state_len)?;
        }
        check("last_spike", self.last_spike.len(), state_len)?;
        check("refractory_remaining", self.refractory_remaining.len(), state_len)?;
        check("r", self.rate.len(), state_len)?;
        let draws = if self.model.draws_normal() { state_len } else { 0 };
        check("normal", self.normal.len(), draws)?;
        for acc in self.accumulators.iter() {
            check(acc.name.as_str(), acc.values.len(), state_len)?;
        }
        if let Some(window) = self.window.as_ref() {
            check("spike history", window.history.len(), state_len)?;
        }

        if let Some(rank) = self.spiked.iter().find(|&&rank| rank >= state_len) {
            return Err(SimError::OutOfBounds(format!(
                "spiked rank {} in population {} of size {}",
                rank, self.name, self.size
            )));
        }
        Ok(())
    }

    /// Names of all per-unit arrays reachable through the attribute accessors.
    pub fn attribute_names(&self) -> Vec<&'static str> {
        let mut names = self.model.parameters().to_vec();
        names.extend_from_slice(self.model.variables());
        if self.is_spiking() {
            names.push("r");
        }
        names
    }

    /// The named per-unit array, if it exists.
    pub fn attribute(&self, name: &str) -> Option<&[f64]> {
        match self.model.attribute(name) {
            Some(values) => Some(values.as_slice()),
            None if name == "r" && self.is_spiking() => Some(&self.rate),
            None => None,
        }
    }

    fn attribute_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
        if name == "r" && self.is_spiking() {
            return Some(&mut self.rate);
        }
        self.model.attribute_mut(name)
    }

    /// A copy of the named array; unknown names are logged and answered with an empty array.
    pub fn get_attribute_all(&self, name: &str) -> Vec<f64> {
        match self.attribute(name) {
            Some(values) => values.to_vec(),
            None => {
                log::warn!("Population {}: attribute {} not found", self.name, name);
                vec![]
            }
        }
    }

    /// The value of the named attribute for unit `rank`; unknown names are logged and answered with zero.
    pub fn get_attribute(&self, name: &str, rank: usize) -> Result<f64, SimError> {
        match self.attribute(name) {
            Some(values) => values.get(rank).copied().ok_or_else(|| {
                SimError::OutOfBounds(format!(
                    "rank {} in population {} of size {}",
                    rank, self.name, self.size
                ))
            }),
            None => {
                log::warn!("Population {}: attribute {} not found", self.name, name);
                Ok(0.0)
            }
        }
    }

    /// Overwrite the named array. Unknown names are logged and ignored.
    pub fn set_attribute_all(&mut self, name: &str, values: Vec<f64>) -> Result<(), SimError> {
        let size = self.size;
        let pop_name = self.name.clone();
        match self.attribute_mut(name) {
            Some(attribute) => {
                if values.len() != size {
                    return Err(SimError::ShapeMismatch(format!(
                        "{} values for attribute {} of population {} of size {}",
                        values.len(),
                        name,
                        pop_name,
                        size
                    )));
                }
                *attribute = values;
                Ok(())
            }
            None => {
                log::warn!("Population {}: attribute {} not found", pop_name, name);
                Ok(())
            }
        }
    }

    /// Overwrite the named attribute of unit `rank`. Unknown names are logged and ignored.
    pub fn set_attribute(&mut self, name: &str, rank: usize, value: f64) -> Result<(), SimError> {
        let size = self.size;
        let pop_name = self.name.clone();
        match self.attribute_mut(name) {
            Some(attribute) => match attribute.get_mut(rank) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(SimError::OutOfBounds(format!(
                    "rank {} in population {} of size {}",
                    rank, pop_name, size
                ))),
            },
            None => {
                log::warn!("Population {}: attribute {} not found", pop_name, name);
                Ok(())
            }
        }
    }
}
