//! Synapse models: weights, short-term plasticity state, BOLD input baselines and convolution kernels.
use derivative::Derivative;
use serde::{Deserialize, Serialize};

use super::connectivity::LilMatrix;
use super::LAST_SPIKE_SENTINEL;
use crate::error::SimError;

/// Synaptic weights of a projection, either shared by all synapses or one per synapse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Weights {
    Uniform(f64),
    PerSynapse(Vec<Vec<f64>>),
}

impl Weights {
    /// Expand the weights into one value per synapse of the connectivity.
    pub fn materialize(self, matrix: &LilMatrix) -> Result<Vec<Vec<f64>>, SimError> {
        match self {
            Weights::Uniform(w) => Ok(matrix.init_matrix_variable(w)),
            Weights::PerSynapse(w) => {
                matrix.check_matrix_shape("w", &w)?;
                Ok(w)
            }
        }
    }
}

/// Parameters of a depressing/facilitating synapse (Tsodyks-Markram).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[allow(non_snake_case)]
pub struct StpParameters {
    #[derivative(Default(value = "Weights::Uniform(0.0)"))]
    pub w: Weights,
    /// Recovery time constant of the resources `x`.
    #[derivative(Default(value = "100.0"))]
    pub tau_rec: f64,
    /// Decay time constant of the utilization `u`.
    #[derivative(Default(value = "0.01"))]
    pub tau_facil: f64,
    /// Baseline utilization.
    #[derivative(Default(value = "0.5"))]
    pub U: f64,
}

/// Per-synapse state of short-term plasticity.
///
/// Between events `x` relaxes to 1 and `u` to `U`. Both are only evaluated when an event
/// arrives, from the closed-form decay over the elapsed steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct ShortTermPlasticity {
    pub tau_rec: Vec<Vec<f64>>,
    pub tau_facil: Vec<Vec<f64>>,
    pub U: Vec<Vec<f64>>,
    pub x: Vec<Vec<f64>>,
    pub u: Vec<Vec<f64>>,
    pub last_event: Vec<Vec<i64>>,
}

impl ShortTermPlasticity {
    pub const VARIABLES: &'static [&'static str] = &["tau_rec", "tau_facil", "U", "x", "u"];

    /// Allocate the state of every synapse at rest, i.e., `x = 1` and `u = U`.
    pub fn new(matrix: &LilMatrix, params: &StpParameters) -> Result<Self, SimError> {
        if params.tau_rec <= 0.0 || params.tau_facil <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "time constants must be positive, got tau_rec = {} and tau_facil = {}",
                params.tau_rec, params.tau_facil
            )));
        }
        Ok(ShortTermPlasticity {
            tau_rec: matrix.init_matrix_variable(params.tau_rec),
            tau_facil: matrix.init_matrix_variable(params.tau_facil),
            U: matrix.init_matrix_variable(params.U),
            x: matrix.init_matrix_variable(1.0),
            u: matrix.init_matrix_variable(params.U),
            last_event: matrix.init_matrix_variable(LAST_SPIKE_SENTINEL),
        })
    }

    pub fn variable(&self, name: &str) -> Option<&Vec<Vec<f64>>> {
        match name {
            "tau_rec" => Some(&self.tau_rec),
            "tau_facil" => Some(&self.tau_facil),
            "U" => Some(&self.U),
            "x" => Some(&self.x),
            "u" => Some(&self.u),
            _ => None,
        }
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Vec<Vec<f64>>> {
        match name {
            "tau_rec" => Some(&mut self.tau_rec),
            "tau_facil" => Some(&mut self.tau_facil),
            "U" => Some(&mut self.U),
            "x" => Some(&mut self.x),
            "u" => Some(&mut self.u),
            _ => None,
        }
    }

    /// Deliver a presynaptic event at step `t` through synapse `(row, col)` of weight `w`,
    /// returning the contribution `u * w * x` to the target accumulator.
    ///
    /// With `plastic` unset, the contribution uses the stored `x` and `u` and leaves the state untouched.
    pub fn on_event(&mut self, row: usize, col: usize, w: f64, t: i64, dt: f64, plastic: bool) -> f64 {
        if !plastic {
            return self.u[row][col] * w * self.x[row][col];
        }

        let elapsed = dt * (self.last_event[row][col] - (t - 1)) as f64;
        let x = &mut self.x[row][col];
        let u = &mut self.u[row][col];
        let big_u = self.U[row][col];

        *x = 1.0 + (*x - 1.0) * (elapsed / self.tau_rec[row][col]).exp();
        *u = big_u + (*u - big_u) * (elapsed / self.tau_facil[row][col]).exp();
        self.last_event[row][col] = t;

        let psp = *u * w * *x;
        *x *= 1.0 - *u;
        *u += big_u * (1.0 - *u);
        psp
    }

    /// Check that every per-synapse array is shaped like the connectivity.
    pub fn check_shape(&self, matrix: &LilMatrix) -> Result<(), SimError> {
        for &name in Self::VARIABLES {
            if let Some(values) = self.variable(name) {
                matrix.check_matrix_shape(name, values)?;
            }
        }
        matrix.check_matrix_shape("last_event", &self.last_event)
    }

    /// Bring every synapse back to rest.
    pub fn reset(&mut self) {
        self.x.iter_mut().flatten().for_each(|x| *x = 1.0);
        for (u, big_u) in self.u.iter_mut().flatten().zip(self.U.iter().flatten()) {
            *u = *big_u;
        }
        self.last_event
            .iter_mut()
            .flatten()
            .for_each(|e| *e = LAST_SPIKE_SENTINEL);
    }
}

/// Added to the magnitude of the baseline mean before the input is divided by it.
pub const BOLD_EPSILON: f64 = 1e-7;

/// Scale of the relative input a BOLD input projection adds to its target.
pub const BOLD_INPUT_GAIN: f64 = 0.5;

/// Baseline of the inputs of a BOLD input projection, one entry per dendrite.
///
/// Before step `until` the mean input of every dendrite is stored and nothing is delivered.
/// At step `until` the mean and standard deviation of the stored inputs are computed; from then on
/// inputs are expressed relative to the mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoldBaseline {
    samples: Vec<Vec<f64>>,
    mean: Vec<f64>,
    std: Vec<f64>,
    period: i64,
    until: i64,
}

impl BoldBaseline {
    /// A baseline over the first `period` steps of the simulation.
    pub fn new(nb_dendrites: usize, period: i64) -> Result<Self, SimError> {
        let mut baseline = BoldBaseline {
            samples: vec![vec![]; nb_dendrites],
            mean: vec![0.0; nb_dendrites],
            std: vec![1.0; nb_dendrites],
            period: 0,
            until: 0,
        };
        baseline.start(0, period)?;
        Ok(baseline)
    }

    /// Collect a new baseline over the `period` steps starting at step `t`.
    pub fn start(&mut self, t: i64, period: i64) -> Result<(), SimError> {
        if period < 0 {
            return Err(SimError::InvalidParameter(format!(
                "baseline period must not be negative, got {}",
                period
            )));
        }
        log::debug!("BOLD baseline from step {} to step {}", t, t + period);
        self.period = period;
        self.until = t + period;
        self.samples.iter_mut().for_each(|samples| samples.clear());
        Ok(())
    }

    /// The step at which the baseline statistics are computed.
    pub fn until(&self) -> i64 {
        self.until
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }

    /// Feed the mean input of dendrite `row` at step `t`. Returns the input relative to the
    /// baseline mean, or `None` while the baseline is still being collected.
    pub fn relative(&mut self, row: usize, input: f64, t: i64) -> Option<f64> {
        if t == self.until {
            self.compute_statistics(row);
        }
        if t < self.until {
            self.samples[row].push(input);
            return None;
        }
        Some((input - self.mean[row]) / (self.mean[row].abs() + BOLD_EPSILON))
    }

    fn compute_statistics(&mut self, row: usize) {
        let samples = &self.samples[row];
        let n = samples.len();
        if n == 0 {
            return;
        }
        let mean = samples.iter().sum::<f64>() / n as f64;
        self.mean[row] = mean;
        if n > 1 {
            let accum: f64 = samples.iter().map(|x| (x - mean).powi(2)).sum();
            self.std[row] = (accum / (n - 1) as f64).sqrt();
        }
    }

    pub fn check_shape(&self, nb_dendrites: usize) -> Result<(), SimError> {
        if self.samples.len() != nb_dendrites
            || self.mean.len() != nb_dendrites
            || self.std.len() != nb_dendrites
        {
            return Err(SimError::ShapeMismatch(format!(
                "BOLD baseline of {} dendrites for a connectivity of {}",
                self.mean.len(),
                nb_dendrites
            )));
        }
        Ok(())
    }

    /// Forget the statistics and collect the baseline again from step 0.
    pub fn reset(&mut self) {
        self.mean.fill(0.0);
        self.std.fill(1.0);
        self.samples.iter_mut().for_each(|samples| samples.clear());
        self.until = self.period;
    }
}

/// A kernel of up to three dimensions, stored in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionKernel {
    weights: Vec<f64>,
    shape: [usize; 3],
    /// Convolutions centre the window on the anchor; pooling windows start at it.
    centered: bool,
}

impl ConvolutionKernel {
    pub fn new(weights: Vec<f64>, shape: [usize; 3]) -> Result<Self, SimError> {
        if shape.iter().any(|&d| d == 0) {
            return Err(SimError::InvalidParameter(format!(
                "kernel dimensions must be positive, got {:?}",
                shape
            )));
        }
        if weights.len() != shape.iter().product::<usize>() {
            return Err(SimError::ShapeMismatch(format!(
                "{} kernel weights for shape {:?}",
                weights.len(),
                shape
            )));
        }
        Ok(ConvolutionKernel {
            weights,
            shape,
            centered: true,
        })
    }

    pub fn validate(&self) -> Result<(), SimError> {
        Self::new(self.weights.clone(), self.shape).map(|_| ())
    }

    /// A two-dimensional kernel given row by row.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, SimError> {
        let height = rows.len();
        let width = rows.first().map_or(0, |row| row.len());
        if rows.iter().any(|row| row.len() != width) {
            return Err(SimError::ShapeMismatch(
                "kernel rows must all have the same length".to_string(),
            ));
        }
        Self::new(rows.into_iter().flatten().collect(), [height, width, 1])
    }

    /// Average pooling over a window of the given shape, whose top-left corner sits on the anchor.
    pub fn pooling(shape: [usize; 3]) -> Result<Self, SimError> {
        let size = shape.iter().product::<usize>();
        let mut kernel = Self::new(vec![1.0 / size as f64; size], shape)?;
        kernel.centered = false;
        Ok(kernel)
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn is_centered(&self) -> bool {
        self.centered
    }

    /// Shift from the anchor to the first kernel entry along each dimension:
    /// the kernel centre for convolutions, zero for pooling windows.
    pub fn offset(&self) -> [usize; 3] {
        if self.centered {
            self.shape.map(|d| d / 2)
        } else {
            [0; 3]
        }
    }

    /// Weighted sum of `rates`, laid out on `geometry`, under the kernel placed at `anchor`.
    /// Kernel entries falling outside the geometry are skipped.
    pub fn weighted_sum(&self, rates: &[f64], geometry: [usize; 3], anchor: [usize; 3]) -> f64 {
        let offset = self.offset();
        let mut sum = 0.0;
        let mut index = 0;
        for i in 0..self.shape[0] {
            for j in 0..self.shape[1] {
                for k in 0..self.shape[2] {
                    let w = self.weights[index];
                    index += 1;
                    let coords = [
                        (anchor[0] + i).checked_sub(offset[0]),
                        (anchor[1] + j).checked_sub(offset[1]),
                        (anchor[2] + k).checked_sub(offset[2]),
                    ];
                    let [Some(c0), Some(c1), Some(c2)] = coords else {
                        continue;
                    };
                    if c0 >= geometry[0] || c1 >= geometry[1] || c2 >= geometry[2] {
                        continue;
                    }
                    let rank = geometry[2] * (geometry[1] * c0 + c1) + c2;
                    sum += rates[rank] * w;
                }
            }
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn single_synapse(utilization: f64) -> ShortTermPlasticity {
        let matrix = LilMatrix::one_to_one(1);
        let params = StpParameters {
            w: Weights::Uniform(1.0),
            tau_rec: 50.0,
            tau_facil: 20.0,
            U: utilization,
        };
        ShortTermPlasticity::new(&matrix, &params).unwrap()
    }

    #[test]
    fn test_weights_materialize() {
        let matrix = LilMatrix::from_lil(2, 2, vec![0, 1], vec![vec![0, 1], vec![0]]).unwrap();
        assert_eq!(
            Weights::Uniform(0.5).materialize(&matrix),
            Ok(vec![vec![0.5, 0.5], vec![0.5]])
        );
        assert!(matches!(
            Weights::PerSynapse(vec![vec![0.5, 0.5]]).materialize(&matrix),
            Err(SimError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_stp_parameters_default() {
        let params = StpParameters::default();
        assert_eq!(params.w, Weights::Uniform(0.0));
        assert_eq!(params.tau_rec, 100.0);
        assert_eq!(params.tau_facil, 0.01);
        assert_eq!(params.U, 0.5);

        let matrix = LilMatrix::one_to_one(1);
        let params = StpParameters {
            tau_rec: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            ShortTermPlasticity::new(&matrix, &params),
            Err(SimError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_first_event_at_rest() {
        let mut stp = single_synapse(0.2);
        let psp = stp.on_event(0, 0, 2.0, 10, 1.0, true);
        assert_relative_eq!(psp, 0.2 * 2.0);
        assert_relative_eq!(stp.x[0][0], 0.8);
        assert_relative_eq!(stp.u[0][0], 0.2 + 0.2 * 0.8);
        assert_eq!(stp.last_event[0][0], 10);
    }

    #[test]
    fn test_closed_form_recovery_between_events() {
        let (t1, t2) = (5, 25);
        let mut stp = single_synapse(0.3);
        stp.on_event(0, 0, 1.0, t1, 1.0, true);
        let (x1, u1) = (stp.x[0][0], stp.u[0][0]);

        let psp = stp.on_event(0, 0, 1.0, t2, 1.0, true);
        let gap = (t1 - (t2 - 1)) as f64;
        let x = 1.0 + (x1 - 1.0) * (gap / 50.0).exp();
        let u = 0.3 + (u1 - 0.3) * (gap / 20.0).exp();
        assert_relative_eq!(psp, u * x);
        assert_relative_eq!(stp.x[0][0], x * (1.0 - u));
        assert_relative_eq!(stp.u[0][0], u + 0.3 * (1.0 - u));
    }

    #[test]
    fn test_frozen_plasticity() {
        let mut stp = single_synapse(0.3);
        stp.on_event(0, 0, 1.0, 0, 1.0, true);
        let before = stp.clone();
        let psp = stp.on_event(0, 0, 2.0, 3, 1.0, false);
        assert_relative_eq!(psp, before.u[0][0] * 2.0 * before.x[0][0]);
        assert_eq!(stp, before);

        stp.reset();
        assert_eq!(stp.x[0][0], 1.0);
        assert_eq!(stp.u[0][0], 0.3);
        assert_eq!(stp.last_event[0][0], LAST_SPIKE_SENTINEL);
    }

    #[test]
    fn test_stp_shape() {
        let matrix = LilMatrix::from_lil(2, 3, vec![0, 1], vec![vec![0, 2], vec![1]]).unwrap();
        let mut stp = ShortTermPlasticity::new(&matrix, &StpParameters::default()).unwrap();
        assert_eq!(stp.check_shape(&matrix), Ok(()));
        stp.last_event[1].push(0);
        assert!(matches!(
            stp.check_shape(&matrix),
            Err(SimError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_bold_baseline() {
        let mut baseline = BoldBaseline::new(1, 3).unwrap();
        assert_eq!(baseline.until(), 3);
        assert_eq!(baseline.relative(0, 1.0, 0), None);
        assert_eq!(baseline.relative(0, 2.0, 1), None);
        assert_eq!(baseline.relative(0, 3.0, 2), None);

        let relative = baseline.relative(0, 3.0, 3).unwrap();
        assert_relative_eq!(baseline.mean()[0], 2.0);
        assert_relative_eq!(baseline.std()[0], 1.0);
        assert_relative_eq!(relative, 0.5, epsilon = 1e-6);
        assert_relative_eq!(baseline.relative(0, 1.0, 4).unwrap(), -0.5, epsilon = 1e-6);

        baseline.reset();
        assert_eq!(baseline.mean(), &[0.0]);
        assert_eq!(baseline.relative(0, 1.0, 0), None);

        baseline.start(10, 0).unwrap();
        assert_relative_eq!(baseline.relative(0, 4.0, 10).unwrap(), 4.0 / BOLD_EPSILON);
        assert!(matches!(
            baseline.start(0, -1),
            Err(SimError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_kernel_construction() {
        assert!(matches!(
            ConvolutionKernel::new(vec![1.0; 3], [2, 2, 1]),
            Err(SimError::ShapeMismatch(_))
        ));
        assert!(matches!(
            ConvolutionKernel::new(vec![], [0, 2, 1]),
            Err(SimError::InvalidParameter(_))
        ));
        assert!(matches!(
            ConvolutionKernel::from_rows(vec![vec![1.0, 2.0], vec![1.0]]),
            Err(SimError::ShapeMismatch(_))
        ));
        let kernel = ConvolutionKernel::pooling([2, 2, 1]).unwrap();
        assert_eq!(kernel.weights(), &[0.25; 4]);
        assert!(!kernel.is_centered());
        assert_eq!(kernel.offset(), [0, 0, 0]);

        let kernel = ConvolutionKernel::from_rows(vec![vec![1.0; 3]; 2]).unwrap();
        assert!(kernel.is_centered());
        assert_eq!(kernel.offset(), [1, 1, 0]);
    }

    #[test]
    fn test_weighted_sum_skips_borders() {
        // 3x3 source with rates 0..9, 3x3 kernel of ones
        let rates: Vec<f64> = (0..9).map(|r| r as f64).collect();
        let kernel = ConvolutionKernel::from_rows(vec![vec![1.0; 3]; 3]).unwrap();

        assert_eq!(kernel.weighted_sum(&rates, [3, 3, 1], [1, 1, 0]), 36.0);
        // top-left corner only sees ranks 0, 1, 3, 4
        assert_eq!(kernel.weighted_sum(&rates, [3, 3, 1], [0, 0, 0]), 8.0);
        // bottom-right corner only sees ranks 4, 5, 7, 8
        assert_eq!(kernel.weighted_sum(&rates, [3, 3, 1], [2, 2, 0]), 24.0);
    }

    #[test]
    fn test_pooling_window_starts_at_anchor() {
        let kernel = ConvolutionKernel::pooling([2, 2, 1]).unwrap();
        assert_relative_eq!(kernel.weighted_sum(&[1.0; 4], [2, 2, 1], [0, 0, 0]), 1.0);

        // 3x3 source with rates 0..9: the window at [1, 1] covers ranks 4, 5, 7, 8
        let rates: Vec<f64> = (0..9).map(|r| r as f64).collect();
        assert_relative_eq!(kernel.weighted_sum(&rates, [3, 3, 1], [1, 1, 0]), 6.0);
        // at the last row only ranks 7 and 8 remain inside the source
        assert_relative_eq!(kernel.weighted_sum(&rates, [3, 3, 1], [2, 1, 0]), 3.75);
    }
}
