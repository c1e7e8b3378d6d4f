//! The global state of a simulation: clock, time step and random number generator.
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::core::DEFAULT_DT;

/// Clock, time step and random number generator shared by every component during a step.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    t: i64,
    dt: f64,
    seed: u64,
    rng: ChaCha8Rng,
}

impl Default for SimulationContext {
    fn default() -> Self {
        SimulationContext::new(DEFAULT_DT, 0)
    }
}

impl SimulationContext {
    pub fn new(dt: f64, seed: u64) -> Self {
        SimulationContext {
            t: 0,
            dt,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// The current step.
    pub fn t(&self) -> i64 {
        self.t
    }

    pub fn set_t(&mut self, t: i64) {
        self.t = t;
    }

    pub(crate) fn advance(&mut self) {
        self.t += 1;
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub(crate) fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Restart the random number generator from `seed`.
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }
}
