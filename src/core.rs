//! Core module defining the main components of the Rusty NetSim library.
//!
//! This module provides the building blocks of a network. It consists of the
//! following components:
//!
//! - [`neuron`]: The closed set of neuron models and their update equations
//! - [`population`]: Per-unit state arrays, spike bookkeeping and firing-rate windows
//! - [`connectivity`]: Sparse list-of-lists connectivity and its inverse index
//! - [`synapse`]: Weights, short-term plasticity state and convolution kernels
//! - [`projection`]: Dense, convolutional and event-driven transmission
//! - [`network`]: The container tying populations and projections together
//!
//! # Examples
//!
//! ```
//! use rusty_netsim::core::connectivity::LilMatrix;
//! use rusty_netsim::core::network::Network;
//! use rusty_netsim::core::neuron::NeuronModel;
//! use rusty_netsim::core::projection::{Connectivity, SynapseModel};
//! use rusty_netsim::core::synapse::Weights;
//!
//! let mut network = Network::new();
//! let input = network.add_population("input", NeuronModel::rate_input(2));
//! let output = network.add_population("output", NeuronModel::leaky_integrator(1));
//!
//! let matrix = LilMatrix::from_lil(1, 2, vec![0], vec![vec![0, 1]]).unwrap();
//! let proj = network
//!     .connect(
//!         input,
//!         output,
//!         "exc",
//!         Connectivity::Lil(matrix),
//!         SynapseModel::Static(Weights::Uniform(0.5)),
//!     )
//!     .unwrap();
//!
//! assert_eq!(network.num_populations(), 2);
//! assert_eq!(network.projection(proj).unwrap().nb_synapses(), 2);
//! ```
pub mod connectivity;
pub mod network;
pub mod neuron;
pub mod population;
pub mod projection;
pub mod synapse;

/// The value `last_spike` and `last_event` take before any event happened.
pub const LAST_SPIKE_SENTINEL: i64 = -10000;
/// The default integration time step.
pub const DEFAULT_DT: f64 = 1.0;
/// Minimum number of populations to update them in parallel.
pub const MIN_PARALLEL_POPULATIONS: usize = 4;
/// Minimum number of rows for a dense projection to compute its row sums in parallel.
pub const MIN_PARALLEL_ROWS: usize = 256;
