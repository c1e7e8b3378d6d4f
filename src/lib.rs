//! This crate provides a discrete-time simulation kernel for networks of spiking and
//! rate-coded neural populations.
//!
//! A [`core::network::Network`] holds populations of units sharing a neuron model and the
//! projections between them. A [`simulator::Simulation`] advances the network step by step,
//! always in the same order:
//!
//! 1. the input accumulators of the populations are cleared;
//! 2. every projection adds its input, either by summing rates or by propagating the spikes of
//!    the previous step (optionally through short-term plasticity);
//! 3. monitors sample the accumulators;
//! 4. every population integrates its equations and emits its spikes;
//! 5. monitors sample the variables and log the spikes;
//! 6. the clock advances.
//!
//! # Example
//!
//! ```rust
//! use rusty_netsim::core::connectivity::LilMatrix;
//! use rusty_netsim::core::network::Network;
//! use rusty_netsim::core::neuron::NeuronModel;
//! use rusty_netsim::core::projection::{Connectivity, SynapseModel};
//! use rusty_netsim::core::synapse::{StpParameters, Weights};
//! use rusty_netsim::monitor::{Ranks, Schedule};
//! use rusty_netsim::simulator::Simulation;
//!
//! let mut network = Network::new();
//! let input = network.add_population("input", NeuronModel::leaky_integrate_and_fire(1));
//! let output = network.add_population("output", NeuronModel::leaky_integrate_and_fire(1));
//! network
//!     .population_mut(input)
//!     .unwrap()
//!     .set_attribute_all("i_offset", vec![0.5])
//!     .unwrap();
//! network
//!     .connect(
//!         input,
//!         output,
//!         "exc",
//!         Connectivity::Lil(LilMatrix::one_to_one(1)),
//!         SynapseModel::ShortTerm(StpParameters {
//!             w: Weights::Uniform(0.8),
//!             ..Default::default()
//!         }),
//!     )
//!     .unwrap();
//!
//! let mut simulation = Simulation::new(network);
//! simulation.initialize(1.0).unwrap();
//! let handle = simulation
//!     .monitor_population(output, &["exc"], Ranks::All, Schedule::default())
//!     .unwrap();
//! simulation.run(20).unwrap();
//!
//! let monitor = simulation.monitor(handle).unwrap().as_population().unwrap();
//! assert_eq!(monitor.get("exc").unwrap().len(), 20);
//! ```
pub mod config;
pub mod core;
pub mod error;
pub mod monitor;
pub mod simulator;
