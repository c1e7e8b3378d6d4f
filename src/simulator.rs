//! Simulation control: the per-step scheduler and its global state.
//!
//! This module provides two main components:
//! - `context`: the clock, the time step and the random number generator.
//! - `simulation`: the scheduler, running the phases of a step in a fixed order.
//!
//! # Example
//! ```rust
//! use rusty_netsim::core::network::Network;
//! use rusty_netsim::core::neuron::NeuronModel;
//! use rusty_netsim::monitor::{Ranks, Schedule};
//! use rusty_netsim::simulator::Simulation;
//!
//! let mut network = Network::new();
//! let pop = network.add_population("lif", NeuronModel::leaky_integrate_and_fire(2));
//! network
//!     .population_mut(pop)
//!     .unwrap()
//!     .set_attribute_all("i_offset", vec![0.5, 0.0])
//!     .unwrap();
//!
//! let mut simulation = Simulation::new(network);
//! simulation.initialize(1.0).unwrap();
//! let handle = simulation
//!     .monitor_population(pop, &["v", "spike"], Ranks::All, Schedule::every(2).unwrap())
//!     .unwrap();
//! simulation.run(10).unwrap();
//!
//! let monitor = simulation.monitor(handle).unwrap().as_population().unwrap();
//! assert_eq!(monitor.get("v").unwrap().len(), 5);
//! assert_eq!(simulation.time(), 10);
//! ```
pub mod context;
pub mod simulation;

pub use context::SimulationContext;
pub use simulation::{Simulation, StopMode};
