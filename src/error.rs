//! Error module for the Rusty NetSim library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq, Clone)]
pub enum SimError {
    /// Error for malformed connectivity, e.g., mismatched row and column index lists.
    InvalidTopology(String),
    /// Error for arrays whose shape does not match the population or the connectivity.
    ShapeMismatch(String),
    /// Error for out of bounds access, e.g., rank larger than the population size.
    OutOfBounds(String),
    /// Error for invalid parameters, e.g., a zero sampling period.
    InvalidParameter(String),
    /// Error for a projection whose synapse model cannot be driven by its source population.
    IncompatibleProjection(String),
    /// Error for a variable name that does not exist on the population or projection.
    UnknownAttribute(String),
    /// Error for simulation control calls issued before `initialize`.
    NotInitialized,
    /// Error for I/O operations.
    IOError(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimError::InvalidTopology(e) => write!(f, "Invalid topology: {}", e),
            SimError::ShapeMismatch(e) => write!(f, "Shape mismatch: {}", e),
            SimError::OutOfBounds(e) => write!(f, "Index out of bounds: {}", e),
            SimError::InvalidParameter(e) => write!(f, "Invalid parameters: {}", e),
            SimError::IncompatibleProjection(e) => write!(f, "Incompatible projection: {}", e),
            SimError::UnknownAttribute(e) => write!(f, "Unknown attribute: {}", e),
            SimError::NotInitialized => {
                write!(f, "The simulation must be initialized before it can run")
            }
            SimError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SimError {}
