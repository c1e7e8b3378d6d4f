//! Configuration of a simulation run.
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::core::DEFAULT_DT;
use crate::error::SimError;

/// Settings of a simulation, loadable from a JSON file. Missing fields take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[serde(default)]
pub struct SimulationConfig {
    /// The integration time step.
    #[derivative(Default(value = "DEFAULT_DT"))]
    pub dt: f64,
    /// The seed of the random number generator.
    pub seed: u64,
    /// Number of steps between two progress messages; zero disables them.
    pub progress_interval: u64,
    /// Whether independent populations and large projections are processed in parallel.
    #[derivative(Default(value = "true"))]
    pub parallel: bool,
}

impl SimulationConfig {
    /// Check that the configuration describes a valid simulation.
    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.dt > 0.0) {
            return Err(SimError::InvalidParameter(format!(
                "time step must be positive, got {}",
                self.dt
            )));
        }
        Ok(())
    }

    /// Save the configuration to a file.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SimError> {
        let file = File::create(path).map_err(|e| SimError::IOError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| SimError::IOError(e.to_string()))?;
        writer.flush().map_err(|e| SimError::IOError(e.to_string()))
    }

    /// Load a configuration from a file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let file = File::open(path).map_err(|e| SimError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        let config: SimulationConfig =
            serde_json::from_reader(reader).map_err(|e| SimError::IOError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default() {
        let config = SimulationConfig::default();
        assert_eq!(config.dt, 1.0);
        assert_eq!(config.seed, 0);
        assert_eq!(config.progress_interval, 0);
        assert!(config.parallel);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_save_load() {
        let config = SimulationConfig {
            dt: 0.1,
            seed: 42,
            progress_interval: 100,
            parallel: false,
        };
        let temp_file = NamedTempFile::new().expect("Failed to create temporary file");
        config.save_to(temp_file.path()).unwrap();
        assert_eq!(SimulationConfig::load_from(temp_file.path()), Ok(config));
    }

    #[test]
    fn test_partial_file() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temporary file");
        write!(temp_file, "{{\"seed\": 7}}").unwrap();
        let config = SimulationConfig::load_from(temp_file.path()).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.dt, DEFAULT_DT);
        assert!(config.parallel);
    }

    #[test]
    fn test_invalid_file() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temporary file");
        write!(temp_file, "{{\"dt\": -1.0}}").unwrap();
        assert!(matches!(
            SimulationConfig::load_from(temp_file.path()),
            Err(SimError::InvalidParameter(_))
        ));
        assert!(matches!(
            SimulationConfig::load_from("no/such/config.json"),
            Err(SimError::IOError(_))
        ));
    }
}
