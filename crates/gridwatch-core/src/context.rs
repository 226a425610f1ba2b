use crate::error::{GridError, GridResult};
use crate::measurement::MeasurementSet;
use crate::Network;

/// A grid model together with the measurements taken on it.
///
/// Every analysis receives this explicitly; there is no process-wide network.
#[derive(Debug, Clone, Default)]
pub struct GridContext {
    pub network: Network,
    pub measurements: MeasurementSet,
}

impl GridContext {
    pub fn new(network: Network, measurements: MeasurementSet) -> Self {
        Self {
            network,
            measurements,
        }
    }

    pub fn require_buses(&self) -> GridResult<()> {
        if self.network.bus_count() == 0 {
            return Err(GridError::Configuration(
                "grid model has no buses".to_string(),
            ));
        }
        Ok(())
    }

    pub fn require_measurements(&self) -> GridResult<()> {
        if self.measurements.is_empty() {
            return Err(GridError::Configuration(
                "measurement set is empty".to_string(),
            ));
        }
        Ok(())
    }
}
