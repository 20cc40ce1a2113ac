use async_trait::async_trait;

use concord_core::{Coordinates, DataSnapshot, TimeWindow};

use crate::error::DataSourceError;

/// Data-acquisition collaborator that assembles a snapshot for a location.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn gather(
        &self,
        coordinates: Coordinates,
        radius_m: Option<f64>,
        category: &str,
        time_range: Option<TimeWindow>,
    ) -> Result<DataSnapshot, DataSourceError>;
}
