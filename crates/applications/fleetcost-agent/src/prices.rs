//! Price table loading
//!
//! The table is read once at startup. `.csv` objects are parsed as
//! `name,...,price` rows; anything else as a JSON object of
//! `instance type → USD/hour`.

use crate::config::Location;
use crate::error::{AgentError, Result};
use crate::s3_store::read_object;
use fleetcost_core::StaticPriceTable;
use tracing::info;

/// Load the price table from a file or S3
pub async fn load_prices(location: &Location, s3: Option<&aws_sdk_s3::Client>) -> Result<StaticPriceTable> {
    let bytes = match location {
        Location::File(path) => tokio::fs::read(path).await?,
        Location::S3 { bucket, key } => {
            let client = s3.ok_or_else(|| AgentError::config("S3 price location without an S3 client"))?;
            read_object(client, bucket, key).await?
        }
    };

    let table = StaticPriceTable::from_bytes(&location.to_string(), &bytes)?;
    info!(prices = %location, instance_types = table.len(), "Loaded price table");
    Ok(table)
}
