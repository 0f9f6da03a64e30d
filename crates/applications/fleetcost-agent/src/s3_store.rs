//! S3 object access
//!
//! Reads the price table and keeps the billing watermark as a small text
//! object.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use fleetcost_core::{format_checkpoint, parse_checkpoint, CheckpointStore, CostError};
use tracing::{debug, info};

/// Build an S3 client for a region from the default credential chain
pub async fn create_s3_client(region: &str) -> Client {
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;

    info!(region = %region, "S3 client ready");
    Client::new(&config)
}

/// Fetch an object body
pub async fn read_object(client: &Client, bucket: &str, key: &str) -> Result<Vec<u8>> {
    debug!("Reading s3://{}/{}", bucket, key);

    let response = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(AgentError::from_s3)?;

    let body = response
        .body
        .collect()
        .await
        .map_err(|e| AgentError::Io(std::io::Error::other(e)))?;

    Ok(body.into_bytes().to_vec())
}

/// Watermark kept in an S3 object
pub struct S3CheckpointStore {
    client: Client,
    bucket: String,
    key: String,
}

impl S3CheckpointStore {
    /// Create a store for `s3://bucket/key`
    pub fn new(client: Client, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl CheckpointStore for S3CheckpointStore {
    async fn load(&self) -> fleetcost_core::Result<DateTime<Utc>> {
        let response = match self.client.get_object().bucket(&self.bucket).key(&self.key).send().await {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(CostError::CheckpointMissing(self.describe()));
            }
            Err(e) => return Err(CostError::Io(std::io::Error::other(aws_sdk_s3::Error::from(e)))),
        };

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| CostError::Io(std::io::Error::other(e)))?;

        let raw = String::from_utf8_lossy(&body.into_bytes()).into_owned();
        parse_checkpoint(&self.describe(), &raw)
    }

    async fn store(&self, at: DateTime<Utc>) -> fleetcost_core::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type("text/plain")
            .body(ByteStream::from(format_checkpoint(at).into_bytes()))
            .send()
            .await
            .map_err(|e| CostError::checkpoint_write(self.describe(), aws_sdk_s3::Error::from(e)))?;

        debug!(checkpoint = %self.describe(), at = %at, "Stored billing watermark");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}
