//! S3-backed blob store.
//!
//! S3 assigns `LastModified` on the server with one-second granularity,
//! so lock objects written within the same second share a timestamp and
//! are ordered by ETag instead (see [`crate::lock`]).

use super::blob::{BlobStore, ObjectMeta, StoreError};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::instrument;

pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Wrap an existing client.
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Build a client from the ambient AWS configuration (environment,
    /// profile, instance role).
    ///
    /// A custom `endpoint_url` switches to path-style addressing so that
    /// S3-compatible stores (MinIO, LocalStack) work.
    pub async fn connect(bucket: String, region: String, endpoint_url: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region));
        if let Some(url) = endpoint_url.as_deref() {
            loader = loader.endpoint_url(url);
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if endpoint_url.is_some() {
            builder = builder.force_path_style(true);
        }

        Self::new(Client::from_conf(builder.build()), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn to_utc(value: &AwsDateTime) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos()).ok_or_else(|| {
        StoreError::InvalidResponse(format!("timestamp out of range: {}", value.secs()))
    })
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip_all, fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StoreError::Request(format!("reading object body: {}", e)))?;
                Ok(Some(data.into_bytes()))
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_no_such_key())
                {
                    return Ok(None);
                }
                Err(StoreError::Request(DisplayErrorContext(&err).to_string()))
            }
        }
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ObjectMeta, StoreError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body));
        if let Some(at) = expires_at {
            request = request.expires(AwsDateTime::from_secs(at.timestamp()));
        }
        request
            .send()
            .await
            .map_err(|e| StoreError::Request(DisplayErrorContext(&e).to_string()))?;

        // PutObject does not echo LastModified; read it back.
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Request(DisplayErrorContext(&e).to_string()))?;

        let last_modified = head
            .last_modified()
            .ok_or_else(|| StoreError::InvalidResponse("missing LastModified".to_string()))
            .and_then(to_utc)?;

        Ok(ObjectMeta {
            key: key.to_string(),
            last_modified,
            digest: head.e_tag().unwrap_or_default().to_string(),
        })
    }

    #[instrument(skip_all, fields(prefix = %prefix))]
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StoreError::Request(DisplayErrorContext(&e).to_string()))?;

            for object in output.contents() {
                let (Some(key), Some(modified)) = (object.key(), object.last_modified()) else {
                    continue;
                };
                objects.push(ObjectMeta {
                    key: key.to_string(),
                    last_modified: to_utc(modified)?,
                    digest: object.e_tag().unwrap_or_default().to_string(),
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Request(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}
