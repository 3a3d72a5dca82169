use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};

use super::{join_public_url, ObjectStore, ObjectVersion, StoreError, StoredObject};
use crate::config::S3Config;

/// S3-compatible bucket (AWS, Cloudflare R2, MinIO...).
pub struct S3Store {
    client: Client,
    bucket: String,
    public_base: String,
}

fn remote_error(e: impl std::error::Error) -> StoreError {
    StoreError::Remote(DisplayErrorContext(e).to_string())
}

impl S3Store {
    pub fn new(config: &S3Config, public_base: &str) -> S3Store {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "watchpage_bot",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            // R2 and MinIO don't do virtual-hosted buckets reliably.
            .force_path_style(true);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        S3Store {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            public_base: public_base.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(remote_error(e));
            }
        };

        // Same shape as `head`, so the two can be compared.
        let version = Some(ObjectVersion(output.e_tag().unwrap_or_default().to_string()));
        let data = output
            .body
            .collect()
            .await
            .map_err(remote_error)?
            .into_bytes()
            .to_vec();

        Ok(Some(StoredObject { data, version }))
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<Option<ObjectVersion>, StoreError> {
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(remote_error)?;

        Ok(output.e_tag().map(|tag| ObjectVersion(tag.to_string())))
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<Option<ObjectVersion>, StoreError> {
        let body = ByteStream::from_path(path).await.map_err(remote_error)?;
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(remote_error)?;

        Ok(output.e_tag().map(|tag| ObjectVersion(tag.to_string())))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectVersion>, StoreError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(ObjectVersion(
                output.e_tag().unwrap_or_default().to_string(),
            ))),
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(e) => Err(remote_error(e)),
        }
    }

    fn public_url(&self, key: &str) -> String {
        join_public_url(&self.public_base, key)
    }
}
