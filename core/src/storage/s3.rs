use std::path::Path;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use tracing::{debug, info};

use crate::config::S3Config;
use crate::errors::StorageError;
use crate::storage::{ObjectStorage, join_key};

const DEFAULT_REGION: &str = "us-east-1";

pub struct S3Storage {
    client: Client,
    config: S3Config,
}

impl S3Storage {
    pub async fn new(config: S3Config) -> Self {
        let region = aws_config::Region::new(config.region.clone());

        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest()).region(region);

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            aws_config_builder =
                aws_config_builder.credentials_provider(aws_sdk_s3::config::Credentials::new(
                    access_key,
                    secret_key,
                    config.session_token.clone(),
                    None,
                    "taxi-ingest",
                ));
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config_builder =
            aws_sdk_s3::config::Builder::from(&aws_config).force_path_style(config.force_path_style);
        if let Some(endpoint_url) = &config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        let client = Client::from_conf(s3_config_builder.build());
        Self { client, config }
    }

    /// Wraps an already configured client.
    pub fn with_client(client: Client, config: S3Config) -> Self {
        Self { client, config }
    }

    async fn create_bucket(&self) -> Result<(), StorageError> {
        let mut request = self.client.create_bucket().bucket(&self.config.bucket);
        if self.config.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(
                        self.config.region.as_str(),
                    ))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| request_error("CreateBucket", &self.config.bucket, &e))?;
        info!("Created S3 bucket '{}'", self.config.bucket);
        Ok(())
    }
}

impl ObjectStorage for S3Storage {
    fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn object_key(&self, name: &str) -> String {
        join_key(&self.config.prefix, name)
    }

    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        match self
            .client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
        {
            Ok(_) => {
                info!("S3 bucket '{}' exists and is accessible", self.config.bucket);
                Ok(())
            }
            Err(e) => match http_status(&e) {
                Some(404) => {
                    info!("S3 bucket '{}' not found, creating it", self.config.bucket);
                    self.create_bucket().await
                }
                Some(403) => Err(StorageError::BucketForbidden {
                    bucket: self.config.bucket.clone(),
                }),
                _ => Err(request_error("HeadBucket", &self.config.bucket, &e)),
            },
        }
    }

    async fn upload_file(&self, key: &str, path: &Path) -> Result<(), StorageError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::Request {
                operation: "ReadFile".to_string(),
                target: path.display().to_string(),
                reason: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| request_error("PutObject", key, &e))?;

        debug!("Uploaded {} to s3://{}/{}", path.display(), self.config.bucket, key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if http_status(&e) == Some(404) => Ok(false),
            Err(e) => Err(request_error("HeadObject", key, &e)),
        }
    }
}

fn http_status<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

fn request_error<E>(operation: &str, target: &str, err: &SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata,
{
    let reason = match err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            format!(
                "{}: {}",
                inner.code().unwrap_or("unknown"),
                inner.message().unwrap_or("no message")
            )
        }
        other => other.to_string(),
    };
    StorageError::Request {
        operation: operation.to_string(),
        target: target.to_string(),
        reason,
    }
}
