//! S3-based object store implementation
//!
//! Stores partition objects in AWS S3 (or S3-compatible services like MinIO).
//! Object keys are used verbatim; the configured upload prefix is already part
//! of every key.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;

use super::error::ObjectStoreError;
use super::storage::{ObjectStore, validate_key};
use crate::core::config::S3Config;

/// Error codes S3 uses for throttling and server-side trouble
const TRANSIENT_ERROR_CODES: &[&str] = &[
    "SlowDown",
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "InternalError",
    "ServiceUnavailable",
    "Throttling",
    "ThrottlingException",
];

/// S3-based object store
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    /// S3 client
    client: Client,
    /// S3 bucket name
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 store with the given configuration
    pub async fn new(config: &S3Config) -> Result<Self, ObjectStoreError> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(ref region) = config.region {
            config_loader = config_loader.region(aws_sdk_s3::config::Region::new(region.clone()));
        }

        // Explicit credentials win over the default AWS provider chain
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            config_loader = config_loader.credentials_provider(
                aws_credential_types::Credentials::new(
                    key_id.clone(),
                    secret.clone(),
                    None,
                    None,
                    "coldpath-config",
                ),
            );
        }

        let sdk_config = config_loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(ref endpoint_url) = config.endpoint {
            // Path-style addressing is required for most S3-compatible services
            s3_config = s3_config
                .endpoint_url(endpoint_url.clone())
                .force_path_style(true);
        }

        let client = Client::from_conf(s3_config.build());

        tracing::debug!(
            bucket = %config.bucket,
            region = ?config.region,
            endpoint = ?config.endpoint,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

/// Map an SDK error onto the transient / permanent split used by the retry loop
fn classify<E>(operation: &str, err: SdkError<E, HttpResponse>) -> ObjectStoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            status == 429
                || status >= 500
                || ctx
                    .err()
                    .code()
                    .is_some_and(|code| TRANSIENT_ERROR_CODES.contains(&code))
        }
        _ => false,
    };

    let message = format!("S3 {} error: {}", operation, DisplayErrorContext(&err));
    if transient {
        ObjectStoreError::Transient(message)
    } else {
        ObjectStoreError::Permanent(message)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectStoreError> {
        validate_key(key)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| classify("put_object", e))?;

        tracing::debug!(key, size = data.len(), "Object stored in S3");

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        validate_key(key)?;

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if let SdkError::ServiceError(ctx) = &err
                    && ctx.err().is_no_such_key()
                {
                    return Err(ObjectStoreError::NotFound(key.to_string()));
                }
                return Err(classify("get_object", err));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| ObjectStoreError::Transient(format!("S3 body read error: {}", e)))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        validate_key(key)?;

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if let SdkError::ServiceError(ctx) = &err
                    && ctx.err().is_not_found()
                {
                    return Ok(false);
                }
                Err(classify("head_object", err))
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| classify("list_objects_v2", e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|k| k.to_string())),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(|s| s.to_string());
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn probe(&self) -> Result<(), ObjectStoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| classify("head_bucket", e))?;

        tracing::debug!(bucket = %self.bucket, "S3 bucket reachable");
        Ok(())
    }
}
