//! S3-compatible object storage

use super::{GeneratedDocument, ObjectStorage, StorageError, StoredBlob};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use reqwest::Url;
use std::time::Duration;

/// Object storage backed by an S3-compatible service
///
/// Containers map to buckets. Locators have the form `s3://{bucket}/{key}`;
/// path-style `http(s)://{host}/{bucket}/{key}` locators are accepted when
/// signing. Signed URLs are SigV4 presigned GETs, so they only grant read
/// access to the one object.
#[derive(Clone)]
pub struct S3ObjectStorage {
    client: Client,
}

impl S3ObjectStorage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the standard AWS environment.
    ///
    /// A custom endpoint (MinIO, LocalStack) switches to path-style addressing.
    pub async fn from_env(endpoint: Option<&str>) -> Self {
        let sdk_config = aws_config::load_from_env().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = endpoint {
            tracing::info!(endpoint, "Using custom S3 endpoint");
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self::new(Client::from_conf(builder.build()))
    }

    pub fn locator(bucket: &str, key: &str) -> String {
        format!("s3://{}/{}", bucket, key)
    }

    async fn ensure_container(&self, bucket: &str) -> Result<(), StorageError> {
        if self.client.head_bucket().bucket(bucket).send().await.is_ok() {
            return Ok(());
        }

        tracing::info!(bucket, "Bucket not found, creating it");
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::ContainerUnavailable {
                container: bucket.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(())
    }
}

/// Split a blob locator into bucket and key.
///
/// Accepts `s3://bucket/key`, virtual-hosted
/// `https://bucket.s3[.region].amazonaws.com/key` and path-style
/// `http(s)://host/bucket/key`. Keys are percent-decoded; any query string is
/// ignored.
pub fn parse_blob_uri(uri: &str) -> Result<(String, String), StorageError> {
    let invalid = || StorageError::InvalidUri(uri.to_string());
    let decode = |segment: &str| {
        urlencoding::decode(segment)
            .map(|decoded| decoded.into_owned())
            .map_err(|_| invalid())
    };

    let url = Url::parse(uri).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?;
    let path = url.path().trim_start_matches('/');

    let (bucket, key) = match url.scheme() {
        "s3" => (host.to_string(), decode(path)?),
        "http" | "https" => match virtual_hosted_bucket(host) {
            Some(bucket) => (bucket.to_string(), decode(path)?),
            None => {
                let (bucket, key) = path.split_once('/').ok_or_else(invalid)?;
                (decode(bucket)?, decode(key)?)
            }
        },
        _ => return Err(invalid()),
    };

    if bucket.is_empty() || key.is_empty() {
        return Err(invalid());
    }

    Ok((bucket, key))
}

/// Bucket of an AWS virtual-hosted host such as `markups.s3.eu-west-1.amazonaws.com`
fn virtual_hosted_bucket(host: &str) -> Option<&str> {
    let service = host.strip_suffix(".amazonaws.com")?;
    let (bucket, region) = service.rsplit_once(".s3")?;

    if bucket.is_empty() || !(region.is_empty() || region.starts_with(['.', '-'])) {
        return None;
    }
    Some(bucket)
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn upload(
        &self,
        container: &str,
        name: &str,
        document: GeneratedDocument,
    ) -> Result<StoredBlob, StorageError> {
        self.ensure_container(container).await?;

        let content_type = document.content_type().to_string();
        let size = document.len();

        self.client
            .put_object()
            .bucket(container)
            .key(name)
            .content_type(content_type)
            .body(ByteStream::from(document.into_bytes()))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                container: container.to_string(),
                name: name.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::info!(bucket = container, key = name, size, "Uploaded object");

        Ok(StoredBlob {
            container: container.to_string(),
            name: name.to_string(),
            uri: Self::locator(container, name),
        })
    }

    async fn download(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let download_error = |message: String| StorageError::Download {
            container: container.to_string(),
            name: name.to_string(),
            message,
        };

        let output = self
            .client
            .get_object()
            .bucket(container)
            .key(name)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound {
                        container: container.to_string(),
                        name: name.to_string(),
                    }
                } else {
                    download_error(DisplayErrorContext(&e).to_string())
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        Ok(body.into_bytes().to_vec())
    }

    async fn list(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(container)
                .set_prefix(prefix.map(str::to_string))
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::List {
                    container: container.to_string(),
                    message: DisplayErrorContext(&e).to_string(),
                })?;

            names.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(names)
    }

    async fn signed_read_url(&self, blob_uri: &str, ttl: Duration) -> Result<String, StorageError> {
        let (bucket, key) = parse_blob_uri(blob_uri)?;
        let signing_error = |message: String| StorageError::Signing {
            uri: blob_uri.to_string(),
            message,
        };

        let presigning = PresigningConfig::expires_in(ttl).map_err(|e| signing_error(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .presigned(presigning)
            .await
            .map_err(|e| signing_error(DisplayErrorContext(&e).to_string()))?;

        tracing::debug!(bucket = %bucket, key = %key, ttl_secs = ttl.as_secs(), "Issued signed read URL");
        Ok(request.uri().to_string())
    }
}
