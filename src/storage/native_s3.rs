//! S3 source container
//!
//! Lists a bucket (optionally below a key prefix) with `ListObjectsV2`
//! continuation tokens and streams object bodies straight from `GetObject`.
//! Works against S3-compatible endpoints (MinIO, Wasabi, etc.) when an
//! endpoint override is configured.

use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result};
use crate::storage::{ObjectRef, ObjectStream, Page, SourceMarker, SourceSide, SourceStore};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;

/// Region used when none is configured.
const DEFAULT_REGION: &str = "us-east-1";

/// Largest page `ListObjectsV2` will return.
const MAX_KEYS_LIMIT: usize = 1000;

/// Split `bucket[/prefix]` into the bucket and a `/`-terminated prefix
fn split_container(container: &str) -> Result<(String, Option<String>)> {
    let trimmed = container.trim_matches('/');
    let (bucket, prefix) = match trimmed.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
        None => (trimmed, ""),
    };
    if bucket.is_empty() {
        return Err(MirrorError::config(format!(
            "Invalid S3 container '{}': bucket name is empty",
            container
        )));
    }
    let prefix = (!prefix.is_empty()).then(|| format!("{}/", prefix));
    Ok((bucket.to_string(), prefix))
}

/// An S3 bucket read as a source container
pub struct S3Source {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
    max_keys: i32,
}

impl S3Source {
    /// Build a client from the run configuration
    pub async fn connect(config: &MirrorConfig) -> Result<Self> {
        let (bucket, prefix) = split_container(&config.container)?;
        let (key_id, secret) = config
            .credentials
            .pair()
            .ok_or_else(|| MirrorError::config("S3 backend requires ACCOUNT_NAME and ACCOUNT_KEY"))?;

        let region = config.region.clone().unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .credentials_provider(aws_credential_types::Credentials::new(
                key_id,
                secret,
                None,
                None,
                "blobshare-static",
            ));

        // S3-compatible services
        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let aws_config = builder.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.endpoint.is_some() {
            s3_config = s3_config.force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config.build()),
            bucket,
            prefix,
            max_keys: config.page_size.clamp(1, MAX_KEYS_LIMIT) as i32,
        })
    }

    /// Object name for a key: the key below the configured prefix
    fn name_for(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix.as_str()).unwrap_or(key).to_string(),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl SourceStore for S3Source {
    fn describe(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("s3://{}/{}", self.bucket, prefix),
            None => format!("s3://{}", self.bucket),
        }
    }

    async fn list_page(&self, marker: &SourceMarker) -> Result<Page<ObjectRef, SourceSide>> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(self.prefix.clone())
            .set_continuation_token(marker.token().map(str::to_string))
            .max_keys(self.max_keys)
            .send()
            .await
            .map_err(|e| MirrorError::source_list(DisplayErrorContext(&e)))?;

        let mut items = Vec::with_capacity(resp.contents().len());
        for object in resp.contents() {
            let Some(key) = object.key() else { continue };
            // Zero-byte "directory" placeholders
            if key.ends_with('/') {
                tracing::warn!("Skipping directory placeholder {}", key);
                continue;
            }
            let size = object.size().and_then(|s| u64::try_from(s).ok());
            items.push(ObjectRef::with_key(self.name_for(key), key).sized(size));
        }

        let next = if resp.is_truncated().unwrap_or(false) {
            resp.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(Page {
            items,
            next_marker: SourceMarker::from_token(next),
        })
    }

    async fn open_read(&self, object: &ObjectRef) -> Result<ObjectStream> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| MirrorError::source_read(&object.name, DisplayErrorContext(&e)))?;

        let size = resp.content_length().and_then(|s| u64::try_from(s).ok());
        Ok(ObjectStream::new(resp.body.into_async_read(), size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_container() {
        assert_eq!(split_container("bucket").unwrap(), ("bucket".to_string(), None));
        assert_eq!(
            split_container("bucket/exports/daily/").unwrap(),
            ("bucket".to_string(), Some("exports/daily/".to_string()))
        );
        assert!(split_container("/").is_err());
    }
}
