//! S3-compatible backend (AWS S3, R2, MinIO, Wasabi)

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use super::backend::{ListPage, ObjectBackend, ObjectHead, PutObject};
use crate::config::RemoteConfig;
use crate::error::{DirsnapError, Result};

/// Object backend talking to an S3-compatible endpoint
pub struct S3Backend {
    client: S3Client,
}

impl S3Backend {
    /// Build a client from explicit remote settings, falling back to the
    /// standard AWS environment/profile chain for anything left unset
    pub async fn connect(remote: &RemoteConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &remote.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &remote.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        match (&remote.access_key, &remote.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                loader = loader.credentials_provider(Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "dirsnap-config",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(DirsnapError::Config(
                    "access_key and secret_key must be set together".to_string(),
                ))
            }
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(remote.force_path_style)
            .build();

        Ok(Self {
            client: S3Client::from_conf(s3_config),
        })
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .set_continuation_token(token.map(str::to_string))
            .send()
            .await
            .map_err(|e| {
                DirsnapError::Listing(format!(
                    "s3://{}/{}: {}",
                    bucket,
                    prefix,
                    DisplayErrorContext(&e)
                ))
            })?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(String::from))
            .collect();

        Ok(ListPage {
            keys,
            continuation_token: response.next_continuation_token().map(String::from),
            has_more: response.is_truncated().unwrap_or(false),
        })
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DirsnapError::Store(DisplayErrorContext(&e).to_string()))?;

        Ok(ObjectHead {
            metadata: response.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn put_file(&self, bucket: &str, object: PutObject) -> Result<()> {
        let body = ByteStream::from_path(&object.local_path)
            .await
            .map_err(|e| {
                DirsnapError::Store(format!("{}: {}", object.local_path.display(), e))
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(&object.key)
            .body(body)
            .set_metadata(Some(object.metadata))
            .set_content_type(object.content_type)
            .set_checksum_sha256(object.checksum_sha256)
            .send()
            .await
            .map_err(|e| DirsnapError::Store(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        match self
            .client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            // S3 answers 204 for absent keys, but some compatible stores do not
            Err(e) if is_not_found(e.code()) => Ok(()),
            Err(e) => Err(DirsnapError::Store(DisplayErrorContext(&e).to_string())),
        }
    }

    async fn get_to_file(&self, bucket: &str, key: &str, local_path: &Path) -> Result<u64> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DirsnapError::Store(DisplayErrorContext(&e).to_string()))?;

        let mut reader = response.body.into_async_read();
        let mut file = tokio::fs::File::create(local_path).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;

        Ok(written)
    }
}

/// Error codes S3-compatible stores use for a missing object
fn is_not_found(code: Option<&str>) -> bool {
    matches!(code, Some("NoSuchKey" | "NotFound"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_object_codes_read_as_not_found() {
        assert!(is_not_found(Some("NoSuchKey")));
        assert!(is_not_found(Some("NotFound")));
        assert!(!is_not_found(Some("AccessDenied")));
        assert!(!is_not_found(Some("NoSuchBucket")));
        assert!(!is_not_found(None));
    }
}
