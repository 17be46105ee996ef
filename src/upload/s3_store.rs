//! S3 Object Store Implementation
//!
//! Backed by the `object_store` crate's AWS client.
//!
//! Supports:
//! - AWS S3
//! - S3-compatible services (MinIO, LocalStack, etc.) via `aws_endpoint_url`
//! - SSE-KMS with an explicit or default key
//!
//! Region, and any credential the configuration leaves unset, come from the
//! standard `AWS_*` environment.
//!
//! Keys are stored exactly as rendered; `ObjectPath::parse` keeps characters
//! such as `{` or `~` that `ObjectPath::from` would percent-encode.

use crate::config::Config;
use crate::upload::encryption::Encryption;
use crate::upload::object_store::{read_part, ObjectStore, ObjectStoreError, StoreFuture};
use bytes::Bytes;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore as ObjectStoreTrait, WriteMultipart};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Config key selecting the server-side encryption type
const SSE_TYPE_KEY: &str = "aws_server_side_encryption";
/// Config key carrying the KMS key id
const SSE_KMS_KEY_ID_KEY: &str = "aws_sse_kms_key_id";
/// Parts of one multipart upload in flight at once
const PARTS_IN_FLIGHT_MAX: usize = 4;

/// S3 object store for production runs
#[derive(Clone)]
pub struct S3ObjectStore {
    store: Arc<dyn ObjectStoreTrait>,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client for `config.s3_bucket`. No request is made here.
    pub fn from_config(config: &Config) -> Result<Self, ObjectStoreError> {
        for warning in unapplied_credential_settings(config) {
            warn!("{}", warning);
        }

        let store = Self::builder(config)?.build().map_err(map_error)?;
        Ok(S3ObjectStore {
            store: Arc::new(store),
            bucket: config.s3_bucket.clone(),
        })
    }

    /// Wrap an existing client
    pub fn from_store(store: Arc<dyn ObjectStoreTrait>, bucket: String) -> Self {
        S3ObjectStore { store, bucket }
    }

    fn builder(config: &Config) -> Result<AmazonS3Builder, ObjectStoreError> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.s3_bucket);

        if let Some(endpoint) = &config.aws_endpoint_url {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let credentials = &config.credentials;
        if let (Some(key_id), Some(secret)) = (&credentials.access_key_id, &credentials.secret_access_key) {
            builder = builder
                .with_access_key_id(key_id)
                .with_secret_access_key(secret);
        }
        if let Some(token) = &credentials.session_token {
            builder = builder.with_token(token);
        }

        apply_encryption(builder, &config.encryption)
    }
}

/// Configured settings the S3 client leaves to the ambient AWS credential chain
fn unapplied_credential_settings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();
    if let Some(profile) = &config.credentials.profile {
        warnings.push(format!(
            "aws_profile {} is not loaded by the S3 client, export its credentials into the AWS_* environment",
            profile
        ));
    }
    if let Some(role_arn) = &config.role_arn {
        warnings.push(format!(
            "role_arn {} is not assumed by the S3 client, provide credentials for the role through the AWS_* environment",
            role_arn
        ));
    }
    warnings
}

fn config_key(name: &str) -> Result<AmazonS3ConfigKey, ObjectStoreError> {
    name.parse::<AmazonS3ConfigKey>().map_err(map_error)
}

fn apply_encryption(builder: AmazonS3Builder, encryption: &Encryption) -> Result<AmazonS3Builder, ObjectStoreError> {
    match encryption {
        Encryption::None => Ok(builder),
        Encryption::Kms { key_id } => {
            let builder = builder.with_config(config_key(SSE_TYPE_KEY)?, "aws:kms");
            match key_id {
                Some(key_id) => Ok(builder.with_config(config_key(SSE_KMS_KEY_ID_KEY)?, key_id)),
                None => Ok(builder),
            }
        }
    }
}

fn object_path(key: &str) -> Result<ObjectPath, ObjectStoreError> {
    ObjectPath::parse(key).map_err(|e| ObjectStoreError::Other(format!("Invalid object key {}: {}", key, e)))
}

/// Convert object_store errors, keeping the retryable ones distinguishable
fn map_error(err: object_store::Error) -> ObjectStoreError {
    match &err {
        object_store::Error::NotFound { .. } => ObjectStoreError::NotFound(err.to_string()),
        // Request failures that outlived the client's own retries
        object_store::Error::Generic { .. } | object_store::Error::JoinError { .. } => {
            ObjectStoreError::Transient(err.to_string())
        }
        _ => ObjectStoreError::Other(err.to_string()),
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: Bytes) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = object_path(key)?;
            self.store.put(&path, data.into()).await.map_err(map_error)?;
            Ok(())
        })
    }

    fn put_multipart<'a>(&'a self, key: &'a str, path: &'a Path, part_size: usize) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let location = object_path(key)?;
            let mut file = tokio::fs::File::open(path).await?;
            let upload = self.store.put_multipart(&location).await.map_err(map_error)?;
            let mut writer = WriteMultipart::new_with_chunk_size(upload, part_size);

            let mut bytes = 0u64;
            loop {
                let part = match read_part(&mut file, part_size).await {
                    Ok(part) => part,
                    Err(e) => {
                        // Leave no orphaned parts behind
                        let _ = writer.abort().await;
                        return Err(e.into());
                    }
                };
                if part.is_empty() {
                    break;
                }
                if let Err(e) = writer.wait_for_capacity(PARTS_IN_FLIGHT_MAX).await {
                    let _ = writer.abort().await;
                    return Err(map_error(e));
                }
                bytes += part.len() as u64;
                writer.write(&part);
            }

            writer.finish().await.map_err(map_error)?;
            debug!("Multipart upload of {} finished ({} bytes)", key, bytes);
            Ok(bytes)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Bytes> {
        Box::pin(async move {
            let path = object_path(key)?;
            let result = self.store.get(&path).await.map_err(map_error)?;
            result.bytes().await.map_err(map_error)
        })
    }

    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn config_value(builder: &AmazonS3Builder, name: &str) -> Option<String> {
        builder.get_config_value(&config_key(name).unwrap())
    }

    #[test]
    fn test_kms_with_key() {
        let builder = apply_encryption(
            AmazonS3Builder::new(),
            &Encryption::Kms {
                key_id: Some("key-123".to_string()),
            },
        )
        .unwrap();
        assert_eq!(config_value(&builder, SSE_TYPE_KEY), Some("aws:kms".to_string()));
        assert_eq!(config_value(&builder, SSE_KMS_KEY_ID_KEY), Some("key-123".to_string()));
    }

    #[test]
    fn test_default_kms() {
        let builder = apply_encryption(AmazonS3Builder::new(), &Encryption::Kms { key_id: None }).unwrap();
        assert_eq!(config_value(&builder, SSE_TYPE_KEY), Some("aws:kms".to_string()));
        assert_eq!(config_value(&builder, SSE_KMS_KEY_ID_KEY), None);
    }

    #[test]
    fn test_no_encryption() {
        let builder = apply_encryption(AmazonS3Builder::new(), &Encryption::None).unwrap();
        assert_eq!(config_value(&builder, SSE_TYPE_KEY), None);
    }

    #[test]
    fn test_unapplied_credential_settings_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::test(dir.path().to_path_buf());
        assert!(unapplied_credential_settings(&config).is_empty());

        config.credentials.profile = Some("analytics".to_string());
        config.role_arn = Some("arn:aws:iam::123:role/loader".to_string());
        let warnings = unapplied_credential_settings(&config);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("analytics"));
        assert!(warnings[1].contains("arn:aws:iam::123:role/loader"));
    }

    #[test]
    fn test_error_mapping() {
        let not_found = object_store::Error::NotFound {
            path: "a".to_string(),
            source: "missing".into(),
        };
        assert!(matches!(map_error(not_found), ObjectStoreError::NotFound(_)));

        let generic = object_store::Error::Generic {
            store: "S3",
            source: "connection reset".into(),
        };
        assert!(map_error(generic).is_transient());
    }

    #[tokio::test]
    async fn test_put_through_wrapped_client() {
        let store = S3ObjectStore::from_store(Arc::new(InMemory::new()), "bucket".to_string());
        store.put("users/users.json", Bytes::from_static(b"{}\n")).await.unwrap();

        assert_eq!(store.get("users/users.json").await.unwrap(), Bytes::from_static(b"{}\n"));
        assert_eq!(store.location(), "s3://bucket");
    }

    #[tokio::test]
    async fn test_keys_are_stored_as_rendered() {
        let inner = Arc::new(InMemory::new());
        let store = S3ObjectStore::from_store(inner.clone(), "bucket".to_string());

        for key in ["{raw}-s.json", "pre%x.json", "a~b/c#d.json"] {
            store.put(key, Bytes::from_static(b"{}\n")).await.unwrap();
        }

        let listed = inner.list_with_delimiter(None).await.unwrap();
        let mut roots: Vec<String> = listed.objects.iter().map(|o| o.location.to_string()).collect();
        roots.sort();
        assert_eq!(roots, vec!["pre%x.json".to_string(), "{raw}-s.json".to_string()]);
        assert_eq!(listed.common_prefixes[0].as_ref(), "a~b");

        let nested = inner.head(&ObjectPath::parse("a~b/c#d.json").unwrap()).await.unwrap();
        assert_eq!(nested.location.as_ref(), "a~b/c#d.json");
        assert_eq!(store.get("a~b/c#d.json").await.unwrap(), Bytes::from_static(b"{}\n"));
    }

    #[tokio::test]
    async fn test_multipart_upload_streams_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let contents: Vec<u8> = (0..100u8).collect();
        std::fs::write(&path, &contents).unwrap();

        let inner = Arc::new(InMemory::new());
        let store = S3ObjectStore::from_store(inner.clone(), "bucket".to_string());
        let bytes = store.put_multipart("users/users.json", &path, 8).await.unwrap();

        assert_eq!(bytes, 100);
        assert_eq!(store.get("users/users.json").await.unwrap(), Bytes::from(contents));
    }
}
