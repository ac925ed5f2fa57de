use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::{Acl, ObjectStore, ObjectSummary, Page};

const DEFAULT_REGION: &str = "us-east-1";

fn endpoint_for_region(region: &str) -> String {
    format!("https://s3.{region}.wasabisys.com")
}

/// Static access-key/secret credential pair read from the environment by
/// the config crate (`WASABI_ACCESS_KEY` / `WASABI_SECRET_KEY`).
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
}

/// Region-aware object store client.
///
/// Any operation that fails against the client built for the configured
/// default region is retried through a client built for the bucket's
/// actual region (§4.1); region-bound clients are cached for reuse.
pub struct S3ObjectStore {
    credentials: S3Credentials,
    default_region: String,
    default_client: Client,
    region_clients: Arc<RwLock<std::collections::HashMap<String, Client>>>,
    bucket_regions: Arc<RwLock<std::collections::HashMap<String, String>>>,
}

impl S3ObjectStore {
    pub fn new(credentials: S3Credentials, default_region: impl Into<String>) -> Self {
        let default_region = default_region.into();
        let default_client = build_client(&credentials, &default_region);
        Self {
            credentials,
            default_region,
            default_client,
            region_clients: Arc::new(RwLock::new(std::collections::HashMap::new())),
            bucket_regions: Arc::new(RwLock::new(std::collections::HashMap::new())),
        }
    }

    fn client_for_region(&self, region: &str) -> Client {
        if region == self.default_region {
            return self.default_client.clone();
        }
        if let Some(client) = self.region_clients.read().get(region) {
            return client.clone();
        }
        let client = build_client(&self.credentials, region);
        self.region_clients
            .write()
            .insert(region.to_string(), client.clone());
        client
    }

    async fn client_for_bucket(&self, bucket: &str) -> Client {
        if let Some(region) = self.bucket_regions.read().get(bucket).cloned() {
            return self.client_for_region(&region);
        }
        match self.resolve_region(bucket).await {
            Ok(region) => {
                self.bucket_regions
                    .write()
                    .insert(bucket.to_string(), region.clone());
                self.client_for_region(&region)
            }
            Err(e) => {
                warn!("falling back to default region for bucket {bucket}: {e}");
                self.default_client.clone()
            }
        }
    }

    async fn resolve_region(&self, bucket: &str) -> Result<String> {
        let resp = self
            .default_client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::BucketRegion {
                bucket: bucket.to_string(),
                reason: e.to_string(),
            })?;

        let region = resp
            .location_constraint()
            .map(|c| c.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_REGION)
            .to_string();
        Ok(region)
    }
}

fn build_client(credentials: &S3Credentials, region: &str) -> Client {
    let creds = Credentials::new(
        credentials.access_key.clone(),
        credentials.secret_key.clone(),
        None,
        None,
        "wasabi-scan",
    );
    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .endpoint_url(endpoint_for_region(region))
        .credentials_provider(creds)
        .build();
    Client::from_conf(config)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_buckets(&self) -> Result<Vec<String>> {
        let resp = self
            .default_client
            .list_buckets()
            .send()
            .await
            .map_err(|e| StorageError::ListBuckets(e.to_string()))?;

        let mut names: Vec<String> = resp
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(|n| n.to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        if let Some(region) = self.bucket_regions.read().get(bucket).cloned() {
            return Ok(region);
        }
        let region = self.resolve_region(bucket).await?;
        self.bucket_regions
            .write()
            .insert(bucket.to_string(), region.clone());
        Ok(region)
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<Page> {
        let client = self.client_for_bucket(bucket).await;

        let mut request = client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .delimiter("/");
        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| StorageError::ListPage {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                reason: e.to_string(),
            })?;

        let objects = resp
            .contents()
            .iter()
            .filter_map(|o| o.key().map(|k| ObjectSummary { key: k.to_string() }))
            .collect();
        let common_prefixes = resp
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(|s| s.to_string()))
            .collect();
        let next_token = if resp.is_truncated().unwrap_or(false) {
            resp.next_continuation_token().map(|t| t.to_string())
        } else {
            None
        };

        Ok(Page {
            objects,
            common_prefixes,
            next_token,
        })
    }

    async fn download(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()> {
        let client = self.client_for_bucket(bucket).await;

        let object = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Download {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Download {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?
            .into_bytes();

        let local_path = local_path.to_path_buf();
        let (bucket_owned, key_owned) = (bucket.to_string(), key.to_string());
        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write as _;

            let parent = local_path.parent().unwrap_or_else(|| Path::new("."));
            let mut temp = tempfile::NamedTempFile::new_in(parent)?;
            temp.write_all(&body)?;
            temp.flush()?;
            temp.persist(&local_path).map_err(|e| StorageError::Download {
                bucket: bucket_owned.clone(),
                key: key_owned.clone(),
                reason: e.to_string(),
            })?;
            Ok(())
        })
        .await
        .expect("download write task panicked")?;
        Ok(())
    }

    async fn upload(&self, bucket: &str, key: &str, bytes: &[u8], acl: Option<Acl>) -> Result<()> {
        let client = self.client_for_bucket(bucket).await;

        if let Some(parent) = key.rsplit_once('/').map(|(p, _)| p) {
            let marker_key = format!("{parent}/");
            if let Err(e) = client
                .put_object()
                .bucket(bucket)
                .key(&marker_key)
                .body(aws_sdk_s3::primitives::ByteStream::from_static(b""))
                .send()
                .await
            {
                debug!("ignoring directory-marker put failure for {marker_key}: {e}");
            }
        }

        let mut request = client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(bytes.to_vec()));
        if matches!(acl, Some(Acl::PublicRead)) {
            request = request.acl(aws_sdk_s3::types::ObjectCannedAcl::PublicRead);
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
