//! In-memory `ObjectStore` double used by the scanner/pipeline unit tests.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::{Acl, ObjectStore, ObjectSummary, Page};

/// A single bucket's worth of objects, addressed by key.
#[derive(Default)]
struct Bucket {
    region: String,
    objects: HashMap<String, Vec<u8>>,
}

/// Fake object store holding everything in memory, keyed by bucket name.
///
/// Pagination is driven by `page_size`: `list_page` returns at most that
/// many entries per call and hands back a `next_token` (the key to resume
/// from) whenever more remain, so scanner tests can exercise the
/// continuation-token loop without a real endpoint.
pub struct InMemoryObjectStore {
    buckets: Mutex<HashMap<String, Bucket>>,
    page_size: usize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            page_size: 200,
        }
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            page_size,
        }
    }

    /// Seeds a bucket with an object, creating the bucket (in `us-east-1`)
    /// if it doesn't exist yet.
    pub fn seed(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        let mut buckets = self.buckets.lock();
        let entry = buckets.entry(bucket.to_string()).or_insert_with(|| Bucket {
            region: "us-east-1".to_string(),
            objects: HashMap::new(),
        });
        entry.objects.insert(key.to_string(), bytes.into());
    }

    pub fn set_region(&self, bucket: &str, region: &str) {
        let mut buckets = self.buckets.lock();
        let entry = buckets.entry(bucket.to_string()).or_insert_with(|| Bucket {
            region: region.to_string(),
            objects: HashMap::new(),
        });
        entry.region = region.to_string();
    }

    /// Contents of an uploaded or seeded object, for assertions.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets
            .lock()
            .get(bucket)
            .and_then(|b| b.objects.get(key).cloned())
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.get(bucket, key).is_some()
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_buckets(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.buckets.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        Ok(self
            .buckets
            .lock()
            .get(bucket)
            .map(|b| b.region.clone())
            .unwrap_or_else(|| "us-east-1".to_string()))
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<Page> {
        let buckets = self.buckets.lock();
        let Some(b) = buckets.get(bucket) else {
            return Ok(Page::default());
        };

        let mut direct_children = std::collections::BTreeMap::new();
        for key in b.objects.keys() {
            if !key.starts_with(prefix) {
                continue;
            }
            let rest = &key[prefix.len()..];
            match rest.find('/') {
                Some(idx) => {
                    let child_prefix = format!("{prefix}{}", &rest[..=idx]);
                    direct_children.entry(child_prefix).or_insert(true);
                }
                None => {
                    direct_children.insert(key.clone(), false);
                }
            }
        }

        let mut all: Vec<(String, bool)> = direct_children.into_iter().collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));

        let start = match &continuation_token {
            Some(token) => all
                .iter()
                .position(|(k, _)| k == token)
                .map(|idx| idx + 1)
                .unwrap_or(0),
            None => 0,
        };

        let end = (start + self.page_size).min(all.len());
        let slice = &all[start..end];

        let mut objects = Vec::new();
        let mut common_prefixes = Vec::new();
        for (name, is_prefix) in slice {
            if *is_prefix {
                common_prefixes.push(name.clone());
            } else {
                objects.push(ObjectSummary { key: name.clone() });
            }
        }

        let next_token = if end < all.len() {
            Some(all[end - 1].0.clone())
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
        let bytes = self.get(bucket, key).unwrap_or_default();
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local_path, bytes)?;
        Ok(())
    }

    async fn upload(&self, bucket: &str, key: &str, bytes: &[u8], _acl: Option<Acl>) -> Result<()> {
        self.seed(bucket, key, bytes.to_vec());
        Ok(())
    }
}
