//! Artifact upload to an object store bucket.

use std::future::Future;
use std::path::Path;

use chrono::Local;
use log::info;
use secrecy::{ExposeSecret, SecretString};

use crate::error::UploadError;

/// Hands a finished artifact to remote storage.
pub trait Uploader: Send + Sync {
    /// Upload `local_dir/filename`.
    fn upload(
        &self,
        filename: &str,
        local_dir: &Path,
    ) -> impl Future<Output = Result<(), UploadError>> + Send;
}

/// Bucket settings for [`BucketUploader`].
#[derive(Debug, Clone, Default)]
pub struct BucketConfig {
    /// Bucket name, used as the host prefix.
    pub bucket_name: String,

    /// Store domain, e.g. `storage.example.com`.
    pub domain_name: String,

    /// Access key id.
    pub access_key: String,

    /// Access key secret.
    pub secret_key: Option<SecretString>,
}

impl BucketConfig {
    /// Whether bucket and domain are both set.
    pub fn is_configured(&self) -> bool {
        !self.bucket_name.is_empty() && !self.domain_name.is_empty()
    }

    /// URL for an object key.
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "https://{}.{}/{}",
            self.bucket_name,
            self.domain_name.trim_start_matches('.'),
            key
        )
    }
}

/// Uploads artifacts with an HTTP PUT into a bucket.
///
/// Object keys are the artifact name plus a local timestamp, so repeated
/// runs never overwrite earlier backups.
#[derive(Debug, Clone)]
pub struct BucketUploader {
    config: BucketConfig,
    client: reqwest::Client,
}

impl BucketUploader {
    /// Create an uploader for `config`.
    pub fn new(config: BucketConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Object key for an artifact uploaded now.
    pub fn object_key(filename: &str) -> String {
        format!("{}-{}", filename, Local::now().format("%Y%m%d%H%M%S"))
    }
}

impl Uploader for BucketUploader {
    async fn upload(&self, filename: &str, local_dir: &Path) -> Result<(), UploadError> {
        if !self.config.is_configured() {
            return Err(UploadError::NotConfigured);
        }

        let path = local_dir.join(filename);
        let body = tokio::fs::read(&path).await.map_err(|source| UploadError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let key = Self::object_key(filename);
        let url = self.config.object_url(&key);
        info!("Uploading {} ({} bytes) as {}", path.display(), body.len(), url);

        let mut request = self.client.put(&url).body(body);
        if !self.config.access_key.is_empty() {
            request = request.basic_auth(
                &self.config.access_key,
                self.config.secret_key.as_ref().map(|s| s.expose_secret()),
            );
        }

        request.send().await?.error_for_status()?;
        Ok(())
    }
}
