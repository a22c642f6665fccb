use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as StorePath;
use object_store::{ClientOptions, ObjectStore as RemoteStore, PutPayload, RetryConfig};
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// Key-addressed object store. Only whole-file puts are needed.
pub trait ObjectStore {
    fn put_file(&self, key: &str, path: &Path) -> Result<()>;
    fn public_url(&self, key: &str) -> String;
}

/// Access key, secret key and optional endpoint, one per line.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid credentials file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content.lines().map(str::trim);
        let access_key = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| anyhow!("missing access key on line 1"))?
            .to_string();
        let secret_key = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| anyhow!("missing secret key on line 2"))?
            .to_string();
        let endpoint = lines
            .next()
            .filter(|line| !line.is_empty())
            .map(|line| line.trim_end_matches('/').to_string());
        Ok(Self {
            access_key,
            secret_key,
            endpoint,
        })
    }
}

/// S3 connection settings resolved from the config and credentials file.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub public_base: Option<String>,
    pub timeout: Duration,
}

/// Runs an async `object_store` backend on a private current-thread runtime
/// so the pipeline stays synchronous.
struct BlockingStore {
    inner: Arc<dyn RemoteStore>,
    runtime: Runtime,
}

impl BlockingStore {
    fn new(inner: Arc<dyn RemoteStore>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start storage runtime")?;
        Ok(Self { inner, runtime })
    }

    fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let location =
            StorePath::parse(key).with_context(|| format!("Invalid object key: {key}"))?;
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read {} for upload", path.display()))?;
        debug!(key, bytes = bytes.len(), "PUT object");
        self.runtime
            .block_on(self.inner.put(&location, PutPayload::from(bytes)))
            .with_context(|| format!("Failed to store object {key}"))?;
        Ok(())
    }
}

/// S3-compatible store (AWS, Ceph RGW). Requests are SigV4-signed by
/// `object_store`; keys are addressed path-style under the bucket.
pub struct S3ObjectStore {
    store: BlockingStore,
    public_base: String,
}

impl S3ObjectStore {
    pub fn new(settings: S3Settings, credentials: Credentials) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .or_else(|| credentials.endpoint.clone())
            .map(|e| e.trim_end_matches('/').to_string())
            .ok_or_else(|| anyhow!("No storage endpoint configured or present in credentials"))?;
        let bucket = settings.bucket;
        let public_base = settings
            .public_base
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{endpoint}/swift/v1/{bucket}"));

        info!(endpoint = endpoint.as_str(), bucket = bucket.as_str(), "Creating S3 client");
        let retry = RetryConfig {
            max_retries: 2,
            retry_timeout: settings.timeout,
            ..RetryConfig::default()
        };
        let s3 = AmazonS3Builder::new()
            .with_endpoint(endpoint.as_str())
            .with_allow_http(endpoint.starts_with("http://"))
            .with_bucket_name(bucket.as_str())
            .with_region(settings.region)
            .with_access_key_id(credentials.access_key)
            .with_secret_access_key(credentials.secret_key)
            .with_virtual_hosted_style_request(false)
            .with_client_options(ClientOptions::new().with_timeout(settings.timeout))
            .with_retry(retry)
            .build()
            .context("Failed to configure S3 client")?;

        Ok(Self {
            store: BlockingStore::new(Arc::new(s3))?,
            public_base,
        })
    }
}

impl ObjectStore for S3ObjectStore {
    fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        self.store.put_file(key, path)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

/// Filesystem-backed store for offline runs and tests.
pub struct LocalObjectStore {
    root: PathBuf,
    store: BlockingStore,
    public_base: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base: Option<String>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create directory: {}", root.display()))?;
        let local = LocalFileSystem::new_with_prefix(&root)
            .with_context(|| format!("Failed to open local store at {}", root.display()))?;
        let public_base = public_base
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("file://{}", root.display()));
        Ok(Self {
            root,
            store: BlockingStore::new(Arc::new(local))?,
            public_base,
        })
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for LocalObjectStore {
    fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        self.store.put_file(key, path)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}
