//! Object store construction for source, cache and target storage.
//!
//! This module provides S3 client configuration tuned for high-concurrency
//! transfer, plus local-filesystem fallbacks, behind the `object_store`
//! abstraction so the rest of the crate never cares where bytes live.

mod block_cache;
mod cache;
mod target;

pub use block_cache::BlockCache;
pub use cache::InputCache;
pub use target::{ChunkTarget, TargetLayout, TargetManifest};

use crate::config::Config;
use anyhow::{Context, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::{ClientOptions, ObjectStore, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Parse an S3 URI into bucket and key components.
///
/// Accepts URIs in the format `s3://bucket/key/path`.
pub fn parse_s3_uri(uri: &str) -> Result<(&str, &str)> {
    let without_scheme = uri
        .strip_prefix("s3://")
        .with_context(|| format!("Invalid S3 URI: expected 's3://' prefix in '{}'", uri))?;

    without_scheme
        .split_once('/')
        .with_context(|| format!("Invalid S3 URI: expected 's3://bucket/key' format in '{}'", uri))
}

/// Create client options for high-concurrency object store access.
fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        // Connection timeout: how long to wait for a connection to be established
        .with_connect_timeout(Duration::from_secs(5))
        // Request timeout: total time allowed for a request including retries
        .with_timeout(Duration::from_secs(30))
        // Pool idle timeout: how long to keep idle connections in the pool
        .with_pool_idle_timeout(Duration::from_secs(90))
        // Maximum idle connections per host
        .with_pool_max_idle_per_host(128)
}

/// Create transport-level retry configuration for transient failures.
///
/// This covers individual HTTP requests; invocation-level retry is the
/// executor's concern.
fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 5,
        backoff: object_store::BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(120),
    }
}

/// Create an anonymous S3 client for reading a public bucket.
pub fn create_anonymous_store(bucket: &str, region: &str) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating anonymous S3 client for bucket: {}", bucket);

    let builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region(region)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config())
        .with_skip_signature(true)
        .with_virtual_hosted_style_request(false);

    Ok(Arc::new(builder.build()?))
}

/// Create an authenticated S3 client.
///
/// Credentials and region are loaded from (in order):
/// - Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_REGION)
/// - AWS config files (~/.aws/credentials, ~/.aws/config)
/// - EC2 instance profile (IMDS)
fn create_authenticated_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating authenticated S3 client for bucket: {}", bucket);

    let builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config())
        .with_virtual_hosted_style_request(true);

    Ok(Arc::new(builder.build()?))
}

/// Create a local filesystem store rooted at `path`, creating the directory
/// if needed.
fn create_local_store(path: &str) -> Result<Arc<dyn ObjectStore>> {
    let path = std::path::Path::new(path);
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    tracing::info!("Creating LocalFileSystem store at: {}", path.display());
    Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
}

/// Create the store holding the source objects.
pub fn create_source_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    match (&config.source.bucket, &config.source.local_path) {
        (Some(bucket), _) if config.source.anonymous => {
            create_anonymous_store(bucket, &config.source.region)
        }
        (Some(bucket), _) => create_authenticated_store(bucket),
        (_, Some(local_path)) => create_local_store(local_path),
        _ => anyhow::bail!("Invalid config: no source location"),
    }
}

/// Create the store backing the input cache. The cache must be enabled.
pub fn create_cache_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    match (&config.cache.local_path, &config.cache.bucket) {
        (Some(local_path), _) => create_local_store(local_path),
        (_, Some(bucket)) => create_authenticated_store(bucket),
        _ => anyhow::bail!("Invalid config: cache has no destination"),
    }
}

/// Create the store the target is written into.
pub fn create_target_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    match (&config.target.local_path, &config.target.bucket) {
        (Some(local_path), _) => create_local_store(local_path),
        (_, Some(bucket)) => create_authenticated_store(bucket),
        _ => anyhow::bail!("Invalid config: no target destination"),
    }
}

/// Get the key prefix for target objects.
/// Returns empty string for local (since the path is baked into the store),
/// or the S3 prefix for remote.
pub fn target_prefix(config: &Config) -> &str {
    if config.target.is_local() {
        ""
    } else {
        config.target.prefix.as_deref().unwrap_or("")
    }
}
