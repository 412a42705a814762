//! OpenDAL Operator factory for geocrypt storage backends

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use opendal::Operator;
use secrecy::{ExposeSecret, SecretString};

use geocrypt_core::config::{StorageBackend, StorageConfig};

/// Static S3 credentials (from the environment, never from the config file)
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

/// Build an operator for the configured backend.
///
/// S3 uses path-style addressing (the opendal 0.55 default), which SeaweedFS
/// and MinIO require. If `enforce_tls` is set and the S3 endpoint uses HTTP
/// this returns an error; otherwise a warning is logged.
pub fn build_operator(storage: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    let op = match storage.backend {
        StorageBackend::S3 => {
            check_endpoint_tls(storage)?;
            let creds = creds.context(
                "S3 backend needs credentials (AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY)",
            )?;
            // opendal 0.55: builders use the consuming pattern
            let builder = opendal::services::S3::default()
                .endpoint(&storage.endpoint)
                .region(&storage.region)
                .bucket(&storage.bucket)
                .access_key_id(&creds.access_key_id)
                .secret_access_key(creds.secret_access_key.expose_secret());
            Operator::new(builder)
                .context("creating OpenDAL S3 operator")?
                .finish()
        }
        StorageBackend::Fs => {
            let root = expand_tilde(&storage.root);
            let root = root
                .to_str()
                .with_context(|| format!("storage root is not UTF-8: {}", root.display()))?;
            Operator::new(opendal::services::Fs::default().root(root))
                .context("creating OpenDAL fs operator")?
                .finish()
        }
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),
    };

    Ok(op
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        ))
}

/// Build an operator from config, reading S3 credentials from the environment.
///
/// `GEOCRYPT_S3_ACCESS_KEY_ID`/`GEOCRYPT_S3_SECRET_ACCESS_KEY` win over the
/// standard `AWS_*` variables.
pub fn build_from_core_config(storage: &StorageConfig) -> Result<Operator> {
    let creds = credentials_from_env();
    build_operator(storage, creds.as_ref())
}

fn credentials_from_env() -> Option<S3Credentials> {
    let access_key_id = std::env::var("GEOCRYPT_S3_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
        .ok()?;
    let secret_access_key = std::env::var("GEOCRYPT_S3_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
        .ok()?;
    Some(S3Credentials {
        access_key_id,
        secret_access_key: SecretString::from(secret_access_key),
    })
}

fn check_endpoint_tls(storage: &StorageConfig) -> Result<()> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }
    Ok(())
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix("~/")) {
        Some(rest) => std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join(rest),
        None => path.to_path_buf(),
    }
}
