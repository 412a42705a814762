//! Code issuance and verification (the service side of the gate)
//!
//! The issuer keeps at most one live code per file. Issuing again replaces
//! the previous code. A code is removed when it is verified, when it
//! expires, or after too many wrong guesses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use geocrypt_core::types::FileId;
use geocrypt_core::{GeocryptError, GeocryptResult};

use crate::{DEFAULT_VALIDITY_SECS, OTP_CODE_LENGTH};

/// Wrong guesses tolerated before a code is discarded
const MAX_FAILED_ATTEMPTS: u32 = 5;

/// Client-facing: ask for a code to be generated and sent out of band.
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn request_code(&self, file_id: &FileId) -> GeocryptResult<()>;
}

/// Storage-facing: check a submitted code before releasing ciphertext.
#[async_trait]
pub trait CodeVerifier: Send + Sync {
    /// True if `code` is the live code for `file_id`. A successful check
    /// consumes the code.
    async fn verify_code(&self, file_id: &FileId, code: &str) -> bool;

    /// Drop any live code for `file_id` (the file is gone).
    async fn revoke(&self, file_id: &FileId);
}

/// Where generated codes are sent (email in production).
#[async_trait]
pub trait CodeSink: Send + Sync {
    async fn deliver(&self, file_id: &FileId, code: &str) -> GeocryptResult<()>;
}

/// Writes codes to the log. Development only.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl CodeSink for LogSink {
    async fn deliver(&self, file_id: &FileId, code: &str) -> GeocryptResult<()> {
        info!(target: "geocrypt::otp::delivery", file_id = %file_id, code, "one-time code");
        Ok(())
    }
}

/// Sends codes over a channel (tests, embedding UIs).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(FileId, String)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(FileId, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CodeSink for ChannelSink {
    async fn deliver(&self, file_id: &FileId, code: &str) -> GeocryptResult<()> {
        self.tx
            .send((file_id.clone(), code.to_string()))
            .map_err(|_| GeocryptError::DeliveryFailed("code receiver closed".into()))
    }
}

#[derive(Debug)]
struct IssuedCode {
    code: String,
    expires_at: Instant,
    failed_attempts: u32,
}

pub struct OtpIssuer {
    codes: Mutex<HashMap<FileId, IssuedCode>>,
    ttl: Duration,
    sink: Arc<dyn CodeSink>,
}

impl OtpIssuer {
    pub fn new(sink: Arc<dyn CodeSink>) -> Self {
        Self::with_ttl(sink, Duration::from_secs(DEFAULT_VALIDITY_SECS))
    }

    pub fn with_ttl(sink: Arc<dyn CodeSink>, ttl: Duration) -> Self {
        Self {
            codes: Mutex::new(HashMap::new()),
            ttl,
            sink,
        }
    }

    /// Number of codes currently held (including expired ones not yet swept)
    pub async fn pending(&self) -> usize {
        self.codes.lock().await.len()
    }

    /// Drop expired codes.
    pub async fn sweep(&self) {
        let now = Instant::now();
        self.codes.lock().await.retain(|_, c| c.expires_at > now);
    }
}

fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..10u32.pow(OTP_CODE_LENGTH as u32));
    format!("{n:0width$}", width = OTP_CODE_LENGTH)
}

fn codes_match(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl OtpDelivery for OtpIssuer {
    async fn request_code(&self, file_id: &FileId) -> GeocryptResult<()> {
        let code = generate_code();
        {
            let mut codes = self.codes.lock().await;
            let now = Instant::now();
            codes.retain(|_, c| c.expires_at > now);
            if codes.contains_key(file_id) {
                debug!(file_id = %file_id, "replacing previous one-time code");
            }
            codes.insert(
                file_id.clone(),
                IssuedCode {
                    code: code.clone(),
                    expires_at: Instant::now() + self.ttl,
                    failed_attempts: 0,
                },
            );
        }

        if let Err(e) = self.sink.deliver(file_id, &code).await {
            self.codes.lock().await.remove(file_id);
            warn!(file_id = %file_id, error = %e, "one-time code delivery failed");
            return Err(match e {
                GeocryptError::DeliveryFailed(_) => e,
                other => GeocryptError::DeliveryFailed(other.to_string()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CodeVerifier for OtpIssuer {
    async fn verify_code(&self, file_id: &FileId, code: &str) -> bool {
        let mut codes = self.codes.lock().await;
        let Some(issued) = codes.get_mut(file_id) else {
            debug!(file_id = %file_id, "no one-time code on record");
            return false;
        };

        if Instant::now() >= issued.expires_at {
            codes.remove(file_id);
            debug!(file_id = %file_id, "one-time code expired");
            return false;
        }

        if codes_match(&issued.code, code) {
            codes.remove(file_id);
            info!(file_id = %file_id, "one-time code verified");
            return true;
        }

        issued.failed_attempts += 1;
        warn!(file_id = %file_id, attempts = issued.failed_attempts, "wrong one-time code");
        if issued.failed_attempts >= MAX_FAILED_ATTEMPTS {
            codes.remove(file_id);
        }
        false
    }

    async fn revoke(&self, file_id: &FileId) {
        if self.codes.lock().await.remove(file_id).is_some() {
            debug!(file_id = %file_id, "one-time code revoked");
        }
    }
}
