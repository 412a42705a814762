//! geocrypt-storage: OpenDAL-backed file records and ciphertext blobs
//!
//! [`FileStore`] is the storage collaborator the transfer coordinator talks
//! to. [`OpendalStore`] implements it over any OpenDAL [`opendal::Operator`]
//! and is the one place that decides whether ciphertext may be released:
//! the caller must be close enough to the upload location and must present
//! a live one-time code.

pub mod health;
pub mod operator;
pub mod store;

pub use health::{check_health, is_healthy};
pub use operator::{build_from_core_config, build_operator, S3Credentials};
pub use store::{FileStore, OpendalStore};
