pub mod config;
pub mod error;
pub mod types;

pub use error::{GeocryptError, GeocryptResult};
