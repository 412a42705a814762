//! geocrypt-otp: the one-time code gate in front of every download/share
//!
//! ```text
//!  Idle ──open──► Requested ──dispatched──► AwaitingInput ──submit(6 digits)──► Consumed
//!                    │                           │
//!                    ├──dispatch failed──► Cancelled ◄──close── (any non-terminal)
//!                    └────────────── countdown hits 0 ──────────► Expired
//! ```
//!
//! [`OtpMachine`] is the pure transition table. [`OtpSession`] owns one
//! machine plus the countdown task that drives the `Expire` event.
//! [`OtpIssuer`] is the server-side half: it generates and verifies codes.

pub mod issuer;
pub mod machine;
pub mod session;

pub use issuer::{ChannelSink, CodeSink, CodeVerifier, LogSink, OtpDelivery, OtpIssuer};
pub use machine::{validate_candidate, ConsumptionState, DeliveryState, OtpEvent, OtpMachine, OtpState};
pub use session::{OtpSession, SessionTiming};

/// Number of digits in a one-time code
pub const OTP_CODE_LENGTH: usize = 6;

/// Default code lifetime
pub const DEFAULT_VALIDITY_SECS: u64 = 90;
