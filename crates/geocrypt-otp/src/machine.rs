//! Pure one-time code state machine
//!
//! No clocks and no I/O: every transition is an explicit [`OtpEvent`].
//! Events arriving after a terminal state are ignored, which is what makes
//! cancellation cooperative (a late dispatch acknowledgement or timer tick
//! cannot revive a closed session).

use geocrypt_core::{GeocryptError, GeocryptResult};

use crate::OTP_CODE_LENGTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpState {
    Idle,
    /// Code requested from the delivery service, not yet acknowledged
    Requested,
    /// Code dispatched; waiting for the requester to type it
    AwaitingInput,
    Consumed,
    Expired,
    Cancelled,
}

impl OtpState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OtpState::Consumed | OtpState::Expired | OtpState::Cancelled
        )
    }
}

impl std::fmt::Display for OtpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OtpState::Idle => "idle",
            OtpState::Requested => "requested",
            OtpState::AwaitingInput => "awaiting_input",
            OtpState::Consumed => "consumed",
            OtpState::Expired => "expired",
            OtpState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionState {
    Unconsumed,
    Consumed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpEvent<'a> {
    /// The gate was opened and a code requested
    Open,
    /// The delivery service acknowledged the request
    Dispatched,
    /// The delivery service failed
    DispatchFailed(&'a str),
    /// The requester submitted a candidate code
    Submit(&'a str),
    /// The validity window ran out
    Expire,
    /// The gate was closed by the requester
    Close,
}

/// Check a candidate code's shape: exactly six ASCII digits.
pub fn validate_candidate(candidate: &str) -> GeocryptResult<()> {
    if candidate.len() != OTP_CODE_LENGTH || !candidate.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GeocryptError::OtpInvalidFormat {
            expected: OTP_CODE_LENGTH,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct OtpMachine {
    state: OtpState,
    delivery: DeliveryState,
}

impl Default for OtpMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl OtpMachine {
    pub fn new() -> Self {
        Self {
            state: OtpState::Idle,
            delivery: DeliveryState::Pending,
        }
    }

    pub fn state(&self) -> OtpState {
        self.state
    }

    pub fn delivery(&self) -> DeliveryState {
        self.delivery
    }

    pub fn consumption(&self) -> ConsumptionState {
        match self.state {
            OtpState::Consumed => ConsumptionState::Consumed,
            OtpState::Expired => ConsumptionState::Expired,
            _ => ConsumptionState::Unconsumed,
        }
    }

    /// Apply one event and return the resulting state.
    pub fn apply(&mut self, event: OtpEvent<'_>) -> GeocryptResult<OtpState> {
        use OtpState::*;

        match (self.state, event) {
            (Idle, OtpEvent::Open) => {
                self.state = Requested;
                self.delivery = DeliveryState::Pending;
            }
            (Requested | AwaitingInput, OtpEvent::Open) => {}
            (s, OtpEvent::Open) => return Err(terminal_error(s)),

            (Requested, OtpEvent::Dispatched) => {
                self.state = AwaitingInput;
                self.delivery = DeliveryState::Delivered;
            }
            (Requested | AwaitingInput, OtpEvent::DispatchFailed(reason)) => {
                self.state = Cancelled;
                self.delivery = DeliveryState::Failed;
                return Err(GeocryptError::DeliveryFailed(reason.to_string()));
            }
            (Idle, OtpEvent::Dispatched | OtpEvent::DispatchFailed(_)) => {
                return Err(GeocryptError::Other(anyhow::anyhow!(
                    "delivery acknowledged before a code was requested"
                )));
            }
            (_, OtpEvent::Dispatched | OtpEvent::DispatchFailed(_)) => {}

            (s @ (Consumed | Expired | Cancelled), OtpEvent::Submit(_)) => {
                return Err(terminal_error(s));
            }
            (Idle, OtpEvent::Submit(_)) => return Err(GeocryptError::OtpCancelled),
            (Requested, OtpEvent::Submit(_)) => {
                return Err(GeocryptError::Other(anyhow::anyhow!(
                    "the one-time code has not been dispatched yet"
                )));
            }
            (AwaitingInput, OtpEvent::Submit(candidate)) => {
                validate_candidate(candidate)?;
                self.state = Consumed;
            }

            (Idle | Requested | AwaitingInput, OtpEvent::Expire) => self.state = Expired,
            (Idle | Requested | AwaitingInput, OtpEvent::Close) => self.state = Cancelled,
            (Consumed | Expired | Cancelled, OtpEvent::Expire | OtpEvent::Close) => {}
        }

        Ok(self.state)
    }
}

fn terminal_error(state: OtpState) -> GeocryptError {
    match state {
        OtpState::Consumed => GeocryptError::OtpConsumed,
        OtpState::Expired => GeocryptError::OtpExpired,
        _ => GeocryptError::OtpCancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awaiting() -> OtpMachine {
        let mut m = OtpMachine::new();
        m.apply(OtpEvent::Open).unwrap();
        m.apply(OtpEvent::Dispatched).unwrap();
        m
    }

    #[test]
    fn test_happy_path() {
        let mut m = OtpMachine::new();
        assert_eq!(m.apply(OtpEvent::Open).unwrap(), OtpState::Requested);
        assert_eq!(m.delivery(), DeliveryState::Pending);
        assert_eq!(m.apply(OtpEvent::Dispatched).unwrap(), OtpState::AwaitingInput);
        assert_eq!(m.delivery(), DeliveryState::Delivered);
        assert_eq!(m.apply(OtpEvent::Submit("123456")).unwrap(), OtpState::Consumed);
        assert_eq!(m.consumption(), ConsumptionState::Consumed);
    }

    #[test]
    fn test_consumed_is_single_use() {
        let mut m = awaiting();
        m.apply(OtpEvent::Submit("123456")).unwrap();
        assert!(matches!(
            m.apply(OtpEvent::Submit("123456")),
            Err(GeocryptError::OtpConsumed)
        ));
        assert!(matches!(m.apply(OtpEvent::Open), Err(GeocryptError::OtpConsumed)));
    }

    #[test]
    fn test_invalid_format_keeps_waiting() {
        let mut m = awaiting();
        for bad in ["", "12345", "1234567", "12a456", " 12345", "１２３４５６"] {
            assert!(
                matches!(
                    m.apply(OtpEvent::Submit(bad)),
                    Err(GeocryptError::OtpInvalidFormat { expected: 6 })
                ),
                "{bad:?} must be rejected"
            );
        }
        assert_eq!(m.state(), OtpState::AwaitingInput);
        assert_eq!(m.apply(OtpEvent::Submit("000000")).unwrap(), OtpState::Consumed);
    }

    #[test]
    fn test_expire_from_any_live_state() {
        for setup in [OtpState::Idle, OtpState::Requested, OtpState::AwaitingInput] {
            let mut m = OtpMachine::new();
            if setup != OtpState::Idle {
                m.apply(OtpEvent::Open).unwrap();
            }
            if setup == OtpState::AwaitingInput {
                m.apply(OtpEvent::Dispatched).unwrap();
            }
            assert_eq!(m.apply(OtpEvent::Expire).unwrap(), OtpState::Expired);
            assert_eq!(m.consumption(), ConsumptionState::Expired);
        }
    }

    #[test]
    fn test_submit_after_expiry() {
        let mut m = awaiting();
        m.apply(OtpEvent::Expire).unwrap();
        assert!(matches!(
            m.apply(OtpEvent::Submit("123456")),
            Err(GeocryptError::OtpExpired)
        ));
    }

    #[test]
    fn test_expire_does_not_override_consumed() {
        let mut m = awaiting();
        m.apply(OtpEvent::Submit("123456")).unwrap();
        assert_eq!(m.apply(OtpEvent::Expire).unwrap(), OtpState::Consumed);
    }

    #[test]
    fn test_close_cancels_and_freezes() {
        let mut m = awaiting();
        assert_eq!(m.apply(OtpEvent::Close).unwrap(), OtpState::Cancelled);
        // late events are ignored
        assert_eq!(m.apply(OtpEvent::Expire).unwrap(), OtpState::Cancelled);
        assert_eq!(m.apply(OtpEvent::Dispatched).unwrap(), OtpState::Cancelled);
        assert!(matches!(
            m.apply(OtpEvent::Submit("123456")),
            Err(GeocryptError::OtpCancelled)
        ));
    }

    #[test]
    fn test_dispatch_failure_cancels() {
        let mut m = OtpMachine::new();
        m.apply(OtpEvent::Open).unwrap();
        let err = m.apply(OtpEvent::DispatchFailed("smtp timeout")).unwrap_err();
        assert!(matches!(err, GeocryptError::DeliveryFailed(ref r) if r == "smtp timeout"));
        assert_eq!(m.state(), OtpState::Cancelled);
        assert_eq!(m.delivery(), DeliveryState::Failed);
    }

    #[test]
    fn test_submit_before_dispatch_rejected() {
        let mut m = OtpMachine::new();
        m.apply(OtpEvent::Open).unwrap();
        assert!(m.apply(OtpEvent::Submit("123456")).is_err());
        assert_eq!(m.state(), OtpState::Requested);
    }
}
