//! Per-session protocol state machine
//!
//! A charge point announces itself with BootNotification and then reports
//! connector status; the session tracks where in that sequence it is. The
//! transition table is fixed: a message with no transition from the current
//! state is rejected at the business level, leaving state and connection
//! untouched.

use csms_protocol::Action;
use tracing::{info, warn};

/// Protocol state of a connected charge point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargePointState {
    /// Initial state of every new session
    Off,
    /// BootNotification accepted
    PoweredUp,
    /// First StatusNotification received; further ones are no-ops
    Ready,
}

fn next_state(current: ChargePointState, action: &Action) -> Option<ChargePointState> {
    use ChargePointState::*;

    match (current, action) {
        (Off, Action::BootNotification) => Some(PoweredUp),
        (PoweredUp, Action::StatusNotification) => Some(Ready),
        (Ready, Action::StatusNotification) => Some(Ready),
        _ => None,
    }
}

/// Look up the transition for an inbound message and log the attempt.
///
/// Returns the state to move to, or `None` when the pair (state, action) is
/// undefined. The caller answers a rejected message at the protocol level but
/// keeps the connection open.
pub fn validate_transition(
    identity: &str,
    current: ChargePointState,
    action: &Action,
) -> Option<ChargePointState> {
    match next_state(current, action) {
        Some(next) => {
            info!(
                "{}: state transition: {:?} -> {} -> {:?}",
                identity, current, action, next
            );
            Some(next)
        }
        None => {
            warn!(
                "{}: unsupported message: {:?} -> {}",
                identity, current, action
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChargePointState::*;

    #[test]
    fn boot_sequence_reaches_ready() {
        let mut state = Off;

        for (action, expected) in [
            (Action::BootNotification, PoweredUp),
            (Action::StatusNotification, Ready),
            (Action::StatusNotification, Ready),
            (Action::StatusNotification, Ready),
        ] {
            state = validate_transition("CP_1", state, &action).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn status_notification_before_boot_is_rejected() {
        assert_eq!(
            validate_transition("CP_1", Off, &Action::StatusNotification),
            None
        );
    }

    #[test]
    fn repeated_boot_notification_is_rejected() {
        assert_eq!(
            validate_transition("CP_1", PoweredUp, &Action::BootNotification),
            None
        );
        assert_eq!(
            validate_transition("CP_1", Ready, &Action::BootNotification),
            None
        );
    }

    #[test]
    fn reserve_now_never_advances_state() {
        for state in [Off, PoweredUp, Ready] {
            assert_eq!(validate_transition("CP_1", state, &Action::ReserveNow), None);
        }
    }

    #[test]
    fn fold_over_message_sequence() {
        // An undefined pair leaves the state unchanged; the fold over any
        // sequence is therefore well defined.
        let sequence = [
            Action::StatusNotification, // rejected in Off
            Action::BootNotification,
            Action::BootNotification, // rejected in PoweredUp
            Action::StatusNotification,
            Action::StatusNotification,
        ];

        let final_state = sequence.iter().fold(Off, |state, action| {
            validate_transition("CP_1", state, action).unwrap_or(state)
        });

        assert_eq!(final_state, Ready);
    }
}
