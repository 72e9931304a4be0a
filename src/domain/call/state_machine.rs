//! Call session state machine
//!
//! Pure transition table. Local intents and remote signaling events are both
//! expressed as [`CallInput`] so there is a single path for every state
//! change regardless of where it originated.

use crate::domain::call::value_object::CallState;

/// Everything that can drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallInput {
    /// Local user starts a call
    Start,
    /// Remote offer for a call id we do not know
    RemoteOffer,
    /// Local user accepts the incoming call
    Accept,
    /// Local user declines the incoming call
    Decline,
    /// Remote answer for the current call
    RemoteAnswer,
    /// First remote media arrived
    MediaConnected,
    /// Local hang-up or cancel
    Hangup,
    /// Remote `end` for the current call
    RemoteEnd,
    /// Remote `reject` for the current call
    RemoteReject,
    /// Ring timeout elapsed
    RingTimeout,
    /// Media denied, negotiation failed or connection lost
    Failure,
}

/// Outcome of feeding an input to a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given state; entering `Idle` means full cleanup
    Enter(CallState),
    /// Input accepted but the state does not change
    Stay,
    /// Already busy with another call; reply `reject` to the offer
    Busy,
    /// Input not valid in this state
    Invalid,
}

impl CallState {
    /// Transition table
    pub fn on(self, input: CallInput) -> Transition {
        use CallInput::*;
        use CallState::*;

        match (self, input) {
            (Idle, Start) => Transition::Enter(Calling),
            (Idle, RemoteOffer) => Transition::Enter(Incoming),

            // Busy policy: any non-idle state turns new offers away
            (_, RemoteOffer) => Transition::Busy,

            (Incoming, Accept) => Transition::Enter(Connecting),
            (Incoming, Decline | RemoteReject | RemoteEnd | RingTimeout | Hangup | Failure) => {
                Transition::Enter(Idle)
            }

            (Calling, RemoteAnswer) => Transition::Enter(Connecting),
            (Calling, RemoteReject | RemoteEnd | RingTimeout | Hangup | Failure) => {
                Transition::Enter(Idle)
            }

            (Connecting, MediaConnected) => Transition::Enter(Active),
            (Connecting, RemoteEnd | RemoteReject | Hangup | Failure) => Transition::Enter(Idle),

            // Every additional remote track fires again once active
            (Active, MediaConnected) => Transition::Stay,
            (Active, RemoteEnd | RemoteReject | Hangup | Failure) => Transition::Enter(Idle),

            _ => Transition::Invalid,
        }
    }

    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: CallState) -> bool {
        use CallState::*;

        match (self, new_state) {
            (Idle, Calling | Incoming) => true,
            (Incoming, Connecting | Idle) => true,
            (Calling, Connecting | Idle) => true,
            (Connecting, Active | Idle) => true,
            (Active, Idle) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [CallState; 5] = [
        CallState::Idle,
        CallState::Incoming,
        CallState::Calling,
        CallState::Connecting,
        CallState::Active,
    ];

    #[test]
    fn test_outgoing_happy_path() {
        let mut state = CallState::Idle;
        for (input, expected) in [
            (CallInput::Start, CallState::Calling),
            (CallInput::RemoteAnswer, CallState::Connecting),
            (CallInput::MediaConnected, CallState::Active),
            (CallInput::Hangup, CallState::Idle),
        ] {
            match state.on(input) {
                Transition::Enter(next) => state = next,
                other => panic!("{:?} in {:?} gave {:?}", input, state, other),
            }
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_incoming_happy_path() {
        assert_eq!(
            CallState::Idle.on(CallInput::RemoteOffer),
            Transition::Enter(CallState::Incoming)
        );
        assert_eq!(
            CallState::Incoming.on(CallInput::Accept),
            Transition::Enter(CallState::Connecting)
        );
        assert_eq!(
            CallState::Connecting.on(CallInput::MediaConnected),
            Transition::Enter(CallState::Active)
        );
    }

    #[test]
    fn test_busy_policy_in_every_non_idle_state() {
        for state in ALL_STATES.into_iter().filter(|s| !s.is_idle()) {
            assert_eq!(state.on(CallInput::RemoteOffer), Transition::Busy, "{:?}", state);
        }
    }

    #[test]
    fn test_hangup_reaches_idle_from_any_call_state() {
        for state in ALL_STATES.into_iter().filter(|s| !s.is_idle()) {
            assert_eq!(
                state.on(CallInput::Hangup),
                Transition::Enter(CallState::Idle),
                "{:?}",
                state
            );
            assert_eq!(
                state.on(CallInput::Failure),
                Transition::Enter(CallState::Idle),
                "{:?}",
                state
            );
        }
    }

    #[test]
    fn test_remote_reject_ends_outgoing_call() {
        assert_eq!(
            CallState::Calling.on(CallInput::RemoteReject),
            Transition::Enter(CallState::Idle)
        );
    }

    #[test]
    fn test_ring_timeout_only_while_ringing() {
        assert_eq!(
            CallState::Calling.on(CallInput::RingTimeout),
            Transition::Enter(CallState::Idle)
        );
        assert_eq!(
            CallState::Incoming.on(CallInput::RingTimeout),
            Transition::Enter(CallState::Idle)
        );
        assert_eq!(CallState::Connecting.on(CallInput::RingTimeout), Transition::Invalid);
        assert_eq!(CallState::Active.on(CallInput::RingTimeout), Transition::Invalid);
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(CallState::Idle.on(CallInput::Accept), Transition::Invalid);
        assert_eq!(CallState::Idle.on(CallInput::RemoteAnswer), Transition::Invalid);
        assert_eq!(CallState::Idle.on(CallInput::Hangup), Transition::Invalid);
        assert_eq!(CallState::Calling.on(CallInput::Start), Transition::Invalid);
        assert_eq!(CallState::Calling.on(CallInput::Accept), Transition::Invalid);
        assert_eq!(CallState::Incoming.on(CallInput::RemoteAnswer), Transition::Invalid);
        assert_eq!(CallState::Active.on(CallInput::MediaConnected), Transition::Stay);
    }

    #[test]
    fn test_table_agrees_with_can_transition_to() {
        let inputs = [
            CallInput::Start,
            CallInput::RemoteOffer,
            CallInput::Accept,
            CallInput::Decline,
            CallInput::RemoteAnswer,
            CallInput::MediaConnected,
            CallInput::Hangup,
            CallInput::RemoteEnd,
            CallInput::RemoteReject,
            CallInput::RingTimeout,
            CallInput::Failure,
        ];
        for state in ALL_STATES {
            for input in inputs {
                if let Transition::Enter(next) = state.on(input) {
                    assert!(state.can_transition_to(next), "{:?} -> {:?}", state, next);
                }
            }
        }
    }
}
