//! Session state machine
//!
//! Tracks the phase of a provider session from first connect through the
//! snapshot into real-time delivery. All transitions go through
//! [`PhaseMachine::apply`]; inputs that do not apply in the current phase are
//! ignored.

use serde::Serialize;

/// Provider session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Created, never connected
    Idle,
    /// Transport activated, waiting for the connection
    Connecting,
    /// Receiving the initial bulk data set
    Snapshot,
    /// Snapshot done, receiving incremental updates
    Realtime,
    /// Connection lost, torn down or failed
    Disconnected,
}

impl SessionPhase {
    /// Whether the transport is connected
    pub fn is_connected(self) -> bool {
        matches!(self, SessionPhase::Snapshot | SessionPhase::Realtime)
    }

    /// Whether a connection is open or being opened
    pub fn is_live(self) -> bool {
        self == SessionPhase::Connecting || self.is_connected()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Snapshot => "snapshot",
            SessionPhase::Realtime => "realtime",
            SessionPhase::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs driving the phase machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseInput {
    /// Consumer connect or scheduled reconnect
    Connect,
    /// Transport reported a connection
    TransportConnected,
    /// End-of-snapshot sentinel received
    EndOfSnapshot,
    /// Snapshot exceeded its timeout
    SnapshotTimeout,
    /// Transport error, close, or explicit teardown
    Disconnect,
}

/// Phase holder with the transition table
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: SessionPhase,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Next phase for `input`, or `None` if the input is a no-op here
    pub fn next(phase: SessionPhase, input: PhaseInput) -> Option<SessionPhase> {
        use PhaseInput::*;
        use SessionPhase::*;

        match (phase, input) {
            (Idle | Disconnected, Connect) => Some(Connecting),
            (Connecting, TransportConnected) => Some(Snapshot),
            (Snapshot, EndOfSnapshot | SnapshotTimeout) => Some(Realtime),
            (Idle | Connecting | Snapshot | Realtime, Disconnect) => Some(Disconnected),
            _ => None,
        }
    }

    /// Apply an input. Returns the new phase if it changed.
    pub fn apply(&mut self, input: PhaseInput) -> Option<SessionPhase> {
        let next = Self::next(self.phase, input)?;
        tracing::trace!(from = %self.phase, to = %next, ?input, "Phase transition");
        self.phase = next;
        Some(next)
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut machine = PhaseMachine::new();
        assert_eq!(machine.phase(), SessionPhase::Idle);

        assert_eq!(machine.apply(PhaseInput::Connect), Some(SessionPhase::Connecting));
        assert_eq!(
            machine.apply(PhaseInput::TransportConnected),
            Some(SessionPhase::Snapshot)
        );
        assert_eq!(
            machine.apply(PhaseInput::EndOfSnapshot),
            Some(SessionPhase::Realtime)
        );
        assert!(machine.phase().is_connected());
    }

    #[test]
    fn test_connect_is_guarded() {
        let mut machine = PhaseMachine::new();
        machine.apply(PhaseInput::Connect);

        assert_eq!(machine.apply(PhaseInput::Connect), None);
        machine.apply(PhaseInput::TransportConnected);
        assert_eq!(machine.apply(PhaseInput::Connect), None);
        assert_eq!(machine.phase(), SessionPhase::Snapshot);
    }

    #[test]
    fn test_no_skipping_or_regressing() {
        let mut machine = PhaseMachine::new();
        assert_eq!(machine.apply(PhaseInput::EndOfSnapshot), None);
        assert_eq!(machine.apply(PhaseInput::TransportConnected), None);

        machine.apply(PhaseInput::Connect);
        machine.apply(PhaseInput::TransportConnected);
        machine.apply(PhaseInput::EndOfSnapshot);

        // A second sentinel in real-time is ignored
        assert_eq!(machine.apply(PhaseInput::EndOfSnapshot), None);
        assert_eq!(machine.apply(PhaseInput::SnapshotTimeout), None);
        assert_eq!(machine.phase(), SessionPhase::Realtime);
    }

    #[test]
    fn test_disconnect_from_any_live_phase() {
        for steps in 0..4 {
            let mut machine = PhaseMachine::new();
            let inputs = [
                PhaseInput::Connect,
                PhaseInput::TransportConnected,
                PhaseInput::EndOfSnapshot,
            ];
            for input in inputs.iter().take(steps) {
                machine.apply(*input);
            }

            assert_eq!(
                machine.apply(PhaseInput::Disconnect),
                Some(SessionPhase::Disconnected)
            );
            assert_eq!(machine.apply(PhaseInput::Disconnect), None);
            assert_eq!(machine.apply(PhaseInput::Connect), Some(SessionPhase::Connecting));
        }
    }

    #[test]
    fn test_phase_serializes_lowercase() {
        let json = serde_json::to_string(&SessionPhase::Realtime).unwrap();
        assert_eq!(json, "\"realtime\"");
    }
}
