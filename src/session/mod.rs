//! Provider sessions
//!
//! A provider session owns the single transport connection for one provider
//! id and runs the connect → snapshot → real-time state machine over it.

pub mod provider;
pub mod state;

pub use provider::{ProviderSession, SessionHandle, StatusReport};
pub use state::{PhaseInput, PhaseMachine, SessionPhase};
