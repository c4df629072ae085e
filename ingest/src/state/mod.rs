//! Consumer phase state machine.

pub mod machine;

pub use machine::{Command, ConsumerEvent, ConsumerPhase, ConsumerStateMachine};
