//! Traversal state machine
//!
//! A [`TraversalMachine`] walks one graph activation. Each call to
//! [`TraversalMachine::next_result`] returns the next node that an edge has
//! reached, together with the inputs available to it and whether required
//! inputs are still missing. The caller runs the node (or not, if it is
//! skipped), hands the outputs back with
//! [`TraversalMachine::provide_outputs`], and asks again.
//!
//! The machine has no concurrency and no I/O; its whole state is a
//! serializable [`MachineState`] so a suspended run can be captured and
//! rebuilt elsewhere.

mod machine;
mod state;

pub use machine::{MachineState, TraversalMachine, TraversalResult, ENTRY_SOURCE};
pub use state::EdgeState;
