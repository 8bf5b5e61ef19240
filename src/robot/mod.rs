//! Per-node mapping from engine-level state/action vectors to named
//! transport variables, plus candidate-action enumeration for the engine's
//! action-selection step.

pub mod adapter;

use crate::quantities::Float;
use crate::transport::Snapshot;

/// How a node's actuation/sensing surface maps onto transport variables and
/// generates nearby action candidates. Implementations own no transport
/// state; they are pure functions of the current action and the transport
/// snapshot handed to them by the engine.
pub trait RobotAdapter: Send {
    /// Number of state (sensor) axes.
    fn state_dim(&self) -> usize;
    /// Number of action (actuator) axes.
    fn action_dim(&self) -> usize;

    /// Read the current state vector out of a transport snapshot.
    fn read_state(&self, snapshot: &Snapshot) -> Vec<Float>;

    /// Translate an action vector into named transport commands.
    fn action_to_commands(&self, action: &[Float]) -> Vec<(String, Float)>;

    /// Enumerate up to `n` candidate actions "around" `current`, clamped to
    /// each axis's valid range. `n` is advisory: discrete adapters may return
    /// fewer (or, for small ranges, all valid actions) and continuous
    /// adapters may return exactly `n`.
    fn candidate_actions(&self, current: &[Float], n: usize) -> Vec<Vec<Float>>;
}
