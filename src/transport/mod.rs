//! The external transport façade: the boundary to serial/USB-connected
//! embedded controllers. Only the contract lives here — framing, reconnect
//! logic, and device discovery are out of scope and belong to whatever
//! concrete transport a deployment plugs in.

pub mod bus;
pub mod loopback;

use std::collections::HashMap;
use std::time::Duration;

use crate::error::EngineError;
use crate::quantities::Float;

/// A point-in-time read of named variables for one or more devices, plus
/// whether each device's reading was actually refreshed since the last call
/// (`fresh = false` means "reused a stale value", not an error).
#[derive(Debug, Clone, Default)]
pub struct Snapshot(pub HashMap<String, Float>);

impl Snapshot {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Float> {
        self.0.get(name).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Float) {
        self.0.insert(name.into(), value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetPoint,
}

/// The black-box contract every concrete transport must satisfy. Modeled
/// directly on the four operations the barrier and robot adapter actually
/// call: enqueue, flush, refresh, and read back.
pub trait Transport: Send {
    /// Enqueue a named variable change for `device`; non-blocking.
    fn enter_command(&self, device: &str, kind: CommandKind, values: &[(String, Float)]);

    /// Flush all commands enqueued since the last flush to every device.
    fn send_commands(&self) -> Result<(), EngineError>;

    /// Trigger a synchronous refresh of the named devices' input state.
    fn update_input_states(&self, devices: &[String]) -> Result<(), EngineError>;

    /// Return the last-known snapshot for the named devices, with a
    /// freshness flag per device, waiting up to `timeout` for an in-flight
    /// refresh to land.
    fn get_input_states(
        &self,
        devices: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, (Snapshot, bool)>, EngineError>;

    fn device_names(&self) -> Vec<String>;
}
