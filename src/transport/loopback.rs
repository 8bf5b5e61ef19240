//! An in-process stand-in transport for demos and scenario tests: no real
//! hardware, just a pluggable per-device response function applied to the
//! last-written action. Not part of the external contract; concrete
//! deployments supply their own transport over the real wire.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::EngineError;
use crate::quantities::Float;
use crate::transport::{CommandKind, Snapshot, Transport};

pub type ResponseFn = Box<dyn Fn(&HashMap<String, Float>) -> HashMap<String, Float> + Send + Sync>;

struct DeviceState {
    respond: ResponseFn,
    last_command: HashMap<String, Float>,
    last_state: HashMap<String, Float>,
}

pub struct LoopbackTransport {
    devices: Mutex<HashMap<String, DeviceState>>,
    pending: Mutex<Vec<(String, Vec<(String, Float)>)>>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new() -> LoopbackTransport {
        LoopbackTransport {
            devices: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn add_device(&self, name: impl Into<String>, respond: ResponseFn) {
        self.devices.lock().insert(
            name.into(),
            DeviceState {
                respond,
                last_command: HashMap::new(),
                last_state: HashMap::new(),
            },
        );
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn enter_command(&self, device: &str, _kind: CommandKind, values: &[(String, Float)]) {
        self.pending
            .lock()
            .push((device.to_string(), values.to_vec()));
    }

    fn send_commands(&self) -> Result<(), EngineError> {
        let mut devices = self.devices.lock();
        for (device, values) in self.pending.lock().drain(..) {
            if let Some(state) = devices.get_mut(&device) {
                for (name, value) in values {
                    state.last_command.insert(name, value);
                }
            }
        }
        Ok(())
    }

    fn update_input_states(&self, devices: &[String]) -> Result<(), EngineError> {
        let mut table = self.devices.lock();
        for device in devices {
            if let Some(state) = table.get_mut(device) {
                state.last_state = (state.respond)(&state.last_command);
            }
        }
        Ok(())
    }

    fn get_input_states(
        &self,
        devices: &[String],
        _timeout: Duration,
    ) -> Result<HashMap<String, (Snapshot, bool)>, EngineError> {
        let table = self.devices.lock();
        Ok(devices
            .iter()
            .filter_map(|d| {
                table
                    .get(d)
                    .map(|state| (d.clone(), (Snapshot(state.last_state.clone()), true)))
            })
            .collect())
    }

    fn device_names(&self) -> Vec<String> {
        self.devices.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::LoopbackTransport;
    use crate::transport::{CommandKind, Transport};
    use std::time::Duration;

    #[test]
    fn round_trips_a_linear_response() {
        let transport = LoopbackTransport::new();
        transport.add_device(
            "dev",
            Box::new(|commands| {
                let m = commands.get("m").copied().unwrap_or(0.0);
                [("s".to_string(), 3.0 * m - 1.0)].into_iter().collect()
            }),
        );
        transport.enter_command("dev", CommandKind::SetPoint, &[("m".to_string(), 10.0)]);
        transport.send_commands().unwrap();
        transport
            .update_input_states(&["dev".to_string()])
            .unwrap();
        let states = transport
            .get_input_states(&["dev".to_string()], Duration::from_millis(100))
            .unwrap();
        let (snapshot, fresh) = &states["dev"];
        assert!(fresh);
        assert_eq!(snapshot.get("s"), Some(29.0));
    }
}
