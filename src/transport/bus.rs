//! Shared named variable slots, used to wire one node's output into
//! another's input without routing everything through the transport.
//! Readers accept possibly-stale values (last-writer-wins); there is no
//! notion of a transaction spanning more than one variable.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::quantities::Float;

#[derive(Default)]
pub struct VariableBus {
    slots: RwLock<HashMap<String, Float>>,
}

impl VariableBus {
    #[must_use]
    pub fn new() -> VariableBus {
        VariableBus {
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, name: impl Into<String>, value: Float) {
        self.slots.write().insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Float> {
        self.slots.read().get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::VariableBus;

    #[test]
    fn last_write_wins() {
        let bus = VariableBus::new();
        bus.set("x", 1.0);
        bus.set("x", 2.0);
        assert_eq!(bus.get("x"), Some(2.0));
    }

    #[test]
    fn unset_variable_reads_as_none() {
        let bus = VariableBus::new();
        assert_eq!(bus.get("missing"), None);
    }
}
