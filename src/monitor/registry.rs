//! Arena of monitors with handle recycling.
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::Monitor;
use crate::core::network::Network;

/// A small integer naming a monitor in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitorHandle(usize);

impl MonitorHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Slots of optional monitors plus the list of free slots.
///
/// A new monitor always takes the lowest free slot, so handles stay small and are reused.
#[derive(Debug, Clone, Default)]
pub struct MonitorRegistry {
    slots: Vec<Option<Monitor>>,
    free: BinaryHeap<Reverse<usize>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        MonitorRegistry::default()
    }

    pub fn add<M: Into<Monitor>>(&mut self, monitor: M) -> MonitorHandle {
        let monitor = monitor.into();
        match self.free.pop() {
            Some(Reverse(index)) => {
                self.slots[index] = Some(monitor);
                MonitorHandle(index)
            }
            None => {
                self.slots.push(Some(monitor));
                MonitorHandle(self.slots.len() - 1)
            }
        }
    }

    pub fn get(&self, handle: MonitorHandle) -> Option<&Monitor> {
        self.slots.get(handle.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, handle: MonitorHandle) -> Option<&mut Monitor> {
        self.slots.get_mut(handle.0).and_then(|slot| slot.as_mut())
    }

    /// Deregister a monitor and hand it back. Its slot is reused by the next `add`.
    pub fn remove(&mut self, handle: MonitorHandle) -> Option<Monitor> {
        let monitor = self.slots.get_mut(handle.0)?.take()?;
        self.free.push(Reverse(handle.0));
        Some(monitor)
    }

    /// Deregister a monitor and free its recorded samples.
    pub fn clear(&mut self, handle: MonitorHandle) -> bool {
        match self.remove(handle) {
            Some(mut monitor) => {
                monitor.clear();
                true
            }
            None => false,
        }
    }

    /// Number of registered monitors.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handles(&self) -> impl Iterator<Item = MonitorHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| MonitorHandle(index))
    }

    pub fn record_targets(&mut self, t: i64, network: &Network) {
        self.slots
            .iter_mut()
            .flatten()
            .for_each(|monitor| monitor.record_targets(t, network));
    }

    pub fn record(&mut self, t: i64, network: &Network) {
        self.slots
            .iter_mut()
            .flatten()
            .for_each(|monitor| monitor.record(t, network));
    }
}
