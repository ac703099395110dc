//! Port-connector lists and the pending-change scratch table.
//!
//! Pending changes are modeled as a proper Rust sum type rather than a single-pointer-
//! vs-dynamic-array union: [`ChangeEntry::Single`] and [`ChangeEntry::Many`].
//! The promotion from `Single` to `Many` happens atomically with the count update in
//! [`ChangeEntry::add`].

use std::sync::Weak;

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::node::NodeInstance;

/// A weak reference to one require port on some node instance: what a provide port's
/// connector list is made of. Weak so that a connector list never keeps a disconnected
/// node instance alive.
#[derive(Clone)]
pub struct ConnectorRef {
    pub node: Weak<NodeInstance>,
    pub port_id: u32,
}

impl ConnectorRef {
    pub fn new(node: Weak<NodeInstance>, port_id: u32) -> Self {
        ConnectorRef { node, port_id }
    }

    fn same_target(&self, other: &ConnectorRef) -> bool {
        self.port_id == other.port_id && self.node.ptr_eq(&other.node)
    }
}

/// The ordered set of require ports currently receiving one provide port's value.
/// Almost always zero or one entries in practice, so the common case never allocates.
#[derive(Default)]
pub struct PortConnectorList {
    entries: SmallVec<[ConnectorRef; 1]>,
}

impl PortConnectorList {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectorRef> {
        self.entries.iter()
    }

    pub fn connect(&mut self, target: ConnectorRef) {
        if !self.entries.iter().any(|e| e.same_target(&target)) {
            self.entries.push(target);
        }
    }

    pub fn disconnect(&mut self, target: &ConnectorRef) {
        self.entries.retain(|e| !e.same_target(target));
    }
}

/// Per-node-instance table of connector lists, indexed by provide-port-id.
pub struct ConnectorTable {
    lists: Vec<PortConnectorList>,
}

impl ConnectorTable {
    pub fn new(num_provide_ports: usize) -> Self {
        ConnectorTable {
            lists: (0..num_provide_ports).map(|_| PortConnectorList::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn for_port(&self, port_id: u32) -> Option<&PortConnectorList> {
        self.lists.get(port_id as usize)
    }

    pub fn for_port_mut(&mut self, port_id: u32) -> Option<&mut PortConnectorList> {
        self.lists.get_mut(port_id as usize)
    }
}

/// One pending batch of connect/disconnect deltas for a single provide port.
#[derive(Default)]
pub enum ChangeEntry {
    #[default]
    None,
    Single(ConnectorRef, i32),
    Many(Vec<ConnectorRef>, i32),
}

impl ChangeEntry {
    fn count(&self) -> i32 {
        match self {
            ChangeEntry::None => 0,
            ChangeEntry::Single(_, count) => *count,
            ChangeEntry::Many(_, count) => *count,
        }
    }

    /// Record one connect (`sign = 1`) or disconnect (`sign = -1`) of `target`. Mixing
    /// signs within a single entry before it is drained is an error.
    pub fn add(&mut self, target: ConnectorRef, sign: i32) -> Result<()> {
        debug_assert!(sign == 1 || sign == -1);
        let existing_count = self.count();
        if existing_count != 0 && existing_count.signum() != sign.signum() {
            return Err(Error::Internal(
                "connector change entry mixes connect and disconnect signs".into(),
            ));
        }
        match std::mem::take(self) {
            ChangeEntry::None => *self = ChangeEntry::Single(target, sign),
            ChangeEntry::Single(prev, count) => {
                *self = ChangeEntry::Many(vec![prev, target], count + sign);
            }
            ChangeEntry::Many(mut list, count) => {
                list.push(target);
                *self = ChangeEntry::Many(list, count + sign);
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> Vec<ConnectorRef> {
        match self {
            ChangeEntry::None => Vec::new(),
            ChangeEntry::Single(r, _) => vec![r.clone()],
            ChangeEntry::Many(list, _) => list.clone(),
        }
    }

    pub fn is_disconnect(&self) -> bool {
        self.count() < 0
    }

    pub fn is_connect(&self) -> bool {
        self.count() > 0
    }
}

/// Scratch table of pending per-provide-port changes, indexed by provide-port-id,
/// populated by the port signature map during insertion/removal and drained by the
/// server under the global lock.
#[derive(Default)]
pub struct ChangeTable {
    entries: Vec<ChangeEntry>,
}

impl ChangeTable {
    pub fn new(num_provide_ports: usize) -> Self {
        ChangeTable {
            entries: (0..num_provide_ports).map(|_| ChangeEntry::None).collect(),
        }
    }

    pub fn record(&mut self, port_id: u32, target: ConnectorRef, sign: i32) -> Result<()> {
        if port_id as usize >= self.entries.len() {
            self.entries.resize_with(port_id as usize + 1, Default::default);
        }
        self.entries[port_id as usize].add(target, sign)
    }

    /// Drain every non-empty entry, returning `(provide_port_id, entry)` pairs and
    /// resetting the table to all-`None`.
    pub fn drain(&mut self) -> Vec<(u32, ChangeEntry)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter(|(_, e)| !matches!(e, ChangeEntry::None))
            .map(|(id, e)| (id as u32, std::mem::take(e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_entry_promotes_single_to_many_on_matching_sign() {
        let mut entry = ChangeEntry::None;
        let weak = Weak::new();
        entry.add(ConnectorRef::new(weak.clone(), 1), 1).unwrap();
        assert!(matches!(entry, ChangeEntry::Single(_, 1)));
        entry.add(ConnectorRef::new(weak, 2), 1).unwrap();
        assert!(matches!(entry, ChangeEntry::Many(_, 2)));
    }

    #[test]
    fn change_entry_rejects_sign_mixing() {
        let mut entry = ChangeEntry::None;
        let weak = Weak::new();
        entry.add(ConnectorRef::new(weak.clone(), 1), 1).unwrap();
        assert!(entry.add(ConnectorRef::new(weak, 2), -1).is_err());
    }

    #[test]
    fn change_table_drain_resets_entries() {
        let mut table = ChangeTable::new(2);
        table.record(0, ConnectorRef::new(Weak::new(), 5), -1).unwrap();
        let drained = table.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, 0);
        assert!(drained[0].1.is_disconnect());
        assert!(table.drain().is_empty());
    }
}
