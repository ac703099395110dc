//! The server global lock: a single `parking_lot::Mutex` guarding the port
//! signature map. Acquired first in the lock order — before any
//! per-node-instance, per-file, or file-manager lock is taken.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::node::NodeInstance;

use super::signature::PortSignatureMap;

/// Owns the server-wide [`PortSignatureMap`] behind one lock. Realized as an actually-held
/// mutex rather than a dedicated request-queue thread, since `parking_lot::Mutex` already
/// gives the needed serialization (see `DESIGN.md` for the rationale).
#[derive(Default)]
pub struct GlobalLock {
    signatures: Mutex<PortSignatureMap>,
}

impl GlobalLock {
    pub fn new() -> Self {
        GlobalLock::default()
    }

    /// Register a freshly built node's ports into the signature map, connecting it to
    /// any already-registered opposite-direction ports of the same signature, then hand
    /// off the resulting connector-change entries (spec §4.9) by draining every
    /// registered node's change table while still holding the lock.
    pub fn register_node(&self, node: &Arc<NodeInstance>) -> Result<()> {
        let mut signatures = self.signatures.lock();
        signatures.register_node(node)?;
        Self::drain_changes(&signatures)
    }

    /// Remove a departing node's ports from the signature map, disconnecting it from
    /// its current peers, then drain the resulting changes the same way.
    pub fn unregister_node(&self, node: &Arc<NodeInstance>) -> Result<()> {
        let mut signatures = self.signatures.lock();
        signatures.unregister_node(node)?;
        Self::drain_changes(&signatures)
    }

    /// Consume every registered node's pending connector-change entries. Draining here,
    /// at the end of every routing cycle, is what keeps each node's change table empty
    /// between cycles — a connect recorded this cycle and a disconnect recorded in some
    /// later one never land in the same undrained `ChangeEntry`, which would otherwise
    /// trip its sign-mixing guard.
    fn drain_changes(signatures: &PortSignatureMap) -> Result<()> {
        for node in signatures.registered_nodes() {
            for (port_id, entry) in node.drain_change_table() {
                if entry.is_connect() {
                    log::debug!(
                        "node {:?} provide port {port_id} connected to {} require port(s)",
                        node.name,
                        entry.entries().len()
                    );
                } else if entry.is_disconnect() {
                    log::debug!(
                        "node {:?} provide port {port_id} disconnected from {} require port(s)",
                        node.name,
                        entry.entries().len()
                    );
                }
            }
        }
        Ok(())
    }
}
