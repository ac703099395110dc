//! Port signature map: connects provide ports to require
//! ports of the same signature across every node instance on the server, regardless of
//! which connection either side arrived on.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::node::NodeInstance;

use super::connector::ConnectorRef;

#[derive(Clone)]
struct PortEndpoint {
    node: Weak<NodeInstance>,
    port_id: u32,
}

#[derive(Default)]
struct SignatureEntry {
    providers: Vec<PortEndpoint>,
    requirers: Vec<PortEndpoint>,
}

/// `signature-string → { providers[], requirers[] }`. Insertion of a port
/// on one side immediately connects it to every already-registered port on the other
/// side sharing the same signature, recording the change in both nodes' change tables.
#[derive(Default)]
pub struct PortSignatureMap {
    table: HashMap<String, SignatureEntry>,
}

impl PortSignatureMap {
    pub fn new() -> Self {
        PortSignatureMap::default()
    }

    /// Every distinct node instance currently registered under any signature, live
    /// ones only. Used by the global lock to drain change tables after a mutation
    /// without having to track registrations separately.
    pub fn registered_nodes(&self) -> Vec<Arc<NodeInstance>> {
        let mut seen = Vec::new();
        for entry in self.table.values() {
            for endpoint in entry.providers.iter().chain(entry.requirers.iter()) {
                if let Some(node) = endpoint.node.upgrade() {
                    if !seen.iter().any(|n: &Arc<NodeInstance>| Arc::ptr_eq(n, &node)) {
                        seen.push(node);
                    }
                }
            }
        }
        seen
    }

    /// Register every port (provide and require) of `node` under its own signature.
    /// Must be called with the server global lock held.
    pub fn register_node(&mut self, node: &Arc<NodeInstance>) -> Result<()> {
        for port in &node.provide_ports {
            self.insert_provide_port(&port.signature, node, port.port_id)?;
        }
        for port in &node.require_ports {
            self.insert_require_port(&port.signature, node, port.port_id)?;
        }
        Ok(())
    }

    /// Drop every port of `node` from the map, disconnecting it from its current peers.
    pub fn unregister_node(&mut self, node: &Arc<NodeInstance>) -> Result<()> {
        for port in &node.provide_ports {
            self.remove_provide_port(&port.signature, node, port.port_id)?;
        }
        for port in &node.require_ports {
            self.remove_require_port(&port.signature, node, port.port_id)?;
        }
        Ok(())
    }

    fn insert_provide_port(&mut self, signature: &str, node: &Arc<NodeInstance>, port_id: u32) -> Result<()> {
        let entry = self.table.entry(signature.to_string()).or_default();
        for requirer in &entry.requirers {
            if requirer.node.upgrade().is_some() {
                node.connect_provide_port(port_id, ConnectorRef::new(requirer.node.clone(), requirer.port_id))?;
            }
        }
        entry.providers.push(PortEndpoint {
            node: Arc::downgrade(node),
            port_id,
        });
        Ok(())
    }

    fn insert_require_port(&mut self, signature: &str, node: &Arc<NodeInstance>, port_id: u32) -> Result<()> {
        let entry = self.table.entry(signature.to_string()).or_default();
        for provider in &entry.providers {
            if let Some(provider_node) = provider.node.upgrade() {
                provider_node.connect_provide_port(
                    provider.port_id,
                    ConnectorRef::new(Arc::downgrade(node), port_id),
                )?;
            }
        }
        entry.requirers.push(PortEndpoint {
            node: Arc::downgrade(node),
            port_id,
        });
        Ok(())
    }

    fn remove_provide_port(&mut self, signature: &str, node: &Arc<NodeInstance>, port_id: u32) -> Result<()> {
        if let Some(entry) = self.table.get_mut(signature) {
            entry.providers.retain(|p| !(p.port_id == port_id && p.node.ptr_eq(&Arc::downgrade(node))));
            for requirer in &entry.requirers {
                if let Some(requirer_node) = requirer.node.upgrade() {
                    requirer_node.disconnect_provide_port(
                        requirer.port_id,
                        ConnectorRef::new(Arc::downgrade(node), port_id),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn remove_require_port(&mut self, signature: &str, node: &Arc<NodeInstance>, port_id: u32) -> Result<()> {
        if let Some(entry) = self.table.get_mut(signature) {
            entry.requirers.retain(|r| !(r.port_id == port_id && r.node.ptr_eq(&Arc::downgrade(node))));
            for provider in &entry.providers {
                if let Some(provider_node) = provider.node.upgrade() {
                    provider_node.disconnect_provide_port(
                        provider.port_id,
                        ConnectorRef::new(Arc::downgrade(node), port_id),
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeLimits;
    use crate::node::{ByteOffsetMap, NodeData, NodeMode};
    use crate::parse::PortDirection;
    use crate::node::PortInstance;
    use crate::transport::FileManager;

    fn port(direction: PortDirection, id: u32, size: usize) -> PortInstance {
        PortInstance {
            direction,
            port_id: id,
            name: format!("p{id}"),
            signature: "Speed".into(),
            data_size: size,
            data_offset: 0,
            queue_length: 0,
            pack_program: None,
            unpack_program: None,
        }
    }

    fn node_with(provide: Vec<PortInstance>, require: Vec<PortInstance>) -> Arc<NodeInstance> {
        let provide_len = provide.iter().map(|p| p.data_size).sum();
        let require_len = require.iter().map(|p| p.data_size).sum();
        let provide_map = ByteOffsetMap::build(&provide).unwrap();
        let require_map = ByteOffsetMap::build(&require).unwrap();
        let data = NodeData::new(vec![], provide_len, require_len);
        let fm = Arc::new(FileManager::new(&RuntimeLimits::default()));
        NodeInstance::new("N".into(), NodeMode::Server, provide, require, data, provide_map, require_map, fm)
    }

    #[test]
    fn registering_opposite_ports_connects_them() {
        let mut map = PortSignatureMap::new();
        let provider = node_with(vec![port(PortDirection::Provide, 0, 2)], vec![]);
        let requirer = node_with(vec![], vec![port(PortDirection::Require, 0, 2)]);

        map.register_node(&provider).unwrap();
        map.register_node(&requirer).unwrap();

        assert!(!provider.connector_list_is_empty(0));
    }

    #[test]
    fn unregistering_disconnects_existing_links() {
        let mut map = PortSignatureMap::new();
        let provider = node_with(vec![port(PortDirection::Provide, 0, 2)], vec![]);
        let requirer = node_with(vec![], vec![port(PortDirection::Require, 0, 2)]);
        map.register_node(&provider).unwrap();
        map.register_node(&requirer).unwrap();
        // `GlobalLock` drains every registered node's change table at the end of each
        // routing cycle (see `GlobalLock::drain_changes`); do the same here so the
        // later disconnect doesn't land in the same undrained entry as this connect.
        assert_eq!(provider.drain_change_table().len(), 1);
        map.unregister_node(&requirer).unwrap();
        assert!(provider.connector_list_is_empty(0));
        let drained = provider.drain_change_table();
        assert_eq!(drained.len(), 1);
        assert!(drained[0].1.is_disconnect());
    }
}
