//! Node instance: per-node handshake state machines and the server-side provide-port
//! write routing algorithm.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::file::{File, FileNotificationHandler};
use crate::server::connector::{ChangeTable, ConnectorRef, ConnectorTable};
use crate::transport::FileManager;

use super::data::NodeData;
use super::port::{ByteOffsetMap, PortInstance};

/// Which end of a connection a node instance represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    Client,
    Server,
}

/// One aspect's handshake state. All three aspects
/// — definition, provide-data, require-data — walk the same state shape, at different
/// paces and under different transition triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataState {
    Init,
    WaitingFileInfo,
    WaitingForFileOpenRequest,
    WaitingForFileData,
    Connected,
    Disconnected,
}

#[derive(Default)]
struct Handshake {
    definition: Option<DataState>,
    provide: Option<DataState>,
    require: Option<DataState>,
}

/// Observer for per-port value updates delivered to a node's require ports.
pub trait PortValueObserver: Send + Sync {
    fn on_require_port_value(&self, port_id: u32, data: &[u8]);
}

/// Per-node state: a name, a client/server mode, three
/// handshake states, port lists, byte storage, and — on the server — the connector
/// bookkeeping used to route provide-port writes to subscribing require ports.
pub struct NodeInstance {
    pub name: String,
    pub mode: NodeMode,
    pub provide_ports: Vec<PortInstance>,
    pub require_ports: Vec<PortInstance>,
    pub data: NodeData,
    pub provide_byte_map: ByteOffsetMap,
    pub require_byte_map: ByteOffsetMap,
    /// The file manager of the connection this node instance belongs to; used to push
    /// routed writes out to subscribing peers.
    file_manager: Arc<FileManager>,
    handshake: Mutex<Handshake>,
    definition_file: Mutex<Option<Arc<File>>>,
    provide_file: Mutex<Option<Arc<File>>>,
    require_file: Mutex<Option<Arc<File>>>,
    connector_table: Mutex<Option<ConnectorTable>>,
    change_table: Mutex<Option<ChangeTable>>,
    value_observer: Mutex<Option<Arc<dyn PortValueObserver>>>,
}

impl NodeInstance {
    pub fn new(
        name: String,
        mode: NodeMode,
        provide_ports: Vec<PortInstance>,
        require_ports: Vec<PortInstance>,
        data: NodeData,
        provide_byte_map: ByteOffsetMap,
        require_byte_map: ByteOffsetMap,
        file_manager: Arc<FileManager>,
    ) -> Arc<Self> {
        let num_provide = provide_ports.len();
        let (connector_table, change_table) = if mode == NodeMode::Server {
            (Some(ConnectorTable::new(num_provide)), Some(ChangeTable::new(num_provide)))
        } else {
            (None, None)
        };
        Arc::new(NodeInstance {
            name,
            mode,
            provide_ports,
            require_ports,
            data,
            provide_byte_map,
            require_byte_map,
            file_manager,
            handshake: Mutex::new(Handshake::default()),
            definition_file: Mutex::new(None),
            provide_file: Mutex::new(None),
            require_file: Mutex::new(None),
            connector_table: Mutex::new(connector_table),
            change_table: Mutex::new(change_table),
            value_observer: Mutex::new(None),
        })
    }

    pub fn set_value_observer(&self, observer: Arc<dyn PortValueObserver>) {
        *self.value_observer.lock() = Some(observer);
    }

    pub fn definition_state(&self) -> DataState {
        self.handshake.lock().definition.unwrap_or(DataState::Init)
    }
    pub fn provide_state(&self) -> DataState {
        self.handshake.lock().provide.unwrap_or(DataState::Init)
    }
    pub fn require_state(&self) -> DataState {
        self.handshake.lock().require.unwrap_or(DataState::Init)
    }
    pub fn set_definition_state(&self, state: DataState) {
        self.handshake.lock().definition = Some(state);
    }
    pub fn set_provide_state(&self, state: DataState) {
        self.handshake.lock().provide = Some(state);
    }
    pub fn set_require_state(&self, state: DataState) {
        self.handshake.lock().require = Some(state);
    }

    pub fn set_definition_file(&self, file: Arc<File>) {
        *self.definition_file.lock() = Some(file);
    }
    pub fn set_provide_file(&self, file: Arc<File>) {
        *self.provide_file.lock() = Some(file);
    }
    pub fn set_require_file(&self, file: Arc<File>) {
        *self.require_file.lock() = Some(file);
    }
    pub fn provide_file(&self) -> Option<Arc<File>> {
        self.provide_file.lock().clone()
    }
    pub fn require_file(&self) -> Option<Arc<File>> {
        self.require_file.lock().clone()
    }
    pub fn definition_file(&self) -> Option<Arc<File>> {
        self.definition_file.lock().clone()
    }

    /// Install a [`FileNotificationHandler`] on this node's remote provide-port-data
    /// file that routes incoming writes through [`NodeInstance::route_provide_write`].
    pub fn provide_write_handler(self: &Arc<Self>) -> Arc<dyn FileNotificationHandler> {
        Arc::new(ProvideFileHandler(Arc::downgrade(self)))
    }

    /// Install a [`FileNotificationHandler`] on this node's local require-port-data
    /// file that updates `NodeData` and fires the per-port value observer.
    pub fn require_write_handler(self: &Arc<Self>) -> Arc<dyn FileNotificationHandler> {
        Arc::new(RequireFileHandler(Arc::downgrade(self)))
    }

    /// Install a [`FileNotificationHandler`] on this node's local provide-port-data
    /// file that, once the peer opens it, immediately sends the current provide
    /// buffer as a one-shot snapshot — so a subscriber that connects after the first
    /// value was published still sees it rather than waiting for the next update.
    pub fn provide_open_handler(self: &Arc<Self>) -> Arc<dyn FileNotificationHandler> {
        Arc::new(ProvideSnapshotHandler(Arc::downgrade(self)))
    }

    /// Push this node's current provide buffer out over the wire as a single write,
    /// addressed at the start of its local provide file. No-op if the provide file
    /// hasn't been created yet.
    pub fn send_provide_snapshot(&self) {
        if let Some(file) = self.provide_file() {
            let snapshot = self.data.take_provide_port_data_snapshot();
            if !snapshot.is_empty() {
                self.file_manager.send_file_contents(file.address, snapshot.into());
            }
        }
    }

    /// Connect `target` (a require port on some other node) to `provide_port_id` on
    /// this (server-side) node, recording the change in both the live connector table
    /// and the pending-change scratch table. Must run under the
    /// server global lock.
    pub fn connect_provide_port(&self, provide_port_id: u32, target: ConnectorRef) -> Result<()> {
        let mut connector_table = self.connector_table.lock();
        let table = connector_table
            .as_mut()
            .ok_or_else(|| Error::Internal("connect_provide_port on a non-server node".into()))?;
        let list = table
            .for_port_mut(provide_port_id)
            .ok_or_else(|| Error::Internal("provide_port_id out of range".into()))?;
        list.connect(target.clone());
        drop(connector_table);
        self.change_table
            .lock()
            .as_mut()
            .ok_or_else(|| Error::Internal("missing change table on server node".into()))?
            .record(provide_port_id, target, 1)
    }

    /// Symmetric disconnect, e.g. when a peer drops.
    pub fn disconnect_provide_port(&self, provide_port_id: u32, target: ConnectorRef) -> Result<()> {
        let mut connector_table = self.connector_table.lock();
        let table = connector_table
            .as_mut()
            .ok_or_else(|| Error::Internal("disconnect_provide_port on a non-server node".into()))?;
        if let Some(list) = table.for_port_mut(provide_port_id) {
            list.disconnect(&target);
        }
        drop(connector_table);
        self.change_table
            .lock()
            .as_mut()
            .ok_or_else(|| Error::Internal("missing change table on server node".into()))?
            .record(provide_port_id, target, -1)
    }

    pub fn connector_list_is_empty(&self, provide_port_id: u32) -> bool {
        self.connector_table
            .lock()
            .as_ref()
            .and_then(|t| t.for_port(provide_port_id))
            .map(|list| list.is_empty())
            .unwrap_or(true)
    }

    pub fn drain_change_table(&self) -> Vec<(u32, crate::server::connector::ChangeEntry)> {
        self.change_table
            .lock()
            .as_mut()
            .map(|t| t.drain())
            .unwrap_or_default()
    }

    /// Server-side provide-port write routing: walk the written byte range
    /// port by port, update this node's own provide buffer, and forward each port's new
    /// value to every connected require port.
    pub fn route_provide_write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.data.write_provide(offset, data)?;

        let connector_table = self.connector_table.lock();
        let table = match connector_table.as_ref() {
            Some(t) => t,
            None => return Ok(()),
        };

        let mut pos = offset;
        let mut remaining = data;
        while !remaining.is_empty() {
            let port_id = self.provide_byte_map.port_id_at(pos).ok_or(Error::ValueLengthError {
                offset: pos,
                len: remaining.len(),
                bound: self.provide_byte_map.len(),
            })?;
            let port = self
                .provide_ports
                .get(port_id as usize)
                .ok_or_else(|| Error::Internal(format!("unknown provide port id {port_id}")))?;
            if pos != port.data_offset {
                return Err(Error::InvalidWrite { offset: pos });
            }
            let size = port.data_size.min(remaining.len());
            let chunk = &remaining[..size];

            if let Some(list) = table.for_port(port_id) {
                for target in list.iter() {
                    if let Some(node) = target.node.upgrade() {
                        if let Some(req_port) = node.require_ports.get(target.port_id as usize) {
                            if req_port.data_size == size {
                                node.deliver_to_require_port(req_port, chunk);
                            }
                        }
                    }
                }
            }

            pos += size;
            remaining = &remaining[size..];
        }
        Ok(())
    }

    /// Update this node's own provide buffer at `port_id` and, if the peer has opened
    /// this node's provide file, push the new value out over the wire. This is the
    /// entry point a locally-authored node uses to publish a new provide-port value;
    /// the routing counterpart on the peer that receives it is
    /// [`NodeInstance::route_provide_write`], triggered when the write arrives there.
    pub fn write_provide_value(&self, port_id: u32, value: &[u8]) -> Result<()> {
        let port = self
            .provide_ports
            .get(port_id as usize)
            .ok_or_else(|| Error::Internal(format!("unknown provide port id {port_id}")))?;
        if value.len() != port.data_size {
            return Err(Error::ValueLengthError {
                offset: port.data_offset,
                len: value.len(),
                bound: port.data_size,
            });
        }
        self.data.write_provide(port.data_offset, value)?;
        if let Some(file) = self.provide_file() {
            if file.is_open() {
                self.file_manager
                    .send_local_data(file.address + port.data_offset as u32, value.to_vec(), false);
            }
        }
        Ok(())
    }

    fn deliver_to_require_port(&self, port: &PortInstance, value: &[u8]) {
        if self.data.write_require(port.data_offset, value).is_err() {
            return;
        }
        if let Some(file) = self.require_file() {
            if file.is_open() {
                self.file_manager
                    .send_local_data(file.address + port.data_offset as u32, value.to_vec(), false);
            }
        }
        if let Some(observer) = self.value_observer.lock().clone() {
            observer.on_require_port_value(port.port_id, value);
        }
    }
}

struct ProvideFileHandler(Weak<NodeInstance>);
impl FileNotificationHandler for ProvideFileHandler {
    fn file_written(&self, _address: u32, offset: usize, data: &[u8]) {
        if let Some(node) = self.0.upgrade() {
            let _ = node.route_provide_write(offset, data);
        }
    }
}

struct ProvideSnapshotHandler(Weak<NodeInstance>);
impl FileNotificationHandler for ProvideSnapshotHandler {
    fn file_opened(&self, _address: u32) {
        if let Some(node) = self.0.upgrade() {
            node.send_provide_snapshot();
        }
    }
    fn file_written(&self, _address: u32, _offset: usize, _data: &[u8]) {}
}

struct RequireFileHandler(Weak<NodeInstance>);
impl FileNotificationHandler for RequireFileHandler {
    fn file_written(&self, _address: u32, offset: usize, data: &[u8]) {
        if let Some(node) = self.0.upgrade() {
            if node.data.write_require(offset, data).is_err() {
                return;
            }
            if let Some(port) = node
                .require_ports
                .iter()
                .find(|p| p.data_offset == offset && p.data_size == data.len())
            {
                if let Some(observer) = node.value_observer.lock().clone() {
                    observer.on_require_port_value(port.port_id, data);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeLimits;
    use crate::node::port::ByteOffsetMap;
    use crate::parse::PortDirection;

    fn port(direction: PortDirection, id: u32, offset: usize, size: usize) -> PortInstance {
        PortInstance {
            direction,
            port_id: id,
            name: format!("p{id}"),
            signature: "S".into(),
            data_size: size,
            data_offset: offset,
            queue_length: 0,
            pack_program: None,
            unpack_program: None,
        }
    }

    fn server_node(provide_ports: Vec<PortInstance>) -> Arc<NodeInstance> {
        let data = NodeData::new(vec![], provide_ports.iter().map(|p| p.data_size).sum(), 0);
        let byte_map = ByteOffsetMap::build(&provide_ports).unwrap();
        let fm = Arc::new(FileManager::new(&RuntimeLimits::default()));
        NodeInstance::new(
            "A".into(),
            NodeMode::Server,
            provide_ports,
            Vec::new(),
            data,
            byte_map,
            ByteOffsetMap::build(&[]).unwrap(),
            fm,
        )
    }

    fn client_node(require_ports: Vec<PortInstance>) -> Arc<NodeInstance> {
        let data = NodeData::new(vec![], 0, require_ports.iter().map(|p| p.data_size).sum());
        let byte_map = ByteOffsetMap::build(&require_ports).unwrap();
        let fm = Arc::new(FileManager::new(&RuntimeLimits::default()));
        NodeInstance::new(
            "B".into(),
            NodeMode::Client,
            Vec::new(),
            require_ports,
            data,
            ByteOffsetMap::build(&[]).unwrap(),
            byte_map,
            fm,
        )
    }

    #[test]
    fn routed_write_updates_connected_require_port() {
        let provide_node = server_node(vec![port(PortDirection::Provide, 0, 0, 2)]);
        let require_node = client_node(vec![port(PortDirection::Require, 0, 0, 2)]);

        provide_node
            .connect_provide_port(0, ConnectorRef::new(Arc::downgrade(&require_node), 0))
            .unwrap();

        provide_node.route_provide_write(0, &[0x34, 0x12]).unwrap();
        assert_eq!(require_node.data.read_require(0, 2).unwrap(), vec![0x34, 0x12]);
    }

    #[test]
    fn write_provide_value_updates_local_buffer() {
        let node = server_node(vec![port(PortDirection::Provide, 0, 0, 2)]);
        node.write_provide_value(0, &[0x78, 0x56]).unwrap();
        assert_eq!(node.data.read_provide(0, 2).unwrap(), vec![0x78, 0x56]);
    }

    #[test]
    fn write_provide_value_rejects_wrong_length() {
        let node = server_node(vec![port(PortDirection::Provide, 0, 0, 2)]);
        assert!(node.write_provide_value(0, &[0x01]).is_err());
    }

    #[test]
    fn route_provide_write_rejects_a_write_starting_mid_port() {
        let provide_node = server_node(vec![
            port(PortDirection::Provide, 0, 0, 2),
            port(PortDirection::Provide, 1, 2, 2),
        ]);
        // Offset 1 lands inside port 0's range but not at its start.
        let err = provide_node.route_provide_write(1, &[0xAA, 0xBB]).unwrap_err();
        assert!(matches!(err, Error::InvalidWrite { offset: 1 }));
    }

    #[test]
    fn disconnect_leaves_connector_list_empty() {
        let provide_node = server_node(vec![port(PortDirection::Provide, 0, 0, 2)]);
        let require_node = client_node(vec![port(PortDirection::Require, 0, 0, 2)]);
        let target = ConnectorRef::new(Arc::downgrade(&require_node), 0);
        provide_node.connect_provide_port(0, target.clone()).unwrap();
        // A real routing cycle drains the change table (see `GlobalLock::drain_changes`)
        // before the peer can later drop, so the connect and the disconnect below never
        // land in the same undrained entry.
        let connected = provide_node.drain_change_table();
        assert_eq!(connected.len(), 1);
        assert!(connected[0].1.is_connect());

        provide_node.disconnect_provide_port(0, target).unwrap();
        assert!(provide_node.connector_list_is_empty(0));
        let drained = provide_node.drain_change_table();
        assert_eq!(drained.len(), 1);
        assert!(drained[0].1.is_disconnect());
    }
}
