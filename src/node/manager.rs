//! Node manager: builds node instances from definition text, and owns the naming
//! convention used to correlate a node's definition, provide-port-data, and
//! require-port-data files across the wire.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::file::{File, FileKind, FileNotificationHandler};
use crate::parse::{DefinitionParser, PackProgram, PortDirection, UnpackProgram};
use crate::server::GlobalLock;
use crate::transport::{FileManager, FileManagerObserver};
use crate::wire::{DigestType, FileType};

use super::data::NodeData;
use super::instance::{NodeInstance, NodeMode};
use super::port::{ByteOffsetMap, PortInstance};

/// Resolves a parsed port's signature to its wire-encoded size and, where needed, a
/// pack or unpack program.
pub trait ProgramFactory: Send + Sync {
    fn size_for_signature(&self, signature: &str) -> Result<usize>;
    fn pack_for_signature(&self, signature: &str) -> Result<Option<Arc<dyn PackProgram>>> {
        let _ = signature;
        Ok(None)
    }
    fn unpack_for_signature(&self, signature: &str) -> Result<Option<Arc<dyn UnpackProgram>>> {
        let _ = signature;
        Ok(None)
    }
}

/// A minimal [`ProgramFactory`] recognizing the handful of primitive signature strings a
/// definition grammar is expected to emit for scalar ports. Anything else is reported as
/// unsupported — a real deployment supplies a factory backed by the actual pack/unpack
/// compiler.
pub struct FixedWidthProgramFactory;

impl ProgramFactory for FixedWidthProgramFactory {
    fn size_for_signature(&self, signature: &str) -> Result<usize> {
        match signature {
            "u8" | "i8" | "bool" | "c" => Ok(1),
            "u16" | "i16" => Ok(2),
            "u32" | "i32" | "f32" => Ok(4),
            "u64" | "i64" | "f64" => Ok(8),
            other => Err(Error::Unsupported(format!("unknown port signature {other:?}"))),
        }
    }
}

struct NoopFileHandler;
impl FileNotificationHandler for NoopFileHandler {
    fn file_written(&self, _address: u32, _offset: usize, _data: &[u8]) {}
}

/// Sends a local definition file's content the moment the peer opens it. A definition
/// is published once and never rewritten, so there is nothing to react to beyond that
/// first open.
struct DefinitionSender {
    file_manager: Arc<FileManager>,
    text: Arc<[u8]>,
}
impl FileNotificationHandler for DefinitionSender {
    fn file_opened(&self, address: u32) {
        self.file_manager.send_file_contents(address, self.text.clone());
    }
    fn file_written(&self, _address: u32, _offset: usize, _data: &[u8]) {}
}

/// Accumulates a remote definition file's bytes across however many write fragments it
/// takes to arrive in full, then hands the complete text to the node manager to parse
/// and build.
struct DefinitionReceiver {
    manager: std::sync::Weak<NodeManagerInner>,
    expected_size: usize,
    received: Mutex<Vec<u8>>,
}

impl FileNotificationHandler for DefinitionReceiver {
    fn file_written(&self, _address: u32, offset: usize, data: &[u8]) {
        let mut buf = self.received.lock();
        if buf.len() < self.expected_size {
            buf.resize(self.expected_size, 0);
        }
        let end = (offset + data.len()).min(buf.len());
        if offset < end {
            buf[offset..end].copy_from_slice(&data[..end - offset]);
        }
        let complete = offset + data.len() >= self.expected_size;
        if complete {
            let text = buf.clone();
            drop(buf);
            if let Some(inner) = self.manager.upgrade() {
                let _ = inner.finish_remote_definition(&text);
            }
        }
    }
}

struct NodeManagerInner {
    mode: NodeMode,
    parser: Arc<dyn DefinitionParser>,
    programs: Arc<dyn ProgramFactory>,
    file_manager: Arc<FileManager>,
    global_lock: Option<Arc<GlobalLock>>,
    nodes: Mutex<HashMap<String, Arc<NodeInstance>>>,
}

impl NodeManagerInner {
    fn finish_remote_definition(self: &Arc<Self>, text: &[u8]) -> Result<Arc<NodeInstance>> {
        let node = build_node(&self.parser, &self.programs, self.mode, &self.file_manager, text)?;
        self.nodes.lock().insert(node.name.clone(), node.clone());
        if let Some(lock) = &self.global_lock {
            lock.register_node(&node)?;
        }
        Ok(node)
    }
}

fn build_node(
    parser: &Arc<dyn DefinitionParser>,
    programs: &Arc<dyn ProgramFactory>,
    mode: NodeMode,
    file_manager: &Arc<FileManager>,
    text: &[u8],
) -> Result<Arc<NodeInstance>> {
    let tree = parser.parse(text)?;
    let mut provide_ports = Vec::new();
    let mut require_ports = Vec::new();
    let mut provide_offset = 0usize;
    let mut require_offset = 0usize;
    let mut provide_id = 0u32;
    let mut require_id = 0u32;

    for port in &tree.ports {
        let size = programs.size_for_signature(&port.signature)?;
        match port.direction {
            PortDirection::Provide => {
                let pack = programs.pack_for_signature(&port.signature)?;
                provide_ports.push(PortInstance {
                    direction: PortDirection::Provide,
                    port_id: provide_id,
                    name: port.name.clone(),
                    signature: port.signature.clone(),
                    data_size: size,
                    data_offset: provide_offset,
                    queue_length: port.queue_length,
                    pack_program: pack,
                    unpack_program: None,
                });
                provide_offset += size;
                provide_id += 1;
            }
            PortDirection::Require => {
                let unpack = programs.unpack_for_signature(&port.signature)?;
                require_ports.push(PortInstance {
                    direction: PortDirection::Require,
                    port_id: require_id,
                    name: port.name.clone(),
                    signature: port.signature.clone(),
                    data_size: size,
                    data_offset: require_offset,
                    queue_length: port.queue_length,
                    pack_program: None,
                    unpack_program: unpack,
                });
                require_offset += size;
                require_id += 1;
            }
        }
    }

    let provide_byte_map = ByteOffsetMap::build(&provide_ports)?;
    let require_byte_map = ByteOffsetMap::build(&require_ports)?;
    let data = NodeData::new(text.to_vec(), provide_offset, require_offset);
    Ok(NodeInstance::new(
        tree.node_name,
        mode,
        provide_ports,
        require_ports,
        data,
        provide_byte_map,
        require_byte_map,
        file_manager.clone(),
    ))
}

/// Owns every node instance built or received on one connection, and the naming
/// convention (`"{name}"`, `"{name}.provide"`, `"{name}.require"`) used to correlate a
/// node's definition, provide-port-data, and require-port-data files when they arrive
/// as separate `PublishFile` announcements.
pub struct NodeManager(Arc<NodeManagerInner>);

impl NodeManager {
    pub fn new(
        mode: NodeMode,
        parser: Arc<dyn DefinitionParser>,
        programs: Arc<dyn ProgramFactory>,
        file_manager: Arc<FileManager>,
    ) -> Self {
        Self::with_global_lock(mode, parser, programs, file_manager, None)
    }

    /// Build a node manager that registers every node it builds or receives into the
    /// server-wide [`GlobalLock`]. `mode` should be
    /// [`NodeMode::Server`] when a lock is supplied.
    pub fn with_global_lock(
        mode: NodeMode,
        parser: Arc<dyn DefinitionParser>,
        programs: Arc<dyn ProgramFactory>,
        file_manager: Arc<FileManager>,
        global_lock: Option<Arc<GlobalLock>>,
    ) -> Self {
        NodeManager(Arc::new(NodeManagerInner {
            mode,
            parser,
            programs,
            file_manager,
            global_lock,
            nodes: Mutex::new(HashMap::new()),
        }))
    }

    pub fn node(&self, name: &str) -> Option<Arc<NodeInstance>> {
        self.0.nodes.lock().get(name).cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<NodeInstance>> {
        self.0.nodes.lock().values().cloned().collect()
    }

    /// Parse and build a node directly from already-known text — the path used when
    /// this side authored the definition itself.
    pub fn build_node(&self, text: &[u8]) -> Result<Arc<NodeInstance>> {
        let node = build_node(&self.0.parser, &self.0.programs, self.0.mode, &self.0.file_manager, text)?;
        self.0.nodes.lock().insert(node.name.clone(), node.clone());
        if let Some(lock) = &self.0.global_lock {
            lock.register_node(&node)?;
        }
        Ok(node)
    }

    /// Publish a locally-built node's definition, and its provide/require-port-data
    /// files if it declares any ports in that direction.
    pub fn publish_local(&self, node: &Arc<NodeInstance>, definition_text: &[u8]) -> Result<()> {
        let fm = &self.0.file_manager;
        let digest = [0u8; 32];

        let def_file = fm.create_local_file(
            FileKind::Definition,
            node.name.clone().into_bytes(),
            definition_text.len() as u32,
            FileType::Dynamic32,
            DigestType::None,
            digest,
            Arc::new(DefinitionSender {
                file_manager: fm.clone(),
                text: Arc::from(definition_text),
            }),
        )?;
        node.set_definition_file(def_file.clone());
        fm.publish_local_file(&def_file);

        if !node.provide_ports.is_empty() {
            let provide_file = fm.create_local_file(
                FileKind::PortData,
                format!("{}.provide", node.name).into_bytes(),
                node.data.provide_len() as u32,
                FileType::Fixed,
                DigestType::None,
                digest,
                node.provide_open_handler(),
            )?;
            node.set_provide_file(provide_file.clone());
            fm.publish_local_file(&provide_file);
        }

        if !node.require_ports.is_empty() {
            let require_file = fm.create_local_file(
                FileKind::PortData,
                format!("{}.require", node.name).into_bytes(),
                node.data.require_len() as u32,
                FileType::Fixed,
                DigestType::None,
                digest,
                node.require_write_handler(),
            )?;
            node.set_require_file(require_file.clone());
            fm.publish_local_file(&require_file);
        }
        Ok(())
    }

    /// React to a remote file announcement: definition files get a [`DefinitionReceiver`];
    /// a remote `.provide` file gets the provide-write routing handler; a remote `.require`
    /// file is recorded as the node's `require_file` so [`NodeInstance::route_provide_write`]
    /// has somewhere to push routed values for that peer. Either way, opening a remote file
    /// marks our own record of it open too — the reassembler only accepts writes into files
    /// it considers open, regardless of which side created the record — and asks the
    /// publisher to open its matching local copy so it starts sending.
    pub fn handle_remote_file(&self, file: Arc<File>) {
        match file.kind {
            FileKind::Definition => {
                let receiver = Arc::new(DefinitionReceiver {
                    manager: Arc::downgrade(&self.0),
                    expected_size: file.size as usize,
                    received: Mutex::new(Vec::new()),
                });
                file.install_handler(receiver);
                self.open_remote_file(&file);
            }
            FileKind::PortData => {
                let name_str = String::from_utf8_lossy(&file.name).to_string();
                if let Some(node_name) = name_str.strip_suffix(".provide") {
                    if let Some(node) = self.node(node_name) {
                        file.install_handler(node.provide_write_handler());
                        self.open_remote_file(&file);
                    }
                } else if let Some(node_name) = name_str.strip_suffix(".require") {
                    if let Some(node) = self.node(node_name) {
                        file.install_handler(Arc::new(NoopFileHandler));
                        node.set_require_file(file.clone());
                        self.open_remote_file(&file);
                    }
                }
            }
            FileKind::User => {}
        }
    }

    fn open_remote_file(&self, file: &Arc<File>) {
        if let Err(e) = file.mark_open() {
            log::warn!("failed to open remote file {:?}: {e}", String::from_utf8_lossy(&file.name));
            return;
        }
        self.0.file_manager.send_open_file_request(file.address);
    }
}

impl FileManagerObserver for NodeManager {
    fn remote_file_published(&self, file: Arc<File>) {
        self.handle_remote_file(file);
    }
}
