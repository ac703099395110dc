//! File manager: the per-connection owner of both file maps, the receive reassembler,
//! and the send scheduler.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::{RuntimeLimits, RMF_CMD_START_ADDR};
use crate::error::Result;
use crate::file::{File, FileKind, FileMap, FileNotificationHandler};
use crate::wire::command::{Command, DigestType, FileInfo, FileType};
use crate::wire::{address, framing};

use super::{Msg, ReceiveReassembler, SendScheduler, TransmitHandler};

/// Upcalls a file manager makes into whatever owns it — normally a node manager,
/// which reacts to newly published remote files and protocol-level notifications by
/// driving its node instances' handshake state machines.
pub trait FileManagerObserver: Send + Sync {
    fn remote_file_published(&self, _file: Arc<File>) {}
    fn ack_received(&self) {}
    fn error_received(&self, _code: u32, _data: &[u8]) {}
    fn heartbeat_acknowledged(&self) {}
    fn ping_acknowledged(&self) {}
}

struct Inner {
    local: FileMap,
    remote: FileMap,
    reassembler: ReceiveReassembler,
    scheduler: SendScheduler,
}

/// Owns a connection's local and remote file maps, its receive reassembler, and its
/// send scheduler. One instance per connection.
pub struct FileManager {
    inner: Mutex<Inner>,
    observer: RwLock<Option<Arc<dyn FileManagerObserver>>>,
}

impl FileManager {
    pub fn new(limits: &RuntimeLimits) -> Self {
        FileManager {
            inner: Mutex::new(Inner {
                local: FileMap::new(),
                remote: FileMap::new(),
                reassembler: ReceiveReassembler::new(limits.reassembly_buffer_capacity),
                scheduler: SendScheduler::new(limits),
            }),
            observer: RwLock::new(None),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn FileManagerObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Create and auto-address a local file, installing `handler` on it up front
    /// ("default" meaning whatever the owning node instance supplies).
    #[allow(clippy::too_many_arguments)]
    pub fn create_local_file(
        &self,
        kind: FileKind,
        name: Vec<u8>,
        size: u32,
        file_type: FileType,
        digest_type: DigestType,
        digest: [u8; 32],
        handler: Arc<dyn FileNotificationHandler>,
    ) -> Result<Arc<File>> {
        let mut inner = self.inner.lock();
        let file = inner
            .local
            .auto_insert(kind, name, size, file_type, digest_type, digest)?;
        file.install_handler(handler);
        Ok(file)
    }

    pub fn local_files(&self) -> Vec<Arc<File>> {
        self.inner.lock().local.iter().cloned().collect()
    }

    pub fn find_local_by_address(&self, address: u32) -> Option<Arc<File>> {
        self.inner.lock().local.find_by_address(address)
    }

    pub fn find_remote_by_address(&self, address: u32) -> Option<Arc<File>> {
        self.inner.lock().remote.find_by_address(address)
    }

    /// Enqueue this file's info to be announced to the peer.
    pub fn publish_local_file(&self, file: &File) {
        let info = FileInfo {
            address: file.address,
            size: file.size,
            file_type: file.file_type,
            digest_type: file.digest_type,
            digest: file.digest,
            name: file.name.clone(),
        };
        self.inner.lock().scheduler.enqueue(Msg::PublishFileInfo(info));
    }

    pub fn send_open_file_request(&self, address: u32) {
        self.inner.lock().scheduler.enqueue(Msg::OpenFile { address });
    }

    pub fn send_close_file_request(&self, address: u32) {
        self.inner.lock().scheduler.enqueue(Msg::CloseFile { address });
    }

    /// Enqueue a write. `owned` distinguishes a buffer the caller is handing off
    /// (`DirectWrite`) from one borrowed out of `NodeData` that the scheduler must copy
    /// before it can coalesce or fragment it (`WriteNotify`).
    pub fn send_local_data(&self, address: u32, data: Vec<u8>, owned: bool) {
        let msg = if owned {
            Msg::DirectWrite { address, data }
        } else {
            Msg::WriteNotify { address, data }
        };
        self.inner.lock().scheduler.enqueue(msg);
    }

    pub fn send_file_contents(&self, address: u32, data: Arc<[u8]>) {
        self.inner
            .lock()
            .scheduler
            .enqueue(Msg::SendFile { address, data });
    }

    /// Drive the send scheduler one tick against the transport.
    pub fn run(&self, transmit: &mut dyn TransmitHandler) -> Result<()> {
        self.inner.lock().scheduler.run(transmit)
    }

    /// Feed newly received bytes through framing → address → dispatch. Returns the
    /// number of bytes consumed, or `0` if `bytes` does not yet contain a complete
    /// message.
    pub fn message_received(&self, bytes: &[u8]) -> Result<usize> {
        let (size, header_len) = match framing::decode(bytes) {
            framing::Decoded::Complete { size, header_len } => (size, header_len),
            framing::Decoded::NeedMore => return Ok(0),
        };
        let total = header_len + size;
        if bytes.len() < total {
            return Ok(0);
        }
        let body = &bytes[header_len..total];
        let (addr_header, addr_len) = address::decode(body)?;
        let payload = &body[addr_len..];

        if addr_header.address == RMF_CMD_START_ADDR {
            let cmd = Command::decode(payload)?;
            self.dispatch_command(cmd)?;
        } else {
            let mut inner = self.inner.lock();
            let (remote, reassembler) = (&mut inner.remote, &mut inner.reassembler);
            reassembler.on_data(addr_header.address, payload, addr_header.more, remote)?;
        }
        Ok(total)
    }

    fn dispatch_command(&self, cmd: Command) -> Result<()> {
        match cmd {
            Command::PublishFile(info) => {
                let file = Arc::new(File::new(
                    info.address,
                    info.name,
                    info.size,
                    info.file_type,
                    info.digest_type,
                    info.digest,
                    file_kind_for_address(info.address),
                ));
                self.inner.lock().remote.insert(file.clone())?;
                if let Some(observer) = self.observer.read().clone() {
                    observer.remote_file_published(file);
                }
            }
            Command::OpenFile { address } => {
                if let Some(file) = self.inner.lock().local.find_by_address(address) {
                    file.mark_open()?;
                }
            }
            Command::CloseFile { address } => {
                if let Some(file) = self.inner.lock().local.find_by_address(address) {
                    file.mark_closed();
                }
            }
            Command::Ack => {
                if let Some(observer) = self.observer.read().clone() {
                    observer.ack_received();
                }
            }
            Command::Error { code, data } => {
                if let Some(observer) = self.observer.read().clone() {
                    observer.error_received(code, &data);
                }
            }
            Command::HeartbeatRequest => {
                self.inner.lock().scheduler.enqueue(Msg::Raw(Command::HeartbeatResponse));
            }
            Command::HeartbeatResponse => {
                if let Some(observer) = self.observer.read().clone() {
                    observer.heartbeat_acknowledged();
                }
            }
            Command::PingRequest => {
                self.inner.lock().scheduler.enqueue(Msg::Raw(Command::PingResponse));
            }
            Command::PingResponse => {
                if let Some(observer) = self.observer.read().clone() {
                    observer.ping_acknowledged();
                }
            }
        }
        Ok(())
    }

    /// Send an `Ack` command (used by the server to close out the greeting handshake).
    pub fn send_ack(&self) {
        self.inner.lock().scheduler.enqueue(Msg::Raw(Command::Ack));
    }

    /// Enqueue an `Error` command reporting `code` to the peer.
    pub fn send_error(&self, code: u32, data: Vec<u8>) {
        self.inner
            .lock()
            .scheduler
            .enqueue(Msg::Raw(Command::Error { code, data }));
    }

    /// Enqueue a `HeartbeatRequest` to the peer (driven by a periodic timer elsewhere).
    pub fn send_heartbeat_request(&self) {
        self.inner.lock().scheduler.enqueue(Msg::Raw(Command::HeartbeatRequest));
    }

    /// Enqueue a `PingRequest` to the peer.
    pub fn send_ping_request(&self) {
        self.inner.lock().scheduler.enqueue(Msg::Raw(Command::PingRequest));
    }
}

fn file_kind_for_address(address: u32) -> FileKind {
    use crate::config::{DEFINITION_REGION, PORT_DATA_REGION};
    if address >= PORT_DATA_REGION.0 && address < PORT_DATA_REGION.1 {
        FileKind::PortData
    } else if address >= DEFINITION_REGION.0 && address < DEFINITION_REGION.1 {
        FileKind::Definition
    } else {
        FileKind::User
    }
}
