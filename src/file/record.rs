//! Per-file state: info, open flag, and the owner-installed notification handler.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::wire::{DigestType, FileType};

/// Classifies which region of address space a file belongs to. Distinct from [`FileType`], which describes the file's
/// own size-encoding tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PortData,
    Definition,
    User,
}

/// Callbacks an owning node instance installs on a file it has opened or published.
pub trait FileNotificationHandler: Send + Sync {
    /// Fired when the file transitions from closed to open.
    fn file_opened(&self, address: u32) {
        let _ = address;
    }
    /// Fired when the file transitions from open to closed.
    fn file_closed(&self, address: u32) {
        let _ = address;
    }
    /// Fired for every write delivered to this file (post-reassembly).
    fn file_written(&self, address: u32, offset: usize, data: &[u8]);
}

struct FileState {
    open: bool,
    handler: Option<Arc<dyn FileNotificationHandler>>,
}

/// A single addressable file. Address, name, and the declared size/type/digest
/// are fixed at creation; the open flag and notification handler are the only mutable
/// parts, and both sit behind this file's own lock.
pub struct File {
    pub address: u32,
    pub name: Vec<u8>,
    pub size: u32,
    pub file_type: FileType,
    pub digest_type: DigestType,
    pub digest: [u8; 32],
    pub kind: FileKind,
    state: Mutex<FileState>,
}

impl File {
    pub fn new(
        address: u32,
        name: Vec<u8>,
        size: u32,
        file_type: FileType,
        digest_type: DigestType,
        digest: [u8; 32],
        kind: FileKind,
    ) -> Self {
        File {
            address,
            name,
            size,
            file_type,
            digest_type,
            digest,
            kind,
            state: Mutex::new(FileState {
                open: false,
                handler: None,
            }),
        }
    }

    /// Whether `addr` falls within `[address, address + size)`.
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.address && addr < self.address.wrapping_add(self.size)
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Install (or replace) the owner's notification handler. Guarded by the per-file
    /// lock; only one handler is ever installed at a time.
    pub fn install_handler(&self, handler: Arc<dyn FileNotificationHandler>) {
        self.state.lock().handler = Some(handler);
    }

    /// Mark the file open and fire `file_opened`. Fails if no handler has been
    /// installed yet.
    pub fn mark_open(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.handler.is_none() {
            return Err(Error::InvalidOpenHandler {
                address: self.address,
            });
        }
        state.open = true;
        let handler = state.handler.clone().unwrap();
        drop(state);
        handler.file_opened(self.address);
        Ok(())
    }

    pub fn mark_closed(&self) {
        let mut state = self.state.lock();
        state.open = false;
        let handler = state.handler.clone();
        drop(state);
        if let Some(handler) = handler {
            handler.file_closed(self.address);
        }
    }

    /// Deliver a reassembled write to the owner, failing if the file is not open.
    pub fn deliver_write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let state = self.state.lock();
        if !state.open {
            return Err(Error::FileNotOpen {
                address: self.address,
            });
        }
        let handler = state.handler.clone();
        drop(state);
        match handler {
            Some(handler) => {
                handler.file_written(self.address, offset, data);
                Ok(())
            }
            None => Err(Error::InvalidOpenHandler {
                address: self.address,
            }),
        }
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("address", &format_args!("{:#x}", self.address))
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("size", &self.size)
            .field("kind", &self.kind)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        opened: Mutex<bool>,
        written: Mutex<Vec<(usize, Vec<u8>)>>,
    }

    impl FileNotificationHandler for Recorder {
        fn file_opened(&self, _address: u32) {
            *self.opened.lock() = true;
        }
        fn file_written(&self, _address: u32, offset: usize, data: &[u8]) {
            self.written.lock().push((offset, data.to_vec()));
        }
    }

    fn make_file() -> File {
        File::new(
            0x1000,
            b"Test.apx".to_vec(),
            64,
            FileType::Fixed,
            DigestType::None,
            [0u8; 32],
            FileKind::Definition,
        )
    }

    #[test]
    fn mark_open_without_handler_fails() {
        let file = make_file();
        assert!(file.mark_open().is_err());
        assert!(!file.is_open());
    }

    #[test]
    fn mark_open_fires_handler_and_sets_flag() {
        let file = make_file();
        let handler = Arc::new(Recorder {
            opened: Mutex::new(false),
            written: Mutex::new(Vec::new()),
        });
        file.install_handler(handler.clone());
        file.mark_open().unwrap();
        assert!(file.is_open());
        assert!(*handler.opened.lock());
    }

    #[test]
    fn deliver_write_requires_open_file() {
        let file = make_file();
        let handler = Arc::new(Recorder {
            opened: Mutex::new(false),
            written: Mutex::new(Vec::new()),
        });
        file.install_handler(handler.clone());
        assert!(file.deliver_write(0, &[1, 2, 3]).is_err());
        file.mark_open().unwrap();
        file.deliver_write(0, &[1, 2, 3]).unwrap();
        assert_eq!(handler.written.lock()[0], (0, vec![1, 2, 3]));
    }

    #[test]
    fn contains_respects_half_open_range() {
        let file = make_file();
        assert!(file.contains(0x1000));
        assert!(file.contains(0x103f));
        assert!(!file.contains(0x1040));
    }
}
