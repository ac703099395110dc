//! Receive-side write reassembly.
//!
//! Fragmented writes are reassembled keyed by their starting address. A mismatch in the
//! expected continuation offset, or an oversize first fragment, drops the whole write —
//! no partial bytes are ever delivered to the owning file's handler.

use std::sync::Arc;

use crate::error::Result;
use crate::file::{File, FileMap};

struct InProgress {
    file: Arc<File>,
    start_address: u32,
    offset: usize,
    buffer: Vec<u8>,
    drop: bool,
}

/// Per-connection reassembly state for one direction of traffic. A connection's file
/// manager owns exactly one of these for its remote (inbound) file map.
pub struct ReceiveReassembler {
    current: Option<InProgress>,
    capacity: usize,
}

impl ReceiveReassembler {
    pub fn new(capacity: usize) -> Self {
        ReceiveReassembler {
            current: None,
            capacity,
        }
    }

    /// Whether a fragmented write is currently in progress.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Feed one data message `(address, payload, more)` through the reassembler,
    /// resolving the target file in `remote`. Delivers complete writes to the file's
    /// notification handler; silently drops messages that target an unknown or
    /// unopened file, or whose fragments don't line up.
    pub fn on_data(&mut self, address: u32, payload: &[u8], more: bool, remote: &mut FileMap) -> Result<()> {
        match self.current.take() {
            None => self.start(address, payload, more, remote),
            Some(mut cur) => {
                let expected_offset = address.wrapping_sub(cur.file.address) as usize;
                if expected_offset != cur.offset {
                    cur.drop = true;
                } else if cur.offset + payload.len() <= self.capacity {
                    cur.buffer.extend_from_slice(payload);
                    cur.offset += payload.len();
                } else {
                    cur.drop = true;
                }

                if !more {
                    if !cur.drop {
                        let start_offset = (cur.start_address - cur.file.address) as usize;
                        cur.file.deliver_write(start_offset, &cur.buffer)?;
                    }
                    self.current = None;
                } else {
                    self.current = Some(cur);
                }
                Ok(())
            }
        }
    }

    fn start(&mut self, address: u32, payload: &[u8], more: bool, remote: &mut FileMap) -> Result<()> {
        let file = match remote.find_by_address(address) {
            Some(f) if f.is_open() => f,
            _ => return Ok(()),
        };

        if !more {
            let offset = (address - file.address) as usize;
            file.deliver_write(offset, payload)?;
            return Ok(());
        }

        if payload.len() > self.capacity {
            return Ok(());
        }

        let mut buffer = Vec::with_capacity(self.capacity);
        buffer.extend_from_slice(payload);
        self.current = Some(InProgress {
            file,
            start_address: address,
            offset: payload.len(),
            buffer,
            drop: false,
        });
        Ok(())
    }
}
