//! Transport boundary and per-connection glue.
//!
//! `TransmitHandler` is the interface the embedding transport implements; everything
//! above it (reassembly, scheduling, file management) is transport-agnostic.

pub mod connection;
pub mod manager;
pub mod reassembler;
pub mod scheduler;

pub use connection::ConnectionBase;
pub use manager::{FileManager, FileManagerObserver};
pub use reassembler::ReceiveReassembler;
pub use scheduler::{Msg, SendScheduler};

use crate::error::{Error, Result};

/// The transport-facing send interface a connection's file manager drives.
/// Implemented by whatever owns the actual socket; the core never touches a socket
/// directly.
pub trait TransmitHandler: Send {
    /// Bytes currently available in the transport's send buffer.
    fn get_send_avail(&self) -> usize;
    /// Reserve `len` bytes of send buffer, returning exactly that many bytes or failing.
    fn get_send_buffer(&mut self, len: usize) -> Result<&mut [u8]>;
    /// Commit `len` bytes starting at `offset` within the most recently reserved buffer.
    fn send(&mut self, offset: usize, len: usize) -> Result<()>;
}

/// A simple in-memory `TransmitHandler`: stages bytes up to a fixed capacity and hands
/// them back for the connection's I/O task to write to the real socket. Used by both
/// the TCP and UNIX-domain-socket transports.
pub struct BufferedTransmitHandler {
    staged: Vec<u8>,
    capacity: usize,
}

impl BufferedTransmitHandler {
    pub fn new(capacity: usize) -> Self {
        BufferedTransmitHandler {
            staged: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Take the bytes staged so far, resetting the buffer to empty.
    pub fn take_staged(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.staged)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl TransmitHandler for BufferedTransmitHandler {
    fn get_send_avail(&self) -> usize {
        self.capacity.saturating_sub(self.staged.len())
    }

    fn get_send_buffer(&mut self, len: usize) -> Result<&mut [u8]> {
        let avail = self.get_send_avail();
        if len > avail {
            return Err(Error::TransmitHandlerOverflow {
                requested: len,
                available: avail,
            });
        }
        let start = self.staged.len();
        self.staged.resize(start + len, 0);
        Ok(&mut self.staged[start..start + len])
    }

    fn send(&mut self, offset: usize, len: usize) -> Result<()> {
        let in_range = matches!(offset.checked_add(len), Some(end) if end <= self.staged.len());
        if !in_range {
            return Err(Error::TransmitHandlerInvalidArgument(
                "send range exceeds staged buffer".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_send_buffer_rejects_oversize_reservation() {
        let mut handler = BufferedTransmitHandler::new(4);
        assert!(handler.get_send_buffer(5).is_err());
    }

    #[test]
    fn staged_bytes_accumulate_until_taken() {
        let mut handler = BufferedTransmitHandler::new(8);
        handler.get_send_buffer(3).unwrap().copy_from_slice(&[1, 2, 3]);
        handler.send(0, 3).unwrap();
        assert_eq!(handler.get_send_avail(), 5);
        assert_eq!(handler.take_staged(), vec![1, 2, 3]);
        assert_eq!(handler.get_send_avail(), 8);
    }
}
