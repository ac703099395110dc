//! Send scheduler: queues outbound messages, fragments them to fit the transport's
//! currently available buffer, and coalesces adjacent write notifications.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::{RuntimeLimits, RMF_CMD_START_ADDR};
use crate::error::Result;
use crate::wire::command::FILE_INFO_HEADER_LEN;
use crate::wire::{address, framing, AddressHeader, Command, FileInfo};

use super::TransmitHandler;

/// Below this many available bytes, the scheduler makes no attempt to emit anything
/// this tick.
const MIN_BUFFER_THRESHOLD: usize = 4;

/// A queued outbound message.
pub enum Msg {
    PublishFileInfo(FileInfo),
    OpenFile { address: u32 },
    CloseFile { address: u32 },
    /// A write the sender does not own the backing buffer for (borrowed from `NodeData`).
    WriteNotify { address: u32, data: Vec<u8> },
    /// A file's full contents, sent as a (possibly fragmented) stream of writes.
    SendFile { address: u32, data: Arc<[u8]> },
    /// A write whose buffer the sender owns outright.
    DirectWrite { address: u32, data: Vec<u8> },
    /// Any other in-band command (`Ack`, `Error`, heartbeats, pings).
    Raw(Command),
}

struct PendingWrite {
    address: u32,
    data: Vec<u8>,
    offset: usize,
}

/// Per-connection send scheduler. Owned exclusively by a file manager, driven by its
/// worker task's `run()` calls.
pub struct SendScheduler {
    queue: VecDeque<Msg>,
    latest_write_notify: Option<(u32, Vec<u8>)>,
    pending_write: Option<PendingWrite>,
    pending_cmd: Option<Vec<u8>>,
    fragmentation_threshold: usize,
}

impl SendScheduler {
    pub fn new(limits: &RuntimeLimits) -> Self {
        SendScheduler {
            queue: VecDeque::with_capacity(limits.queue_capacity.min(256)),
            latest_write_notify: None,
            pending_write: None,
            pending_cmd: None,
            fragmentation_threshold: limits.fragmentation_threshold,
        }
    }

    pub fn has_pending_work(&self) -> bool {
        self.pending_write.is_some()
            || self.pending_cmd.is_some()
            || !self.queue.is_empty()
            || self.latest_write_notify.is_some()
    }

    /// Enqueue a message. `WriteNotify` messages are coalesced with the previously
    /// queued one when they are byte-contiguous and the merge stays within the
    /// fragmentation threshold.
    pub fn enqueue(&mut self, msg: Msg) {
        match msg {
            Msg::WriteNotify { address, data } => self.enqueue_write_notify(address, data),
            other => {
                self.flush_latest_notify();
                self.queue.push_back(other);
            }
        }
    }

    fn enqueue_write_notify(&mut self, address: u32, data: Vec<u8>) {
        if let Some((latest_addr, latest_data)) = &mut self.latest_write_notify {
            let contiguous = address == *latest_addr + latest_data.len() as u32;
            let merged_len = latest_data.len() + data.len();
            if contiguous && merged_len <= self.fragmentation_threshold {
                latest_data.extend_from_slice(&data);
                return;
            }
            let old = self.latest_write_notify.take().unwrap();
            self.queue.push_back(Msg::WriteNotify {
                address: old.0,
                data: old.1,
            });
        }
        self.latest_write_notify = Some((address, data));
    }

    fn flush_latest_notify(&mut self) {
        if let Some((address, data)) = self.latest_write_notify.take() {
            self.queue.push_back(Msg::WriteNotify { address, data });
        }
    }

    /// Drive the scheduler one tick: resume any pending fragmented write, flush any
    /// stalled command, then dequeue and dispatch fresh messages until the queue drains
    /// or a new pending state is produced.
    pub fn run(&mut self, transmit: &mut dyn TransmitHandler) -> Result<()> {
        if let Some(pending) = self.pending_write.take() {
            if transmit.get_send_avail() < MIN_BUFFER_THRESHOLD {
                self.pending_write = Some(pending);
                return Ok(());
            }
            self.resume_write(transmit, pending)?;
            if self.pending_write.is_some() {
                return Ok(());
            }
        }

        if let Some(cmd_frame) = self.pending_cmd.take() {
            if transmit.get_send_avail() < cmd_frame.len() {
                self.pending_cmd = Some(cmd_frame);
                return Ok(());
            }
            write_whole(transmit, &cmd_frame)?;
        }

        self.flush_latest_notify();
        while let Some(msg) = self.queue.pop_front() {
            self.dispatch(msg, transmit)?;
            if self.pending_write.is_some() || self.pending_cmd.is_some() {
                break;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, msg: Msg, transmit: &mut dyn TransmitHandler) -> Result<()> {
        match msg {
            Msg::PublishFileInfo(info) => self.dispatch_command(transmit, Command::PublishFile(info)),
            Msg::OpenFile { address } => self.dispatch_command(transmit, Command::OpenFile { address }),
            Msg::CloseFile { address } => self.dispatch_command(transmit, Command::CloseFile { address }),
            Msg::WriteNotify { address, data } => {
                self.resume_write(
                    transmit,
                    PendingWrite {
                        address,
                        data,
                        offset: 0,
                    },
                )
            }
            Msg::DirectWrite { address, data } => self.resume_write(
                transmit,
                PendingWrite {
                    address,
                    data,
                    offset: 0,
                },
            ),
            Msg::SendFile { address, data } => self.resume_write(
                transmit,
                PendingWrite {
                    address,
                    data: data.to_vec(),
                    offset: 0,
                },
            ),
            Msg::Raw(cmd) => self.dispatch_command(transmit, cmd),
        }
    }

    fn dispatch_command(&mut self, transmit: &mut dyn TransmitHandler, cmd: Command) -> Result<()> {
        let frame = build_command_frame(&cmd)?;
        if transmit.get_send_avail() >= frame.len() {
            write_whole(transmit, &frame)?;
        } else {
            self.pending_cmd = Some(frame);
        }
        Ok(())
    }

    fn resume_write(&mut self, transmit: &mut dyn TransmitHandler, pending: PendingWrite) -> Result<()> {
        let PendingWrite {
            address,
            data,
            offset,
        } = pending;
        let avail = transmit.get_send_avail();
        if avail < MIN_BUFFER_THRESHOLD {
            self.pending_write = Some(PendingWrite { address, data, offset });
            return Ok(());
        }

        let remaining = &data[offset..];
        let fragment_base = address + offset as u32;
        let addr_len = AddressHeader::new(fragment_base, false).encoded_len();

        let full_body_len = addr_len + remaining.len();
        if let Some(full_framing_len) = framing::encoded_len(full_body_len) {
            if full_framing_len + full_body_len <= avail {
                let frame = build_data_frame(fragment_base, remaining, false)?;
                write_whole(transmit, &frame)?;
                return Ok(());
            }
        }

        let mut framing_len = 1;
        let mut payload_len = avail.saturating_sub(addr_len + framing_len);
        if addr_len + payload_len > 0x7f {
            framing_len = 4;
            payload_len = avail.saturating_sub(addr_len + framing_len);
        }
        payload_len = payload_len.min(remaining.len());

        if payload_len == 0 {
            self.pending_write = Some(PendingWrite { address, data, offset });
            return Ok(());
        }

        let frame = build_data_frame(fragment_base, &remaining[..payload_len], true)?;
        write_whole(transmit, &frame)?;

        let new_offset = offset + payload_len;
        if new_offset < data.len() {
            self.pending_write = Some(PendingWrite {
                address,
                data,
                offset: new_offset,
            });
        }
        Ok(())
    }
}

fn build_command_frame(cmd: &Command) -> Result<Vec<u8>> {
    let header = AddressHeader::new(RMF_CMD_START_ADDR, false);
    let mut addr_bytes = vec![0u8; header.encoded_len()];
    address::encode(&header, &mut addr_bytes)?;
    let payload = cmd.encode();
    let body_len = addr_bytes.len() + payload.len();
    let mut frame = framing::encode_to_vec(body_len)?;
    frame.extend_from_slice(&addr_bytes);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn build_data_frame(address_value: u32, payload: &[u8], more: bool) -> Result<Vec<u8>> {
    let header = AddressHeader::new(address_value, more);
    let mut addr_bytes = vec![0u8; header.encoded_len()];
    address::encode(&header, &mut addr_bytes)?;
    let body_len = addr_bytes.len() + payload.len();
    let mut frame = framing::encode_to_vec(body_len)?;
    frame.extend_from_slice(&addr_bytes);
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn write_whole(transmit: &mut dyn TransmitHandler, frame: &[u8]) -> Result<()> {
    let buf = transmit.get_send_buffer(frame.len())?;
    buf.copy_from_slice(frame);
    transmit.send(0, frame.len())
}

const _: usize = FILE_INFO_HEADER_LEN;
