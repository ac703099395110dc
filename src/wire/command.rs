//! In-band control command codec.
//!
//! A command body is `<cmd_type:u32 LE><payload>`. Note this differs from the framing
//! and address codecs, which are big-endian: the command type field is little-endian, as
//! specified.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::wire::argument::ArgumentIterator;

/// Size in bytes of the fixed "FileInfo header" portion of a `PublishFile` payload.
pub const FILE_INFO_HEADER_LEN: usize = 48;

/// Digest byte-field width on the wire (SHA-256 sized; SHA-1 only uses the first 20).
pub const DIGEST_LEN: usize = 32;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawFileInfoHeader {
    address: u32,
    size: u32,
    file_type: u16,
    digest_type: u16,
    digest: [u8; DIGEST_LEN],
    reserved: u32,
}

const _: () = assert!(std::mem::size_of::<RawFileInfoHeader>() == FILE_INFO_HEADER_LEN);

/// File type tag carried in a `PublishFile` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[repr(u16)]
pub enum FileType {
    Fixed = 0,
    Dynamic8 = 1,
    Dynamic16 = 2,
    Dynamic32 = 3,
    Device = 4,
    Stream = 5,
}

/// Digest algorithm tag carried in a `PublishFile` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[repr(u16)]
pub enum DigestType {
    None = 0,
    Sha1 = 1,
    Sha256 = 2,
}

/// Everything carried by a `PublishFile` command: the fixed 48-byte header plus the
/// null-terminated name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub address: u32,
    pub size: u32,
    pub file_type: FileType,
    pub digest_type: DigestType,
    pub digest: [u8; DIGEST_LEN],
    pub name: Vec<u8>,
}

impl PartialEq for FileType {
    fn eq(&self, other: &Self) -> bool {
        u16::from(*self) == u16::from(*other)
    }
}
impl Eq for FileType {}
impl PartialEq for DigestType {
    fn eq(&self, other: &Self) -> bool {
        u16::from(*self) == u16::from(*other)
    }
}
impl Eq for DigestType {}

/// A decoded in-band control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PublishFile(FileInfo),
    OpenFile { address: u32 },
    CloseFile { address: u32 },
    Ack,
    Error { code: u32, data: Vec<u8> },
    HeartbeatRequest,
    HeartbeatResponse,
    PingRequest,
    PingResponse,
}

const CMD_PUBLISH_FILE: u32 = 1;
const CMD_OPEN_FILE: u32 = 3;
const CMD_CLOSE_FILE: u32 = 4;
const CMD_ACK: u32 = 5;
const CMD_ERROR: u32 = 6;
const CMD_HEARTBEAT_REQUEST: u32 = 7;
const CMD_HEARTBEAT_RESPONSE: u32 = 8;
const CMD_PING_REQUEST: u32 = 9;
const CMD_PING_RESPONSE: u32 = 10;

impl Command {
    /// Serialize this command into a fresh byte vector (`<cmd_type LE><payload>`).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::PublishFile(info) => {
                let mut out = Vec::with_capacity(4 + FILE_INFO_HEADER_LEN + info.name.len() + 1);
                out.extend_from_slice(&CMD_PUBLISH_FILE.to_le_bytes());
                let mut digest = [0u8; DIGEST_LEN];
                digest.copy_from_slice(&info.digest);
                let header = RawFileInfoHeader {
                    address: info.address,
                    size: info.size,
                    file_type: info.file_type.into(),
                    digest_type: info.digest_type.into(),
                    digest,
                    reserved: 0,
                };
                out.extend_from_slice(header.as_bytes());
                out.extend_from_slice(&info.name);
                out.push(0);
                out
            }
            Command::OpenFile { address } => {
                let mut out = Vec::with_capacity(8);
                out.extend_from_slice(&CMD_OPEN_FILE.to_le_bytes());
                out.extend_from_slice(&address.to_le_bytes());
                out
            }
            Command::CloseFile { address } => {
                let mut out = Vec::with_capacity(8);
                out.extend_from_slice(&CMD_CLOSE_FILE.to_le_bytes());
                out.extend_from_slice(&address.to_le_bytes());
                out
            }
            Command::Ack => CMD_ACK.to_le_bytes().to_vec(),
            Command::Error { code, data } => {
                let mut out = Vec::with_capacity(8 + data.len());
                out.extend_from_slice(&CMD_ERROR.to_le_bytes());
                out.extend_from_slice(&code.to_le_bytes());
                out.extend_from_slice(data);
                out
            }
            Command::HeartbeatRequest => CMD_HEARTBEAT_REQUEST.to_le_bytes().to_vec(),
            Command::HeartbeatResponse => CMD_HEARTBEAT_RESPONSE.to_le_bytes().to_vec(),
            Command::PingRequest => CMD_PING_REQUEST.to_le_bytes().to_vec(),
            Command::PingResponse => CMD_PING_RESPONSE.to_le_bytes().to_vec(),
        }
    }

    /// Parse a command body (`<cmd_type LE><payload>`).
    pub fn decode(body: &[u8]) -> Result<Command> {
        if body.len() < 4 {
            return Err(Error::ParseError("command body shorter than cmd_type field".into()));
        }
        let mut cmd_type_bytes = [0u8; 4];
        cmd_type_bytes.copy_from_slice(&body[..4]);
        let cmd_type = u32::from_le_bytes(cmd_type_bytes);
        let mut it = ArgumentIterator::new(&body[4..]);

        match cmd_type {
            CMD_PUBLISH_FILE => {
                let header: &RawFileInfoHeader = it
                    .fetch()
                    .ok_or_else(|| Error::ParseError("truncated FileInfo header".into()))?;
                let file_type = FileType::try_from(header.file_type).map_err(|_| {
                    Error::ParseError(format!("unknown file_type tag {}", header.file_type))
                })?;
                let digest_type = DigestType::try_from(header.digest_type).map_err(|_| {
                    Error::ParseError(format!("unknown digest_type tag {}", header.digest_type))
                })?;
                let name = it
                    .fetch_name()
                    .ok_or_else(|| Error::ParseError("PublishFile missing null-terminated name".into()))?
                    .to_vec();
                Ok(Command::PublishFile(FileInfo {
                    address: header.address,
                    size: header.size,
                    file_type,
                    digest_type,
                    digest: header.digest,
                    name,
                }))
            }
            CMD_OPEN_FILE => {
                let address: &u32 = it
                    .fetch()
                    .ok_or_else(|| Error::ParseError("OpenFile missing address".into()))?;
                Ok(Command::OpenFile { address: *address })
            }
            CMD_CLOSE_FILE => {
                let address: &u32 = it
                    .fetch()
                    .ok_or_else(|| Error::ParseError("CloseFile missing address".into()))?;
                Ok(Command::CloseFile { address: *address })
            }
            CMD_ACK => Ok(Command::Ack),
            CMD_ERROR => {
                let code: &u32 = it
                    .fetch()
                    .ok_or_else(|| Error::ParseError("Error command missing error_code".into()))?;
                let data = it.fetch_all().to_vec();
                Ok(Command::Error { code: *code, data })
            }
            CMD_HEARTBEAT_REQUEST => Ok(Command::HeartbeatRequest),
            CMD_HEARTBEAT_RESPONSE => Ok(Command::HeartbeatResponse),
            CMD_PING_REQUEST => Ok(Command::PingRequest),
            CMD_PING_RESPONSE => Ok(Command::PingResponse),
            other => Err(Error::Unsupported(format!("unknown command type {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file_info() -> FileInfo {
        FileInfo {
            address: 0x1000,
            size: 64,
            file_type: FileType::Fixed,
            digest_type: DigestType::None,
            digest: [0u8; DIGEST_LEN],
            name: b"VehicleSpeed.apx".to_vec(),
        }
    }

    #[test]
    fn publish_file_round_trips() {
        let info = sample_file_info();
        let cmd = Command::PublishFile(info.clone());
        let encoded = cmd.encode();
        let decoded = Command::decode(&encoded).unwrap();
        match decoded {
            Command::PublishFile(got) => assert_eq!(got, info),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn open_close_file_round_trip() {
        let open = Command::OpenFile { address: 0x400 };
        assert_eq!(Command::decode(&open.encode()).unwrap(), open);
        let close = Command::CloseFile { address: 0x400 };
        assert_eq!(Command::decode(&close.encode()).unwrap(), close);
    }

    #[test]
    fn ack_and_heartbeats_round_trip() {
        for cmd in [
            Command::Ack,
            Command::HeartbeatRequest,
            Command::HeartbeatResponse,
            Command::PingRequest,
            Command::PingResponse,
        ] {
            assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
        }
    }

    #[test]
    fn error_command_round_trips_with_payload() {
        let cmd = Command::Error {
            code: 7,
            data: vec![1, 2, 3],
        };
        assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn ack_is_exactly_4_bytes() {
        assert_eq!(Command::Ack.encode(), vec![5, 0, 0, 0]);
    }

    #[test]
    fn unknown_command_type_is_rejected() {
        let body = 0xffff_ffffu32.to_le_bytes();
        assert!(Command::decode(&body).is_err());
    }

    #[test]
    fn publish_file_header_is_48_bytes() {
        let info = sample_file_info();
        let cmd = Command::PublishFile(info.clone());
        let encoded = cmd.encode();
        // 4 (cmd_type) + 48 (header) + name + NUL
        assert_eq!(encoded.len(), 4 + FILE_INFO_HEADER_LEN + info.name.len() + 1);
    }
}
