//! Wire-level codecs: framing, address headers, in-band commands, and the
//! connection-setup greeting. Everything here is pure encode/decode — no I/O, no state
//! beyond what is passed in, keeping wire format separate from session behavior.

pub mod address;
pub(crate) mod argument;
pub mod command;
pub mod framing;
pub mod greeting;

pub use address::AddressHeader;
pub use command::{Command, DigestType, FileInfo, FileType};
pub use greeting::Greeting;
