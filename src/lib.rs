//! APX file manager and node-instance data-routing core.
//!
//! APX is a publish/subscribe data-exchange middleware for distributed embedded and
//! vehicle-bench systems. Each participant ("node") declares typed signal ports as
//! either *provide* (producer) or *require* (consumer); a central server matches
//! provide ports with require ports of the same signature across connected clients and
//! routes port-value updates bidirectionally. This crate is the hard core of that
//! system: a length-prefixed framing layer, a protocol of addressable "files" through
//! which node definitions and port data are published, opened, and written, and the
//! per-connection and server-wide state machines that drive matching and routing.
//!
//! The text grammar that turns definition source into a port list, the value
//! pack/unpack VM, and socket transport selection are all treated as black-box
//! collaborators (see [`parse`]) — this crate owns the wire protocol and the routing
//! state machines sitting on top of it, not the pieces on either side of it.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![allow(clippy::type_complexity)]

pub mod config;
pub mod error;
pub mod file;
pub mod node;
pub mod parse;
pub mod server;
pub mod transport;
pub mod wire;

pub use config::RuntimeLimits;
pub use error::{Error, Result};
pub use file::{File, FileKind, FileMap, FileNotificationHandler};
pub use node::{
    ByteOffsetMap, DataState, FixedWidthProgramFactory, NodeData, NodeInstance, NodeManager, NodeMode, PortInstance,
    PortValueObserver, ProgramFactory,
};
pub use parse::{DefinitionParser, IdentityProgram, NodeParseTree, PackProgram, ParsedPort, PortDirection, UnpackProgram};
pub use server::{ChangeEntry, ChangeTable, ConnectorRef, ConnectorTable, GlobalLock, PortConnectorList, PortSignatureMap};
pub use transport::{BufferedTransmitHandler, ConnectionBase, FileManager, FileManagerObserver, TransmitHandler};
pub use wire::{AddressHeader, Command, DigestType, FileType, Greeting};
