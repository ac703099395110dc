//! Server-only routing machinery: connector bookkeeping, the port
//! signature map, and the global lock serializing mutations to both.

pub mod connector;
pub mod lock;
pub mod signature;

pub use connector::{ChangeEntry, ChangeTable, ConnectorRef, ConnectorTable, PortConnectorList};
pub use lock::GlobalLock;
pub use signature::PortSignatureMap;
