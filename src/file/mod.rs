//! Addressable files: per-file state and the ordered address-range map that owns them.

pub mod map;
pub mod record;

pub use map::FileMap;
pub use record::{File, FileKind, FileNotificationHandler};
