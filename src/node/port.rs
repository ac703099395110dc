//! Port instances and the byte-offset → port-id lookup table.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::parse::{PackProgram, PortDirection, UnpackProgram};

/// One port declared on a node.
pub struct PortInstance {
    pub direction: PortDirection,
    pub port_id: u32,
    pub name: String,
    pub signature: String,
    pub data_size: usize,
    pub data_offset: usize,
    pub queue_length: u32,
    pub pack_program: Option<Arc<dyn PackProgram>>,
    pub unpack_program: Option<Arc<dyn UnpackProgram>>,
}

impl PortInstance {
    pub fn is_queued(&self) -> bool {
        self.queue_length > 0
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.data_offset..self.data_offset + self.data_size
    }
}

/// A flat `byte offset → port id` table, built once after a node's ports are sized and
/// laid out. `len()` always equals the node's total port-data size.
pub struct ByteOffsetMap {
    table: Vec<u32>,
}

impl ByteOffsetMap {
    /// Build the table by walking `ports` in offset order; each port's data range is
    /// stamped with its `port_id`.
    pub fn build(ports: &[PortInstance]) -> Result<Self> {
        let total = ports.iter().map(|p| p.data_offset + p.data_size).max().unwrap_or(0);
        let mut table = vec![u32::MAX; total];
        for port in ports {
            let range = port.range();
            if range.end > table.len() {
                return Err(Error::Internal(format!(
                    "port {} range {:?} exceeds port-data size {}",
                    port.name,
                    range,
                    table.len()
                )));
            }
            for slot in &mut table[range] {
                *slot = port.port_id;
            }
        }
        Ok(ByteOffsetMap { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The port owning byte `offset`, if any (every offset in `0..len()` must resolve —
    /// an unmapped slot indicates a node-building defect, not a runtime condition).
    pub fn port_id_at(&self, offset: usize) -> Option<u32> {
        self.table.get(offset).copied().filter(|&id| id != u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(id: u32, offset: usize, size: usize) -> PortInstance {
        PortInstance {
            direction: PortDirection::Provide,
            port_id: id,
            name: format!("p{id}"),
            signature: "S".into(),
            data_size: size,
            data_offset: offset,
            queue_length: 0,
            pack_program: None,
            unpack_program: None,
        }
    }

    #[test]
    fn map_covers_every_offset_in_range() {
        let ports = vec![port(0, 0, 2), port(1, 2, 4)];
        let map = ByteOffsetMap::build(&ports).unwrap();
        assert_eq!(map.len(), 6);
        assert_eq!(map.port_id_at(0), Some(0));
        assert_eq!(map.port_id_at(1), Some(0));
        assert_eq!(map.port_id_at(2), Some(1));
        assert_eq!(map.port_id_at(5), Some(1));
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let ports = vec![port(0, 0, 2), port(1, 4, 4)];
        // total computed from max(offset+size) = 8, so 4..8 is in range but offset 2..4
        // is left unmapped — still a valid (if gappy) map.
        let map = ByteOffsetMap::build(&ports).unwrap();
        assert_eq!(map.port_id_at(3), None);
    }
}
