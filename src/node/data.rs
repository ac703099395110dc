//! Node data: the three independently-locked byte buffers backing a node instance's
//! definition text, provide-port values, and require-port values.

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// One offset-bounded, lock-protected byte buffer.
#[derive(Default)]
struct Buffer(RwLock<Vec<u8>>);

impl Buffer {
    fn new(initial: Vec<u8>) -> Self {
        Buffer(RwLock::new(initial))
    }

    fn len(&self) -> usize {
        self.0.read().len()
    }

    fn read_range(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let buf = self.0.read();
        buf.get(offset..offset + len)
            .map(<[u8]>::to_vec)
            .ok_or(Error::ValueLengthError {
                offset,
                len,
                bound: buf.len(),
            })
    }

    fn write_range(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut buf = self.0.write();
        let bound = buf.len();
        let dest = buf
            .get_mut(offset..offset + data.len())
            .ok_or(Error::ValueLengthError {
                offset,
                len: data.len(),
                bound,
            })?;
        dest.copy_from_slice(data);
        Ok(())
    }

    fn snapshot(&self) -> Vec<u8> {
        self.0.read().clone()
    }
}

/// The byte storage owned by one node instance: its raw definition text,
/// its provide-port value buffer, and its require-port value buffer. Each buffer is
/// independently locked so that, e.g., a provide-port write and a require-port write can
/// proceed without contending on each other.
#[derive(Default)]
pub struct NodeData {
    definition: Buffer,
    provide: Buffer,
    require: Buffer,
}

impl NodeData {
    pub fn new(definition: Vec<u8>, provide_len: usize, require_len: usize) -> Self {
        NodeData {
            definition: Buffer::new(definition),
            provide: Buffer::new(vec![0u8; provide_len]),
            require: Buffer::new(vec![0u8; require_len]),
        }
    }

    pub fn definition_len(&self) -> usize {
        self.definition.len()
    }
    pub fn provide_len(&self) -> usize {
        self.provide.len()
    }
    pub fn require_len(&self) -> usize {
        self.require.len()
    }

    pub fn read_definition(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.definition.read_range(offset, len)
    }
    pub fn read_provide(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.provide.read_range(offset, len)
    }
    pub fn read_require(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.require.read_range(offset, len)
    }

    pub fn write_provide(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.provide.write_range(offset, data)
    }
    pub fn write_require(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.require.write_range(offset, data)
    }

    /// Clone the entire provide-port buffer into a fresh, independently-owned block:
    /// used to snapshot a provide port's current value when a subscriber first connects.
    pub fn take_provide_port_data_snapshot(&self) -> Vec<u8> {
        self.provide.snapshot()
    }

    pub fn take_require_port_data_snapshot(&self) -> Vec<u8> {
        self.require.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let data = NodeData::new(vec![], 4, 0);
        data.write_provide(0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(data.read_provide(0, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn out_of_bounds_access_is_a_value_length_error() {
        let data = NodeData::new(vec![], 4, 0);
        assert!(data.write_provide(2, &[1, 2, 3]).is_err());
        assert!(data.read_provide(2, 10).is_err());
    }

    #[test]
    fn snapshot_is_independent_of_later_writes() {
        let data = NodeData::new(vec![], 2, 0);
        data.write_provide(0, &[9, 9]).unwrap();
        let snap = data.take_provide_port_data_snapshot();
        data.write_provide(0, &[1, 1]).unwrap();
        assert_eq!(snap, vec![9, 9]);
        assert_eq!(data.read_provide(0, 2).unwrap(), vec![1, 1]);
    }
}
