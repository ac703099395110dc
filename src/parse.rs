//! External collaborator interfaces:
//! the APX text grammar parser and the pack/unpack value-encoding VM. Both are treated
//! as black boxes here — the routing core only needs the shapes they produce, not how
//! they produce them.

/// One port declared by a parsed node definition.
#[derive(Debug, Clone)]
pub struct ParsedPort {
    pub name: String,
    pub direction: PortDirection,
    /// Opaque signature string used for server-side port matching.
    pub signature: String,
    /// Initial value bytes, if the definition specified one (empty otherwise).
    pub init_value: Vec<u8>,
    /// Queue length: `0` for a scalar port, `>0` for a queued port.
    pub queue_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Provide,
    Require,
}

/// The output of parsing an APX definition text: an ordered list of ports plus the
/// original definition bytes (stored verbatim as the node's definition file content).
#[derive(Debug, Clone)]
pub struct NodeParseTree {
    pub node_name: String,
    pub ports: Vec<ParsedPort>,
}

/// Parses APX definition text into a port list. The grammar itself — and therefore any
/// concrete implementation of this trait — is out of scope for the routing core.
pub trait DefinitionParser: Send + Sync {
    fn parse(&self, text: &[u8]) -> crate::error::Result<NodeParseTree>;
}

/// A compiled pack/unpack program for one port's value type. The VM that executes these
/// programs is out of scope; the routing core only needs the sizes and the entry points
/// below to move bytes between wire format and a port's slot in `NodeData`.
pub trait PackProgram: Send + Sync {
    /// Size in bytes of one value instance on the wire.
    fn encoded_size(&self) -> usize;
    /// Encode `value` into `out` (which is exactly `encoded_size()` bytes).
    fn pack(&self, value: &[u8], out: &mut [u8]) -> crate::error::Result<()>;
}

/// The decode counterpart of [`PackProgram`], used by require ports.
pub trait UnpackProgram: Send + Sync {
    fn encoded_size(&self) -> usize;
    fn unpack(&self, wire: &[u8], out: &mut [u8]) -> crate::error::Result<()>;
}

/// A trivial, size-only pack/unpack program used where the wire representation and the
/// in-memory representation coincide byte-for-byte (the common case for fixed-size
/// scalar ports). Useful as a test double and as the default for ports whose type the
/// parser reports as an opaque fixed-width blob.
pub struct IdentityProgram {
    size: usize,
}

impl IdentityProgram {
    pub fn new(size: usize) -> Self {
        IdentityProgram { size }
    }
}

impl PackProgram for IdentityProgram {
    fn encoded_size(&self) -> usize {
        self.size
    }
    fn pack(&self, value: &[u8], out: &mut [u8]) -> crate::error::Result<()> {
        if value.len() != self.size || out.len() != self.size {
            return Err(crate::error::Error::ValueLengthError {
                offset: 0,
                len: value.len(),
                bound: self.size,
            });
        }
        out.copy_from_slice(value);
        Ok(())
    }
}

impl UnpackProgram for IdentityProgram {
    fn encoded_size(&self) -> usize {
        self.size
    }
    fn unpack(&self, wire: &[u8], out: &mut [u8]) -> crate::error::Result<()> {
        if wire.len() != self.size || out.len() != self.size {
            return Err(crate::error::Error::ValueLengthError {
                offset: 0,
                len: wire.len(),
                bound: self.size,
            });
        }
        out.copy_from_slice(wire);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_program_round_trips() {
        let prog = IdentityProgram::new(2);
        let mut wire = [0u8; 2];
        prog.pack(&[0x12, 0x34], &mut wire).unwrap();
        assert_eq!(wire, [0x12, 0x34]);
        let mut value = [0u8; 2];
        prog.unpack(&wire, &mut value).unwrap();
        assert_eq!(value, [0x12, 0x34]);
    }

    #[test]
    fn identity_program_rejects_size_mismatch() {
        let prog = IdentityProgram::new(2);
        let mut wire = [0u8; 3];
        assert!(prog.pack(&[0x12, 0x34], &mut wire).is_err());
    }
}
