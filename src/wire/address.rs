//! Address header codec.
//!
//! Every non-framing message begins with an address header. Addresses below
//! `RMF_DATA_HIGH_MIN_ADDR` use a 2-byte low form; everything else, including the fixed
//! command address, uses a 4-byte high form. Bit layout (big-endian over the header's
//! bytes, MSB first):
//!
//! ```text
//! low form  (16 bits): [0][more][addr: 14 bits]
//! high form (32 bits): [1][more][addr: 30 bits]
//! ```

use crate::config::RMF_DATA_HIGH_MIN_ADDR;
use crate::error::{Error, Result};

const LOW_FORM_TAG: u16 = 0x8000;
const LOW_FORM_MORE: u16 = 0x4000;
const LOW_FORM_ADDR_MASK: u16 = 0x3fff;

const HIGH_FORM_TAG: u32 = 0x8000_0000;
const HIGH_FORM_MORE: u32 = 0x4000_0000;
const HIGH_FORM_ADDR_MASK: u32 = 0x3fff_ffff;

/// A decoded address header: the address itself and whether a continuation fragment
/// follows at `address + payload_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressHeader {
    pub address: u32,
    pub more: bool,
}

impl AddressHeader {
    pub fn new(address: u32, more: bool) -> Self {
        Self { address, more }
    }

    /// Whether this address must use the 4-byte high form on the wire.
    pub fn is_high_form(&self) -> bool {
        self.address >= RMF_DATA_HIGH_MIN_ADDR
    }

    /// Number of bytes this header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        if self.is_high_form() {
            4
        } else {
            2
        }
    }
}

/// Encode an address header into `out`. Returns the number of bytes written, or an
/// error if the address does not fit the chosen form or `out` is too small.
pub fn encode(header: &AddressHeader, out: &mut [u8]) -> Result<usize> {
    if header.is_high_form() {
        if header.address > HIGH_FORM_ADDR_MASK {
            return Err(Error::InvalidArgument(format!(
                "address {:#x} exceeds the 30-bit high-form range",
                header.address
            )));
        }
        if out.len() < 4 {
            return Err(Error::InvalidArgument(
                "buffer too small for high-form address header".into(),
            ));
        }
        let mut raw = HIGH_FORM_TAG | header.address;
        if header.more {
            raw |= HIGH_FORM_MORE;
        }
        out[..4].copy_from_slice(&raw.to_be_bytes());
        Ok(4)
    } else {
        if out.len() < 2 {
            return Err(Error::InvalidArgument(
                "buffer too small for low-form address header".into(),
            ));
        }
        let mut raw = (header.address as u16) & LOW_FORM_ADDR_MASK;
        if header.more {
            raw |= LOW_FORM_MORE;
        }
        // Low form tag bit is implicitly 0.
        debug_assert_eq!(raw & LOW_FORM_TAG, 0);
        out[..2].copy_from_slice(&raw.to_be_bytes());
        Ok(2)
    }
}

/// Decode an address header from the start of `data`. Returns the header and the
/// number of bytes consumed.
pub fn decode(data: &[u8]) -> Result<(AddressHeader, usize)> {
    let &first = data
        .first()
        .ok_or_else(|| Error::ParseError("empty buffer, expected address header".into()))?;
    if first & 0x80 == 0 {
        if data.len() < 2 {
            return Err(Error::ParseError(
                "truncated low-form address header".into(),
            ));
        }
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(&data[..2]);
        let raw = u16::from_be_bytes(bytes);
        let more = raw & LOW_FORM_MORE != 0;
        let address = (raw & LOW_FORM_ADDR_MASK) as u32;
        Ok((AddressHeader::new(address, more), 2))
    } else {
        if data.len() < 4 {
            return Err(Error::ParseError(
                "truncated high-form address header".into(),
            ));
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&data[..4]);
        let raw = u32::from_be_bytes(bytes);
        let more = raw & HIGH_FORM_MORE != 0;
        let address = raw & HIGH_FORM_ADDR_MASK;
        Ok((AddressHeader::new(address, more), 4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_form_round_trips() {
        for addr in [0u32, 1, 0x1234, RMF_DATA_HIGH_MIN_ADDR - 1] {
            for more in [false, true] {
                let h = AddressHeader::new(addr, more);
                assert!(!h.is_high_form());
                let mut buf = [0u8; 4];
                let n = encode(&h, &mut buf).unwrap();
                assert_eq!(n, 2);
                let (decoded, consumed) = decode(&buf[..n]).unwrap();
                assert_eq!(consumed, 2);
                assert_eq!(decoded, h);
            }
        }
    }

    #[test]
    fn high_form_round_trips() {
        for addr in [
            RMF_DATA_HIGH_MIN_ADDR,
            0x3FFF_FC00,
            0x3fff_ffff,
        ] {
            for more in [false, true] {
                let h = AddressHeader::new(addr, more);
                assert!(h.is_high_form());
                let mut buf = [0u8; 4];
                let n = encode(&h, &mut buf).unwrap();
                assert_eq!(n, 4);
                let (decoded, consumed) = decode(&buf[..n]).unwrap();
                assert_eq!(consumed, 4);
                assert_eq!(decoded, h);
            }
        }
    }

    #[test]
    fn cmd_start_addr_uses_high_form() {
        // The 30-bit address field carries the address verbatim (no truncation): this
        // is required for byte-precise file addressing elsewhere (e.g. port-data
        // offsets within a 0x400-byte region), so the tag/more bits occupy only the
        // top two bits of the 32-bit word and the address is OR'd in unshifted.
        let h = AddressHeader::new(crate::config::RMF_CMD_START_ADDR, false);
        assert!(h.is_high_form());
        let mut buf = [0u8; 4];
        let n = encode(&h, &mut buf).unwrap();
        assert_eq!(buf[..n], [0xBF, 0xFF, 0xFC, 0x00]);
        let (decoded, consumed) = decode(&buf[..n]).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(decoded.address, crate::config::RMF_CMD_START_ADDR);
        assert!(!decoded.more);
    }

    #[test]
    fn rejects_address_too_large_for_high_form() {
        let h = AddressHeader::new(0x4000_0000, false);
        let mut buf = [0u8; 4];
        assert!(encode(&h, &mut buf).is_err());
    }
}
