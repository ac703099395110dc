//! Typed argument decomposition for command payloads.
//!
//! Decodes APX command bodies incrementally: fixed-size fields are fetched as
//! `zerocopy`-typed references, and the trailing null-terminated file name is fetched
//! as a byte string.

use zerocopy::error::ConvertError;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// An iterator that fetches typed arguments from a byte slice, consuming it as it goes.
pub(crate) struct ArgumentIterator<'a> {
    data: &'a [u8],
}

impl<'a> ArgumentIterator<'a> {
    pub(crate) fn new(data: &'a [u8]) -> ArgumentIterator<'a> {
        ArgumentIterator { data }
    }

    /// Returns the size of the remaining data.
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fetch a slice of all remaining bytes.
    pub(crate) fn fetch_all(&mut self) -> &'a [u8] {
        let bytes = self.data;
        self.data = &[];
        bytes
    }

    /// Fetch a typed argument. Returns `None` if there's not enough data left.
    pub(crate) fn fetch<T: FromBytes + KnownLayout + Immutable>(&mut self) -> Option<&'a T> {
        match zerocopy::Ref::<_, T>::from_prefix(self.data) {
            Err(ConvertError::Alignment(_)) => {
                panic!("command payload data unaligned");
            }
            Err(ConvertError::Size(_)) => None,
            Err(ConvertError::Validity(infallible)) => match infallible {},
            Ok((x, rest)) => {
                self.data = rest;
                Some(zerocopy::Ref::<&[u8], T>::into_ref(x))
            }
        }
    }

    /// Fetch a fixed number of raw bytes. Returns `None` if there's not enough data left.
    pub(crate) fn fetch_bytes(&mut self, count: usize) -> Option<&'a [u8]> {
        if self.data.len() < count {
            return None;
        }
        let (out, rest) = self.data.split_at(count);
        self.data = rest;
        Some(out)
    }

    /// Fetch a (zero-terminated) name, as raw bytes excluding the terminator. Returns
    /// `None` if there's not enough data left or no zero terminator could be found.
    pub(crate) fn fetch_name(&mut self) -> Option<&'a [u8]> {
        let len = memchr::memchr(0, self.data)?;
        let (out, rest) = self.data.split_at(len);
        self.data = &rest[1..];
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::Immutable;

    const TEST_DATA: [u8; 10] = [0x66, 0x6f, 0x6f, 0x00, 0x62, 0x61, 0x72, 0x00, 0x62, 0x61];

    #[repr(C)]
    #[derive(FromBytes, KnownLayout, Immutable)]
    struct TestArgument {
        p1: u8,
        p2: u8,
        p3: u16,
    }

    #[test]
    fn all_data() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        it.fetch_name().unwrap();
        let arg = it.fetch_all();
        assert_eq!(arg, [0x62, 0x61, 0x72, 0x00, 0x62, 0x61]);
    }

    #[test]
    fn generic_argument() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let arg: &TestArgument = it.fetch().unwrap();
        assert_eq!(arg.p1, 0x66);
        assert_eq!(arg.p2, 0x6f);
        let arg: &TestArgument = it.fetch().unwrap();
        assert_eq!(arg.p1, 0x62);
        assert_eq!(arg.p2, 0x61);
        assert_eq!(it.len(), 2);
    }

    #[test]
    fn name_argument() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let arg = it.fetch_name().unwrap();
        assert_eq!(arg, b"foo");
        let arg = it.fetch_name().unwrap();
        assert_eq!(arg, b"bar");
        assert_eq!(it.len(), 2);
    }

    #[test]
    fn out_of_data() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        it.fetch::<u64>().unwrap();
        let arg: Option<&TestArgument> = it.fetch();
        assert!(arg.is_none());
        assert_eq!(it.len(), 2);
        let arg = it.fetch_name();
        assert!(arg.is_none());
        assert_eq!(it.len(), 2);
    }
}
