//! Ordered address-range → [`File`] map with region-aware address auto-assignment.

use std::sync::Arc;

use crate::config::{
    DEFINITION_BOUNDARY, DEFINITION_REGION, PORT_DATA_BOUNDARY, PORT_DATA_REGION, USER_BOUNDARY,
    USER_REGION,
};
use crate::error::{Error, Result};
use crate::wire::{DigestType, FileType};

use super::record::{File, FileKind};

fn region_for(kind: FileKind) -> ((u32, u32), u32) {
    match kind {
        FileKind::PortData => (PORT_DATA_REGION, PORT_DATA_BOUNDARY),
        FileKind::Definition => (DEFINITION_REGION, DEFINITION_BOUNDARY),
        FileKind::User => (USER_REGION, USER_BOUNDARY),
    }
}

fn ceil_to_boundary(value: u32, boundary: u32) -> u32 {
    if boundary == 0 {
        return value;
    }
    let rem = value % boundary;
    if rem == 0 {
        value
    } else {
        value + (boundary - rem)
    }
}

/// An ordered collection of [`File`]s, sorted ascending by address, with disjoint
/// `[address, address + size)` ranges. Owned exclusively by
/// a single file manager; never shared directly.
#[derive(Default)]
pub struct FileMap {
    files: Vec<Arc<File>>,
    last_hit: Option<usize>,
}

impl FileMap {
    pub fn new() -> Self {
        FileMap {
            files: Vec::new(),
            last_hit: None,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<File>> {
        self.files.iter()
    }

    /// Insert a file at its own already-assigned address, maintaining sort order.
    /// Fails if it overlaps an existing file (the map's disjointness invariant).
    pub fn insert(&mut self, file: Arc<File>) -> Result<()> {
        let pos = self
            .files
            .partition_point(|f| f.address < file.address);
        if let Some(prev) = pos.checked_sub(1).and_then(|i| self.files.get(i)) {
            if prev.contains(file.address) {
                return Err(Error::FileCreate {
                    name: String::from_utf8_lossy(&file.name).into_owned(),
                    reason: "overlaps preceding file",
                });
            }
        }
        if let Some(next) = self.files.get(pos) {
            if file.contains(next.address) {
                return Err(Error::FileCreate {
                    name: String::from_utf8_lossy(&file.name).into_owned(),
                    reason: "overlaps following file",
                });
            }
        }
        self.files.insert(pos, file);
        self.last_hit = None;
        Ok(())
    }

    pub fn remove(&mut self, address: u32) -> Option<Arc<File>> {
        let pos = self.files.iter().position(|f| f.address == address)?;
        self.last_hit = None;
        Some(self.files.remove(pos))
    }

    pub fn find_by_name(&self, name: &[u8]) -> Option<Arc<File>> {
        self.files.iter().find(|f| f.name == name).cloned()
    }

    /// Find the file whose range contains `addr`, checking the one-slot cache first.
    pub fn find_by_address(&mut self, addr: u32) -> Option<Arc<File>> {
        if let Some(idx) = self.last_hit {
            if let Some(f) = self.files.get(idx) {
                if f.contains(addr) {
                    return Some(f.clone());
                }
            }
        }
        let idx = self.files.iter().position(|f| f.contains(addr))?;
        self.last_hit = Some(idx);
        Some(self.files[idx].clone())
    }

    /// Assign the next free, boundary-aligned address in the region for `kind` and
    /// insert a new file there, sized `size` bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn auto_insert(
        &mut self,
        kind: FileKind,
        name: Vec<u8>,
        size: u32,
        file_type: FileType,
        digest_type: DigestType,
        digest: [u8; 32],
    ) -> Result<Arc<File>> {
        let ((region_start, region_end), boundary) = region_for(kind);
        let mut candidate = region_start;
        for file in self.files.iter().filter(|f| {
            f.address >= region_start && f.address < region_end
        }) {
            let aligned = ceil_to_boundary(candidate, boundary);
            if aligned.checked_add(size).map(|end| end <= file.address) == Some(true) {
                candidate = aligned;
                break;
            }
            candidate = ceil_to_boundary(file.address + file.size, boundary);
        }
        let address = ceil_to_boundary(candidate, boundary);
        let end = address
            .checked_add(size)
            .ok_or_else(|| Error::FileCreate {
                name: String::from_utf8_lossy(&name).into_owned(),
                reason: "size overflows address space",
            })?;
        if end > region_end {
            return Err(Error::FileCreate {
                name: String::from_utf8_lossy(&name).into_owned(),
                reason: "region exhausted",
            });
        }
        if self.find_by_name(&name).is_some() {
            return Err(Error::FileCreate {
                name: String::from_utf8_lossy(&name).into_owned(),
                reason: "duplicate name",
            });
        }
        let file = Arc::new(File::new(
            address, name, size, file_type, digest_type, digest, kind,
        ));
        self.insert(file.clone())?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(addr: u32, size: u32, name: &[u8]) -> Arc<File> {
        Arc::new(File::new(
            addr,
            name.to_vec(),
            size,
            FileType::Fixed,
            DigestType::None,
            [0u8; 32],
            FileKind::PortData,
        ))
    }

    #[test]
    fn insert_rejects_overlap() {
        let mut map = FileMap::new();
        map.insert(info(0, 16, b"a")).unwrap();
        assert!(map.insert(info(8, 16, b"b")).is_err());
        map.insert(info(16, 16, b"c")).unwrap();
    }

    #[test]
    fn find_by_address_locates_containing_file() {
        let mut map = FileMap::new();
        map.insert(info(0, 16, b"a")).unwrap();
        map.insert(info(0x400, 16, b"b")).unwrap();
        assert_eq!(map.find_by_address(8).unwrap().name, b"a");
        assert_eq!(map.find_by_address(0x405).unwrap().name, b"b");
        assert!(map.find_by_address(0x20).is_none());
    }

    #[test]
    fn auto_insert_aligns_to_region_boundary() {
        let mut map = FileMap::new();
        let f1 = map
            .auto_insert(
                FileKind::PortData,
                b"A".to_vec(),
                16,
                FileType::Fixed,
                DigestType::None,
                [0u8; 32],
            )
            .unwrap();
        assert_eq!(f1.address, 0);
        let f2 = map
            .auto_insert(
                FileKind::PortData,
                b"B".to_vec(),
                16,
                FileType::Fixed,
                DigestType::None,
                [0u8; 32],
            )
            .unwrap();
        assert_eq!(f2.address, PORT_DATA_BOUNDARY);
    }

    #[test]
    fn auto_insert_rejects_duplicate_name() {
        let mut map = FileMap::new();
        map.auto_insert(
            FileKind::PortData,
            b"A".to_vec(),
            16,
            FileType::Fixed,
            DigestType::None,
            [0u8; 32],
        )
        .unwrap();
        assert!(map
            .auto_insert(
                FileKind::PortData,
                b"A".to_vec(),
                16,
                FileType::Fixed,
                DigestType::None,
                [0u8; 32],
            )
            .is_err());
    }

    #[test]
    fn auto_insert_fails_when_region_exhausted() {
        let mut map = FileMap::new();
        let huge = PORT_DATA_REGION.1 - PORT_DATA_REGION.0 + 1;
        assert!(map
            .auto_insert(
                FileKind::PortData,
                b"Huge".to_vec(),
                huge,
                FileType::Fixed,
                DigestType::None,
                [0u8; 32],
            )
            .is_err());
    }
}
