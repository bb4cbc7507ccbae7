use crate::{
    entry::Entry,
    path::{hash_path, rebase_to_mount, split_path_child},
    tree::DirectoryTree,
    Hash, Info, Version,
};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::collections::{BTreeMap, HashMap};
use std::io;

/// Compact reference to where an entry record lives: a byte offset into the
/// encoded-entries buffer, an index into the overflow list of entries that
/// would not encode, or nothing at all for a delete record.
///
/// On the wire this is an `i64`: non-negative values are encoded offsets,
/// `i64::MIN` marks a delete record, and the remaining negative values map a
/// list index `i` to `-(i + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryLocation {
    Encoded(u64),
    Listed(usize),
    Invalid,
}

impl EntryLocation {
    pub fn is_invalid(&self) -> bool {
        matches!(self, EntryLocation::Invalid)
    }

    pub fn to_wire(self) -> i64 {
        match self {
            EntryLocation::Encoded(offset) => offset as i64,
            EntryLocation::Listed(index) => -(index as i64) - 1,
            EntryLocation::Invalid => i64::MIN,
        }
    }

    pub fn from_wire(value: i64) -> Self {
        if value == i64::MIN {
            EntryLocation::Invalid
        } else if value >= 0 {
            EntryLocation::Encoded(value as u64)
        } else {
            EntryLocation::Listed((-(value + 1)) as usize)
        }
    }

    pub fn read<R: io::Read>(reader: &mut R) -> Result<Self, crate::Error> {
        Ok(Self::from_wire(reader.read_i64::<LE>()?))
    }

    pub fn write<W: io::Write>(&self, writer: &mut W) -> Result<(), crate::Error> {
        writer.write_i64::<LE>(self.to_wire())?;
        Ok(())
    }
}

/// Files directly inside one directory: leaf name to entry location.
pub type PakDirectory = BTreeMap<String, EntryLocation>;

/// Mount-relative directory path (directory form, root is "/") to its files.
pub type DirectoryIndex = BTreeMap<String, PakDirectory>;

/// 64-bit seeded path hash to entry location.
pub type PathHashIndex = HashMap<u64, EntryLocation>;

/// Backing storage for entry records: the dense bit-encoded buffer plus the
/// overflow list for entries the codec could not represent.
#[derive(Debug, Default)]
pub(crate) struct EntryStore {
    pub encoded: Vec<u8>,
    pub files: Vec<Entry>,
}

impl EntryStore {
    /// Materialize the entry behind a location. `None` means the location is
    /// a delete record. Out-of-range locations are a programmer error on the
    /// index producer's side.
    pub fn entry(&self, location: EntryLocation, info: &Info) -> Result<Option<Entry>, crate::Error> {
        match location {
            EntryLocation::Invalid => Ok(None),
            EntryLocation::Encoded(offset) => {
                debug_assert!((offset as usize) < self.encoded.len());
                let bytes = self
                    .encoded
                    .get(offset as usize..)
                    .ok_or(crate::Error::Other("encoded entry offset out of range"))?;
                Entry::decode(bytes, info).map(Some)
            }
            EntryLocation::Listed(index) => {
                debug_assert!(index < self.files.len());
                let found = self
                    .files
                    .get(index)
                    .ok_or(crate::Error::Other("entry list index out of range"))?;
                // index records cannot carry the payload hash
                let mut entry = found.clone();
                entry.hash = Hash::default();
                entry.verified = true;
                Ok(Some(entry))
            }
        }
    }
}

/// The index structures one insertion feeds. Any subset may be active; the
/// collision map rejects two distinct paths hashing alike within an archive.
#[derive(Default)]
pub(crate) struct IndexSinks<'a> {
    pub directory: Option<&'a mut DirectoryIndex>,
    pub tree: Option<&'a mut DirectoryTree>,
    pub path_hash: Option<&'a mut PathHashIndex>,
    pub collisions: Option<&'a mut HashMap<u64, String>>,
}

/// Insert one filename into the active indexes, creating every ancestor
/// directory up to the mount point.
pub(crate) fn add_entry_to_index(
    filename: &str,
    location: EntryLocation,
    mount_point: &str,
    path_hash_seed: u64,
    sinks: IndexSinks<'_>,
    version: Version,
) -> Result<(), crate::Error> {
    let Some(relative) = rebase_to_mount(filename, mount_point) else {
        return Err(crate::Error::Other("filename is outside the mount point"));
    };
    let (directory, leaf) = split_path_child(relative)
        .ok_or(crate::Error::Other("filename has no leaf component"))?;

    if let Some(index) = sinks.directory {
        if !index.contains_key(directory) {
            // add the parent directories up to the mount point (whose
            // mount-relative path is "/")
            let mut current = directory;
            while let Some((parent, _)) = split_path_child(current) {
                current = parent;
                index.entry(current.to_string()).or_default();
            }
        }
        index
            .entry(directory.to_string())
            .or_default()
            .insert(leaf.to_string(), location);
    }

    if let Some(tree) = sinks.tree {
        if !tree.contains(directory) {
            let mut current = directory;
            while let Some((parent, _)) = split_path_child(current) {
                current = parent;
                tree.find_or_add(current);
            }
        }
        tree.find_or_add(directory)
            .insert(leaf.to_string(), location);
    }

    if sinks.path_hash.is_some() || sinks.collisions.is_some() {
        let path_hash = hash_path(relative, path_hash_seed, version);
        if let Some(collisions) = sinks.collisions {
            if let Some(existing) = collisions.get(&path_hash) {
                if existing != relative {
                    return Err(crate::Error::PathHashCollision {
                        hash: path_hash,
                        first: existing.clone(),
                        second: relative.to_string(),
                    });
                }
            }
            collisions.insert(path_hash, relative.to_string());
        }
        if let Some(path_hash_index) = sinks.path_hash {
            path_hash_index.insert(path_hash, location);
        }
    }

    Ok(())
}
