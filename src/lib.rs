mod config;
mod crypto;
mod entry;
mod error;
mod footer;
mod index;
mod loader;
mod pak;
mod path;
mod prune;
mod reader;
mod ser;
mod signed;
mod tree;

pub use {
    config::{DirectoryBackend, IndexOptions},
    crypto::{KeyStore, NoKeys},
    entry::{Block, Entry, EntryRecord},
    error::*,
    footer::Info,
    index::{DirectoryIndex, EntryLocation, PakDirectory, PathHashIndex},
    pak::{EntryIterator, FindResult, PakBuilder, PakFile},
    path::{
        hash_path, make_directory_from_path, pak_path_combine, path_hash_seed, split_path_child,
    },
    reader::{FileReaderFactory, PakStream, ReaderFactory, SharedReader},
    signed::{
        ChunkSignatureVerifier, ChunkSignatureVerifierSource, SignatureFailure,
        SignatureFailureHandlers,
    },
    tree::DirectoryTree,
};

#[cfg(feature = "encryption")]
pub use crypto::StaticKeyStore;

pub const MAGIC: u32 = 0x70414B31;

/// Alignment applied to encrypted compression blocks.
pub const AES_BLOCK_SIZE: u64 = 16;

#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Debug,
    strum::Display,
    strum::FromRepr,
    strum::EnumIter,
    strum::EnumString,
)]
pub enum Version {
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
    V8A,
    V8B,
    V9,
    V10,
    V11,
    V12,
}

#[repr(u32)]
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Debug, strum::Display, strum::FromRepr, strum::EnumIter,
)]
/// Version actually written to the archive trailer
pub enum VersionMajor {
    Unknown,               // v0 unknown (mostly just for padding)
    Initial,               // v1 initial specification
    NoTimestamps,          // v2 timestamps removed
    CompressionEncryption, // v3 compression and encryption support
    IndexEncryption,       // v4 index encryption support
    RelativeChunkOffsets,  // v5 offsets are relative to header
    DeleteRecords,         // v6 record deletion support
    EncryptionKeyGuid,     // v7 include key GUID
    FNameBasedCompression, // v8 compression names included
    FrozenIndex,           // v9 frozen index byte included
    PathHashIndex,         // v10
    Fnv64BugFix,           // v11
    Utf8PakDirectory,      // v12 directory leaf names are UTF-8
}

// strum shouldn't need to be installed by users
impl Version {
    pub fn iter() -> std::iter::Rev<VersionIter> {
        <Version as strum::IntoEnumIterator>::iter().rev()
    }

    pub fn latest() -> Self {
        Version::V12
    }

    pub fn size(self) -> i64 {
        // (magic + version): u32 + (offset + size): u64 + hash: [u8; 20]
        let mut size = 4 + 4 + 8 + 8 + 20;
        if self.version_major() >= VersionMajor::EncryptionKeyGuid {
            // encryption uuid: u128
            size += 16;
        }
        if self.version_major() >= VersionMajor::IndexEncryption {
            // encrypted: bool
            size += 1;
        }
        if self.version_major() == VersionMajor::FrozenIndex {
            // frozen index: bool
            size += 1;
        }
        if self >= Version::V8A {
            // compression names: [[u8; 32]; 4]
            size += 32 * 4;
        }
        if self >= Version::V8B {
            // additional compression name
            size += 32;
        }
        size
    }

    /// Losslessly convert full version into major version
    pub fn version_major(&self) -> VersionMajor {
        match self {
            Version::V0 => VersionMajor::Unknown,
            Version::V1 => VersionMajor::Initial,
            Version::V2 => VersionMajor::NoTimestamps,
            Version::V3 => VersionMajor::CompressionEncryption,
            Version::V4 => VersionMajor::IndexEncryption,
            Version::V5 => VersionMajor::RelativeChunkOffsets,
            Version::V6 => VersionMajor::DeleteRecords,
            Version::V7 => VersionMajor::EncryptionKeyGuid,
            Version::V8A => VersionMajor::FNameBasedCompression,
            Version::V8B => VersionMajor::FNameBasedCompression,
            Version::V9 => VersionMajor::FrozenIndex,
            Version::V10 => VersionMajor::PathHashIndex,
            Version::V11 => VersionMajor::Fnv64BugFix,
            Version::V12 => VersionMajor::Utf8PakDirectory,
        }
    }

    /// Compression block offsets are stored relative to the entry header
    /// rather than the start of the archive.
    pub fn has_relative_chunk_offsets(&self) -> bool {
        self.version_major() >= VersionMajor::RelativeChunkOffsets
    }
}

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, strum::Display, strum::EnumString)]
pub enum Compression {
    #[default]
    None,
    Zlib,
    Gzip,
    Oodle,
    Zstd,
    LZ4,
}

/// SHA-1 digest as stored in trailers, index headers and entry records.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Hash(pub [u8; 20]);

impl Hash {
    pub fn read<R: std::io::Read>(reader: &mut R) -> Result<Self> {
        let mut digest = [0; 20];
        reader.read_exact(&mut digest)?;
        Ok(Hash(digest))
    }

    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.0)?;
        Ok(())
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

pub(crate) fn sha1(data: &[u8]) -> Hash {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}
