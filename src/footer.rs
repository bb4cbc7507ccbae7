use crate::{ser, Hash};

use super::{Compression, Version, VersionMajor};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::str::FromStr;

/// Archive trailer: fixed-layout metadata located at a version-specific
/// distance from the end of the file.
#[derive(Debug, Clone)]
pub struct Info {
    /// Zero means the index is readable with the embedded/default key.
    pub encryption_key_guid: u128,
    pub encrypted_index: bool,
    pub magic: u32,
    pub version: Version,
    pub version_major: VersionMajor,
    pub index_offset: i64,
    pub index_size: i64,
    pub index_hash: Hash,
    pub frozen: bool,
    pub compression: Vec<Option<Compression>>,
}

impl Info {
    pub fn read<R: std::io::Read>(reader: &mut R, version: Version) -> Result<Self, super::Error> {
        let encryption_key_guid = if version.version_major() >= VersionMajor::EncryptionKeyGuid {
            reader.read_u128::<LE>()?
        } else {
            0
        };
        let encrypted_index =
            version.version_major() >= VersionMajor::IndexEncryption && ser::read_bool(reader)?;
        let magic = reader.read_u32::<LE>()?;
        let version_major =
            VersionMajor::from_repr(reader.read_u32::<LE>()?).unwrap_or(version.version_major());
        let index_offset = reader.read_i64::<LE>()?;
        let index_size = reader.read_i64::<LE>()?;
        let index_hash = Hash::read(reader)?;
        let frozen =
            version.version_major() == VersionMajor::FrozenIndex && ser::read_bool(reader)?;
        let compression = {
            let mut compression = Vec::with_capacity(match version {
                ver if ver < Version::V8A => 0,
                ver if ver < Version::V8B => 4,
                _ => 5,
            });
            for _ in 0..compression.capacity() {
                compression.push(
                    Compression::from_str(
                        &ser::read_bytes(reader, 32)?
                            .iter()
                            // filter out padding and convert to char
                            .filter_map(|&ch| (ch != 0).then_some(ch as char))
                            .collect::<String>(),
                    )
                    .ok(),
                )
            }
            if version.version_major() < VersionMajor::FNameBasedCompression {
                compression.push(Some(Compression::Zlib));
                compression.push(Some(Compression::Gzip));
                compression.push(Some(Compression::Oodle));
            }
            compression
        };
        if super::MAGIC != magic {
            return Err(super::Error::Magic(magic));
        }
        if version.version_major() != version_major {
            return Err(super::Error::Version {
                used: version.version_major(),
                version: version_major,
            });
        }
        Ok(Self {
            encryption_key_guid,
            encrypted_index,
            magic,
            version,
            version_major,
            index_offset,
            index_size,
            index_hash,
            frozen,
            compression,
        })
    }

    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> Result<(), super::Error> {
        if self.version_major >= VersionMajor::EncryptionKeyGuid {
            writer.write_u128::<LE>(self.encryption_key_guid)?;
        }
        if self.version_major >= VersionMajor::IndexEncryption {
            ser::write_bool(writer, self.encrypted_index)?;
        }
        writer.write_u32::<LE>(self.magic)?;
        writer.write_u32::<LE>(self.version_major as u32)?;
        writer.write_i64::<LE>(self.index_offset)?;
        writer.write_i64::<LE>(self.index_size)?;
        self.index_hash.write(writer)?;
        if self.version_major == VersionMajor::FrozenIndex {
            ser::write_bool(writer, self.frozen)?;
        }
        let algo_size = match self.version {
            ver if ver < Version::V8A => 0,
            ver if ver < Version::V8B => 4,
            _ => 5,
        };
        for i in 0..algo_size {
            let mut name = [0; 32];
            if let Some(algo) = self.compression.get(i).cloned().flatten() {
                for (i, b) in algo.to_string().as_bytes().iter().enumerate() {
                    name[i] = *b;
                }
            }
            writer.write_all(&name)?;
        }
        Ok(())
    }

    /// Resolve a compression-method index against the trailer's method table.
    /// Index 0 always means "not compressed".
    pub fn compression_method(&self, index: u32) -> Option<Compression> {
        if index == 0 {
            Some(Compression::None)
        } else {
            self.compression
                .get(index as usize - 1)
                .copied()
                .flatten()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_trailer_round_trip() {
        for version in [Version::V5, Version::V7, Version::V9, Version::V11, Version::V12] {
            let info = Info {
                encryption_key_guid: 0,
                encrypted_index: false,
                magic: crate::MAGIC,
                version,
                version_major: version.version_major(),
                index_offset: 0x400,
                index_size: 0x80,
                index_hash: Hash([7; 20]),
                frozen: false,
                compression: if version >= Version::V8A {
                    vec![Some(Compression::Zlib), None, None, None, None]
                } else {
                    vec![]
                },
            };
            let mut buf = vec![];
            info.write(&mut buf).unwrap();
            assert_eq!(buf.len() as i64, version.size());
            let read = Info::read(&mut std::io::Cursor::new(&buf), version).unwrap();
            assert_eq!(read.index_offset, info.index_offset);
            assert_eq!(read.index_size, info.index_size);
            assert_eq!(read.index_hash, info.index_hash);
            assert_eq!(read.version, version);
        }
    }

    #[test]
    fn test_trailer_rejects_wrong_magic() {
        let info = Info {
            encryption_key_guid: 0,
            encrypted_index: false,
            magic: 0xDEADBEEF,
            version: Version::V11,
            version_major: VersionMajor::Fnv64BugFix,
            index_offset: 0,
            index_size: 0,
            index_hash: Hash::default(),
            frozen: false,
            compression: vec![None; 5],
        };
        let mut buf = vec![];
        info.write(&mut buf).unwrap();
        assert!(matches!(
            Info::read(&mut std::io::Cursor::new(&buf), Version::V11),
            Err(crate::Error::Magic(0xDEADBEEF))
        ));
    }
}
