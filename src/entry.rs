use super::{Hash, Info, Version, VersionMajor, AES_BLOCK_SIZE};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io;

/// Which copy of a full entry record is being serialized: the copy stored
/// in front of each payload writes its offset field as zero.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum EntryRecord {
    Payload,
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub start: u64,
    pub end: u64,
}

impl Block {
    pub fn read<R: io::Read>(reader: &mut R) -> Result<Self, super::Error> {
        Ok(Self {
            start: reader.read_u64::<LE>()?,
            end: reader.read_u64::<LE>()?,
        })
    }

    pub fn write<W: io::Write>(&self, writer: &mut W) -> Result<(), super::Error> {
        writer.write_u64::<LE>(self.start)?;
        writer.write_u64::<LE>(self.end)?;
        Ok(())
    }
}

fn align(offset: u64, alignment: u64) -> u64 {
    // add alignment then zero out alignment bits
    (offset + alignment - 1) & !(alignment - 1)
}

const FLAG_ENCRYPTED: u8 = 1 << 0;
const FLAG_DELETED: u8 = 1 << 1;

// legacy (pre-compression-name-table) archives store a method bitfield
// instead of an index into the trailer's table
fn legacy_compression_index(flags: u32) -> u32 {
    match flags {
        0x01 | 0x10 | 0x20 => 1, // zlib
        0x02 => 2,               // gzip
        0x04 => 3,               // custom
        _ => 0,
    }
}

fn legacy_compression_flags(index: u32) -> u32 {
    match index {
        1 => 0x01,
        2 => 0x02,
        3 => 0x04,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub offset: u64,
    pub compressed: u64,
    pub uncompressed: u64,
    /// Index into the trailer's compression-method table, 0 = none.
    pub compression_method_index: u32,
    pub timestamp: Option<u64>,
    pub hash: Hash,
    /// Records decoded from the index cannot carry a payload hash, so they
    /// are marked verified with a zero hash.
    pub verified: bool,
    pub blocks: Vec<Block>,
    pub encrypted: bool,
    pub deleted: bool,
    pub compression_block_size: u32,
}

impl Entry {
    pub fn delete_record() -> Self {
        Entry {
            offset: 0,
            compressed: 0,
            uncompressed: 0,
            compression_method_index: 0,
            timestamp: None,
            hash: Hash::default(),
            verified: false,
            blocks: vec![],
            encrypted: false,
            deleted: true,
            compression_block_size: 0,
        }
    }

    pub fn is_delete_record(&self) -> bool {
        self.deleted
    }

    /// Size of the full serialized record, which is also the in-place header
    /// length in front of each payload.
    pub fn serialized_size(version: Version, compression_method_index: u32, block_count: u32) -> u64 {
        let mut size = 0;
        size += 8; // offset
        size += 8; // compressed
        size += 8; // uncompressed
        size += match version != Version::V8A {
            true => 4,  // 32 bit compression
            false => 1, // 8 bit compression
        };
        size += match version.version_major() == VersionMajor::Initial {
            true => 8, // timestamp
            false => 0,
        };
        size += 20; // hash
        size += match compression_method_index != 0 {
            true => 4 + (8 + 8) * block_count as u64, // blocks
            false => 0,
        };
        size += match version.version_major() >= VersionMajor::CompressionEncryption {
            true => 1 + 4, // flags + block size
            false => 0,
        };
        size
    }

    pub fn read<R: io::Read>(
        reader: &mut R,
        version: Version,
    ) -> Result<Self, super::Error> {
        let offset = reader.read_u64::<LE>()?;
        let compressed = reader.read_u64::<LE>()?;
        let uncompressed = reader.read_u64::<LE>()?;
        let compression_method_index = match version {
            Version::V8A => reader.read_u8()? as u32,
            ver if ver.version_major() >= VersionMajor::FNameBasedCompression => {
                reader.read_u32::<LE>()?
            }
            _ => legacy_compression_index(reader.read_u32::<LE>()?),
        };
        let timestamp = match version.version_major() == VersionMajor::Initial {
            true => Some(reader.read_u64::<LE>()?),
            false => None,
        };
        let hash = Hash::read(reader)?;
        let blocks = match version.version_major() >= VersionMajor::CompressionEncryption
            && compression_method_index != 0
        {
            true => {
                let block_count = reader.read_u32::<LE>()?;
                let mut blocks = Vec::with_capacity(block_count as usize);
                for _ in 0..block_count {
                    blocks.push(Block::read(reader)?);
                }
                blocks
            }
            false => vec![],
        };
        let (encrypted, deleted, compression_block_size) =
            match version.version_major() >= VersionMajor::CompressionEncryption {
                true => {
                    let flags = reader.read_u8()?;
                    (
                        flags & FLAG_ENCRYPTED != 0,
                        flags & FLAG_DELETED != 0,
                        reader.read_u32::<LE>()?,
                    )
                }
                false => (false, false, 0),
            };
        Ok(Self {
            offset,
            compressed,
            uncompressed,
            compression_method_index,
            timestamp,
            hash,
            verified: false,
            blocks,
            encrypted,
            deleted,
            compression_block_size,
        })
    }

    pub fn write<W: io::Write>(
        &self,
        writer: &mut W,
        version: Version,
        record: EntryRecord,
    ) -> Result<(), super::Error> {
        writer.write_u64::<LE>(match record {
            EntryRecord::Payload => 0,
            EntryRecord::Index => self.offset,
        })?;
        writer.write_u64::<LE>(self.compressed)?;
        writer.write_u64::<LE>(self.uncompressed)?;
        match version {
            Version::V8A => writer.write_u8(self.compression_method_index as u8)?,
            ver if ver.version_major() >= VersionMajor::FNameBasedCompression => {
                writer.write_u32::<LE>(self.compression_method_index)?
            }
            _ => writer.write_u32::<LE>(legacy_compression_flags(self.compression_method_index))?,
        }
        if version.version_major() == VersionMajor::Initial {
            writer.write_u64::<LE>(self.timestamp.unwrap_or_default())?;
        }
        self.hash.write(writer)?;
        if version.version_major() >= VersionMajor::CompressionEncryption {
            if self.compression_method_index != 0 {
                writer.write_u32::<LE>(self.blocks.len() as u32)?;
                for block in &self.blocks {
                    block.write(writer)?;
                }
            }
            let mut flags = 0;
            if self.encrypted {
                flags |= FLAG_ENCRYPTED;
            }
            if self.deleted {
                flags |= FLAG_DELETED;
            }
            writer.write_u8(flags)?;
            writer.write_u32::<LE>(self.compression_block_size)?;
        }
        Ok(())
    }

    /// Compare the fields an index record shares with the in-place payload
    /// record. Offsets are excluded (payload copies store zero), as are the
    /// hash and verified flag (index records cannot carry them).
    pub fn index_data_equals(&self, other: &Entry) -> bool {
        self.compressed == other.compressed
            && self.uncompressed == other.uncompressed
            && self.compression_method_index == other.compression_method_index
            && self.blocks == other.blocks
            && self.encrypted == other.encrypted
            && self.deleted == other.deleted
            && self.compression_block_size == other.compression_block_size
    }

    /// Byte-encode this entry into the compact bit-packed form. Returns
    /// `Ok(false)` without writing anything when the entry cannot be
    /// represented, in which case it belongs in the overflow list.
    pub fn encode<W: io::Write>(&self, writer: &mut W, info: &Info) -> Result<bool, super::Error> {
        debug_assert!(!self.deleted, "delete records have no encoded form");

        // the bitfield caps the method index and the block count
        if self.compression_method_index >= (1 << 6) {
            return Ok(false);
        }
        if self.blocks.len() >= (1 << 16) {
            return Ok(false);
        }
        // an uncompressed entry records no per-block data, so a block list
        // would desynchronize decode
        if self.compression_method_index == 0 && !self.blocks.is_empty() {
            return Ok(false);
        }

        let alignment = if self.encrypted { AES_BLOCK_SIZE } else { 1 };
        let header =
            Entry::serialized_size(info.version, self.compression_method_index, self.blocks.len() as u32);
        let base = if info.version.has_relative_chunk_offsets() {
            0
        } else {
            self.offset
        };

        if self.compression_method_index != 0 {
            if !self.blocks.is_empty() && self.blocks[0].start != base + header {
                return Ok(false);
            }
            if self.blocks.len() == 1 {
                let block = &self.blocks[0];
                let aligned = align(block.end - block.start, alignment);
                if base + header + self.compressed != block.start + aligned {
                    return Ok(false);
                }
            }
            for i in 1..self.blocks.len() {
                let prev = &self.blocks[i - 1];
                if self.blocks[i].start != prev.start + align(prev.end - prev.start, alignment) {
                    return Ok(false);
                }
            }
            for block in &self.blocks {
                if block.end - block.start > u32::MAX as u64 {
                    return Ok(false);
                }
            }
        }

        let is_offset_32_bit_safe = self.offset <= u32::MAX as u64;
        let is_uncompressed_size_32_bit_safe = self.uncompressed <= u32::MAX as u64;
        let is_size_32_bit_safe = self.compressed <= u32::MAX as u64;

        // With a single block the block size is recovered from the
        // uncompressed size, so the packed field stays zero. Otherwise the
        // block size is packed as a 6-bit multiple of 2^11; sizes that do not
        // fit are flagged with the 0x3f sentinel and sent as a full field.
        let mut compression_block_size_packed = 0u32;
        if self.blocks.len() > 1 {
            compression_block_size_packed = (self.compression_block_size >> 11) & 0x3f;
            if (compression_block_size_packed << 11) != self.compression_block_size {
                compression_block_size_packed = 0x3f;
            }
        }

        let flags = (compression_block_size_packed)
            | ((self.blocks.len() as u32) << 6)
            | ((self.encrypted as u32) << 22)
            | (self.compression_method_index << 23)
            | ((is_size_32_bit_safe as u32) << 29)
            | ((is_uncompressed_size_32_bit_safe as u32) << 30)
            | ((is_offset_32_bit_safe as u32) << 31);

        writer.write_u32::<LE>(flags)?;

        if compression_block_size_packed == 0x3f {
            writer.write_u32::<LE>(self.compression_block_size)?;
        }

        if is_offset_32_bit_safe {
            writer.write_u32::<LE>(self.offset as u32)?;
        } else {
            writer.write_u64::<LE>(self.offset)?;
        }

        if is_uncompressed_size_32_bit_safe {
            writer.write_u32::<LE>(self.uncompressed as u32)?;
        } else {
            writer.write_u64::<LE>(self.uncompressed)?;
        }

        if self.compression_method_index != 0 {
            if is_size_32_bit_safe {
                writer.write_u32::<LE>(self.compressed as u32)?;
            } else {
                writer.write_u64::<LE>(self.compressed)?;
            }

            if self.blocks.len() > 1 || (self.blocks.len() == 1 && self.encrypted) {
                for block in &self.blocks {
                    writer.write_u32::<LE>((block.end - block.start) as u32)?;
                }
            }
        }

        Ok(true)
    }

    /// Decode one bit-packed record starting at the front of `bytes`. The
    /// record length is structural so decoding never reads past it.
    pub fn decode(bytes: &[u8], info: &Info) -> Result<Self, super::Error> {
        let mut reader = io::Cursor::new(bytes);
        let bits = reader.read_u32::<LE>()?;
        let compression_method_index = (bits >> 23) & 0x3f;
        let encrypted = (bits & (1 << 22)) != 0;
        let compression_block_count = (bits >> 6) & 0xffff;
        let mut compression_block_size = bits & 0x3f;

        if compression_block_size == 0x3f {
            compression_block_size = reader.read_u32::<LE>()?;
        } else {
            compression_block_size <<= 11;
        }

        let mut var_int = |bit: u32| -> Result<_, super::Error> {
            Ok(if (bits & (1 << bit)) != 0 {
                reader.read_u32::<LE>()? as u64
            } else {
                reader.read_u64::<LE>()?
            })
        };

        let offset = var_int(31)?;
        let uncompressed = var_int(30)?;
        let compressed = match compression_method_index {
            0 => uncompressed,
            _ => var_int(29)?,
        };

        if compression_block_count > 0 {
            // a single block spans the whole payload
            if compression_block_count == 1 {
                debug_assert!(uncompressed <= u32::MAX as u64);
                compression_block_size = uncompressed as u32;
            }
        } else {
            compression_block_size = 0;
        }

        let base = match info.version.has_relative_chunk_offsets() {
            true => 0,
            false => offset,
        };
        let offset_base = base
            + Entry::serialized_size(info.version, compression_method_index, compression_block_count);

        let blocks = if compression_block_count == 1 && !encrypted {
            // no per-block data was stored; derive the block from the
            // entry's offset and size alone
            vec![Block {
                start: offset_base,
                end: offset_base + compressed,
            }]
        } else if compression_block_count > 0 {
            let mut index = offset_base;
            (0..compression_block_count)
                .map(|_| {
                    let mut block_size = reader.read_u32::<LE>()? as u64;
                    let block = Block {
                        start: index,
                        end: index + block_size,
                    };
                    if encrypted {
                        block_size = align(block_size, AES_BLOCK_SIZE);
                    }
                    index += block_size;
                    Ok(block)
                })
                .collect::<Result<Vec<_>, super::Error>>()?
        } else {
            vec![]
        };

        Ok(Entry {
            offset,
            compressed,
            uncompressed,
            compression_method_index,
            timestamp: None,
            hash: Hash::default(),
            verified: true,
            blocks,
            encrypted,
            deleted: false,
            compression_block_size,
        })
    }
}
