//! Primitives shared by the trailer and index streams. Integers are
//! little-endian and read through `byteorder` directly; strings and flags
//! get the helpers here, and 20-byte digests parse via [`crate::Hash`].

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Read, Write};

use crate::{Error, Result};

/// Length-prefixed string: an i32 unit count that includes the terminating
/// NUL. A negative count marks a UTF-16LE payload from a wide-character
/// producer, transcoded on load.
pub(crate) fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let prefix = reader.read_i32::<LE>()?;
    let mut value = if prefix < 0 {
        let count = prefix.unsigned_abs() as usize;
        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            units.push(reader.read_u16::<LE>()?);
        }
        String::from_utf16(&units)?
    } else {
        String::from_utf8(read_bytes(reader, prefix as usize)?)?
    };
    value.pop(); // terminating NUL
    Ok(value)
}

pub(crate) fn read_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Flags are single bytes holding exactly 0 or 1; anything else is stream
/// corruption, not a truthy value.
pub(crate) fn read_bool<R: Read>(reader: &mut R) -> Result<bool> {
    match reader.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::Bool(other)),
    }
}

pub(crate) fn write_bool<W: Write>(writer: &mut W, value: bool) -> Result<()> {
    writer.write_u8(u8::from(value))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_string_narrow() {
        let mut buf = vec![];
        buf.extend_from_slice(&6i32.to_le_bytes());
        buf.extend_from_slice(b"icons\0");
        assert_eq!(
            read_string(&mut std::io::Cursor::new(buf)).unwrap(),
            "icons"
        );
    }

    #[test]
    fn test_read_string_wide() {
        let mut buf = vec![];
        buf.extend_from_slice(&(-3i32).to_le_bytes());
        for unit in [0x68u16, 0x69, 0] {
            buf.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(read_string(&mut std::io::Cursor::new(buf)).unwrap(), "hi");
    }

    #[test]
    fn test_read_string_stops_at_prefix() {
        let mut buf = vec![];
        buf.extend_from_slice(&2i32.to_le_bytes());
        buf.extend_from_slice(b"a\0trailing");
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_string(&mut cursor).unwrap(), "a");
        assert_eq!(cursor.position(), 4 + 2);
    }

    #[test]
    fn test_bool_rejects_other_values() {
        assert!(matches!(
            read_bool(&mut std::io::Cursor::new([7u8])),
            Err(Error::Bool(7))
        ));
        assert!(read_bool(&mut std::io::Cursor::new([1u8])).unwrap());
    }
}
