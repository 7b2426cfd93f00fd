//! Little-endian integer access at byte offsets.
//!
//! Every function is bounds-checked and reports the shortfall as
//! [`Error::UnexpectedEof`] instead of panicking, so callers can point them at
//! untrusted record buffers.

use byteorder::{ByteOrder, LittleEndian};

use crate::{Error, Result};

#[inline]
fn window(len: usize, offset: usize, width: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(width) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(Error::UnexpectedEof {
            needed: width,
            available: len.saturating_sub(offset),
        }),
    }
}

/// Read an unsigned byte.
#[inline]
pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8> {
    let range = window(buf.len(), offset, 1)?;
    Ok(buf[range.start])
}

/// Read a signed byte.
#[inline]
pub fn read_i8(buf: &[u8], offset: usize) -> Result<i8> {
    read_u8(buf, offset).map(|b| b as i8)
}

/// Write an unsigned byte.
#[inline]
pub fn write_u8(buf: &mut [u8], offset: usize, value: u8) -> Result<()> {
    let range = window(buf.len(), offset, 1)?;
    buf[range.start] = value;
    Ok(())
}

/// Write a signed byte.
#[inline]
pub fn write_i8(buf: &mut [u8], offset: usize, value: i8) -> Result<()> {
    write_u8(buf, offset, value as u8)
}

macro_rules! le_access {
    ($($ty:ty, $width:literal, $read:ident, $write:ident, $bo_read:ident, $bo_write:ident;)*) => {
        $(
            #[doc = concat!("Read a little-endian `", stringify!($ty), "` at `offset`.")]
            #[inline]
            pub fn $read(buf: &[u8], offset: usize) -> Result<$ty> {
                let range = window(buf.len(), offset, $width)?;
                Ok(LittleEndian::$bo_read(&buf[range]))
            }

            #[doc = concat!("Write a little-endian `", stringify!($ty), "` at `offset`.")]
            #[inline]
            pub fn $write(buf: &mut [u8], offset: usize, value: $ty) -> Result<()> {
                let range = window(buf.len(), offset, $width)?;
                LittleEndian::$bo_write(&mut buf[range], value);
                Ok(())
            }
        )*
    };
}

le_access! {
    u16, 2, read_u16, write_u16, read_u16, write_u16;
    i16, 2, read_i16, write_i16, read_i16, write_i16;
    u32, 4, read_u32, write_u32, read_u32, write_u32;
    i32, 4, read_i32, write_i32, read_i32, write_i32;
    u64, 8, read_u64, write_u64, read_u64, write_u64;
    i64, 8, read_i64, write_i64, read_i64, write_i64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_at_offset() {
        let buf = [0xAA, 0x50, 0x4b, 0x03, 0x04, 0xFF];
        assert_eq!(read_u32(&buf, 1).unwrap(), 0x04034b50);
        assert_eq!(read_u16(&buf, 4).unwrap(), 0xFF04);
        assert_eq!(read_i8(&buf, 5).unwrap(), -1);
    }

    #[test]
    fn test_write_then_read_signed() {
        let mut buf = [0u8; 16];
        write_i64(&mut buf, 8, -2).unwrap();
        assert_eq!(&buf[8..], &[0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(read_i64(&buf, 8).unwrap(), -2);
        assert_eq!(read_u64(&buf, 8).unwrap(), u64::MAX - 1);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut buf = [0u8; 3];
        assert!(matches!(
            read_u32(&buf, 0),
            Err(Error::UnexpectedEof { needed: 4, available: 3 })
        ));
        assert!(write_u16(&mut buf, 2, 1).is_err());
        assert!(read_u16(&buf, usize::MAX).is_err());
    }
}
