//! Fixed-width integer packing and small bit helpers shared by every wire codec.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Bounds-checked cursor over a received byte slice.
///
/// Every read fails with a protocol error naming `what` instead of panicking or
/// silently truncating.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn rest(&self) -> &'a [u8] {
        self.buf
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub(crate) fn u24_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u24(self.bytes(3)?))
    }

    pub(crate) fn u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::Protocol(self.what));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }
}

/// Byte order of a packed integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first (IPMI default).
    Little,
    /// Most significant byte first.
    Big,
}

/// Pack the low `width` bytes of `value` (1..=8).
pub fn pack_uint(value: u64, width: usize, endian: Endian) -> Vec<u8> {
    let width = width.clamp(1, 8);
    let mut out = vec![0u8; width];
    match endian {
        Endian::Little => LittleEndian::write_uint(&mut out, value & mask(width), width),
        Endian::Big => BigEndian::write_uint(&mut out, value & mask(width), width),
    }
    out
}

/// Unpack a `bytes.len()`-wide unsigned integer (1..=8 bytes).
pub fn unpack_uint(bytes: &[u8], endian: Endian) -> Result<u64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(Error::InvalidArgument("integer width must be 1..=8 bytes"));
    }
    Ok(match endian {
        Endian::Little => LittleEndian::read_uint(bytes, bytes.len()),
        Endian::Big => BigEndian::read_uint(bytes, bytes.len()),
    })
}

fn mask(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

/// Interpret the low `bits` of `raw` as a two's-complement signed value.
pub fn from_twos_complement(raw: u32, bits: u8) -> i32 {
    let bits = u32::from(bits.clamp(1, 32));
    if bits == 32 {
        return raw as i32;
    }
    let raw = raw & ((1u32 << bits) - 1);
    let sign = 1u32 << (bits - 1);
    if raw & sign != 0 {
        (i64::from(raw) - (1i64 << bits)) as i32
    } else {
        raw as i32
    }
}

/// Encode `value` as a `bits`-wide two's-complement field.
pub fn to_twos_complement(value: i32, bits: u8) -> u32 {
    let bits = u32::from(bits.clamp(1, 32));
    if bits == 32 {
        return value as u32;
    }
    (value as u32) & ((1u32 << bits) - 1)
}

/// Interpret the low `bits` of `raw` as a one's-complement signed value.
pub fn from_ones_complement(raw: u32, bits: u8) -> i32 {
    let bits = u32::from(bits.clamp(1, 31));
    let field = (1u32 << bits) - 1;
    let raw = raw & field;
    if raw & (1u32 << (bits - 1)) != 0 {
        -((!raw & field) as i32)
    } else {
        raw as i32
    }
}

/// Whether bit `n` (0 = LSB) of `byte` is set.
pub fn is_bit_set(byte: u8, n: u8) -> bool {
    n < 8 && byte & (1 << n) != 0
}

/// Return `byte` with bit `n` set or cleared.
pub fn with_bit(byte: u8, n: u8, on: bool) -> u8 {
    if n >= 8 {
        return byte;
    }
    if on { byte | (1 << n) } else { byte & !(1 << n) }
}
