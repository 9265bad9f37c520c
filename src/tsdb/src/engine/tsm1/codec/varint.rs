/// MAX_VARINT_LEN64 is the maximum encoded length of a 64-bit varint.
pub const MAX_VARINT_LEN64: usize = 10;

/// VarInt is the unsigned LEB128 encoding used by the RLE codec branches
/// and the block packer length prefix.
pub trait VarInt: Sized {
    /// Encodes the value into `dst` and returns the number of bytes
    /// written.  `dst` must be at least [`MAX_VARINT_LEN64`] bytes.
    fn encode_var(self, dst: &mut [u8]) -> usize;

    /// Decodes a value from the front of `src`, returning it together with
    /// the number of bytes consumed, or `None` if `src` is truncated.
    fn decode_var(src: &[u8]) -> Option<(Self, usize)>;
}

impl VarInt for u64 {
    fn encode_var(self, dst: &mut [u8]) -> usize {
        let mut v = self;
        let mut i = 0;
        while v >= 0x80 {
            dst[i] = (v as u8) | 0x80;
            v >>= 7;
            i += 1;
        }
        dst[i] = v as u8;
        i + 1
    }

    fn decode_var(src: &[u8]) -> Option<(Self, usize)> {
        let mut v = 0u64;
        let mut shift = 0u32;
        for (i, b) in src.iter().enumerate() {
            if i >= MAX_VARINT_LEN64 {
                return None;
            }
            if *b < 0x80 {
                // The tenth byte may only carry a single bit.
                if i == MAX_VARINT_LEN64 - 1 && *b > 1 {
                    return None;
                }
                return Some((v | (*b as u64) << shift, i + 1));
            }
            v |= ((*b & 0x7f) as u64) << shift;
            shift += 7;
        }
        None
    }
}
