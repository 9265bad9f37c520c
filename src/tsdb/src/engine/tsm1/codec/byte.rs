//! Byte values are stored as deltas from the previous value, biased by
//! +128 so a delta always lands in [0, 255].  Two encodings share a 1-byte
//! header whose 4 high bits carry the type:
//!
//! RLE (type 2) is used when every biased delta after the first repeats:
//! the first biased value, the repeated biased delta, then a varint count.
//!
//! Packed (type 1) subtracts the smallest biased delta from the rest and
//! compresses the result with the byte-oriented simple8b variant; the
//! header is followed by that minimum, the first biased value minus the
//! minimum, and the 32-bit words in big-endian order.

use bytes::BufMut;

use crate::engine::tsm1::codec::compress;
use crate::engine::tsm1::codec::varint::{VarInt, MAX_VARINT_LEN64};
use crate::engine::tsm1::codec::{Decoder, Encoder};

/// BYTE_COMPRESSED_SIMPLE is a bit-packed format using the byte-oriented
/// simple8b encoding.
const BYTE_COMPRESSED_SIMPLE: u8 = 1;
/// BYTE_COMPRESSED_RLE is a run-length encoding format.
const BYTE_COMPRESSED_RLE: u8 = 2;

/// ByteEncoder encodes u8 samples into byte slices.
pub struct ByteEncoder {
    prev: u8,
    rle: bool,
    values: Vec<u8>,
}

impl ByteEncoder {
    pub fn new(sz: usize) -> Self {
        Self {
            prev: 0,
            rle: true,
            values: Vec::with_capacity(sz),
        }
    }

    fn encode_rle(&self) -> anyhow::Result<Vec<u8>> {
        // 3 fixed bytes plus a varint count.
        let mut b = Vec::with_capacity(3 + MAX_VARINT_LEN64);

        // 4 high bits hold the encoding type.
        b.push(BYTE_COMPRESSED_RLE << 4);
        // The first biased value.
        b.push(self.values[0]);
        // The repeated biased delta.
        b.push(self.values[1]);
        // The number of times the delta repeats.
        let mut tmp = [0u8; MAX_VARINT_LEN64];
        let n = ((self.values.len() - 1) as u64).encode_var(&mut tmp);
        b.extend_from_slice(&tmp[..n]);

        Ok(b)
    }

    fn encode_packed(&mut self) -> anyhow::Result<Vec<u8>> {
        if self.values.is_empty() {
            return Ok(vec![]);
        }

        let mut min = 255u8;
        for v in &self.values[1..] {
            if *v < min {
                min = *v;
            }
        }

        // Re-bias the body in place to deltas above the minimum.
        for v in &mut self.values[1..] {
            *v = v.wrapping_sub(min);
        }

        let encoded = compress::compress_all(&self.values[1..])?;

        let mut b = Vec::with_capacity(3 + encoded.len() * 4);
        // 4 high bits hold the encoding type.
        b.push(BYTE_COMPRESSED_SIMPLE << 4);
        // The smallest biased delta.
        b.push(min);
        // The first biased value, stored outside the packed words.
        b.push(self.values[0].wrapping_sub(min));

        for w in encoded {
            b.put_u32(w);
        }

        Ok(b)
    }
}

impl Encoder<u8> for ByteEncoder {
    fn write(&mut self, v: u8) {
        // Deltas roll over; the +128 bias keeps a small negative delta
        // near the middle of the byte range.
        let delta = v.wrapping_sub(self.prev);
        self.prev = v;
        let enc = delta.wrapping_add(128);

        if self.values.len() > 1 {
            self.rle = self.rle && self.values[self.values.len() - 1] == enc;
        }

        self.values.push(enc);
    }

    fn bytes(&mut self) -> anyhow::Result<Vec<u8>> {
        // Only run-length encode if it could reduce storage size.
        if self.rle && self.values.len() > 2 {
            return self.encode_rle();
        }

        self.encode_packed()
    }

    fn reset(&mut self) {
        self.prev = 0;
        self.rle = true;
        self.values.clear();
    }
}

pub enum ByteDecoder<'a> {
    Rle(RleDecoder),
    Packed(PackedDecoder<'a>),
    Empty,
}

impl<'a> ByteDecoder<'a> {
    pub fn new(b: &'a [u8]) -> anyhow::Result<Self> {
        if b.is_empty() {
            return Ok(ByteDecoder::Empty);
        }

        match b[0] >> 4 {
            BYTE_COMPRESSED_RLE => Ok(ByteDecoder::Rle(RleDecoder::new(&b[1..])?)),
            BYTE_COMPRESSED_SIMPLE => Ok(ByteDecoder::Packed(PackedDecoder::new(&b[1..])?)),
            encoding => Err(anyhow!("unknown byte encoding {}", encoding)),
        }
    }
}

impl<'a> Decoder<u8> for ByteDecoder<'a> {
    fn next(&mut self) -> bool {
        match self {
            Self::Rle(d) => d.next(),
            Self::Packed(d) => d.next(),
            Self::Empty => false,
        }
    }

    fn read(&self) -> u8 {
        match self {
            Self::Rle(d) => d.read(),
            Self::Packed(d) => d.read(),
            Self::Empty => 0,
        }
    }

    fn err(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Rle(d) => d.err(),
            Self::Packed(d) => d.err(),
            Self::Empty => None,
        }
    }
}

pub struct RleDecoder {
    value: u8,
    delta: u8,
    repeat: u64,
    step: i64,
}

impl RleDecoder {
    fn new(b: &[u8]) -> anyhow::Result<Self> {
        if b.len() < 3 {
            return Err(anyhow!("ByteDecoder: not enough data to decode RLE"));
        }

        let (repeat, _) =
            u64::decode_var(&b[2..]).ok_or_else(|| anyhow!("ByteDecoder: invalid RLE count"))?;

        Ok(Self {
            // The first stored byte is the biased first value.
            value: b[0].wrapping_sub(128),
            delta: b[1],
            repeat: repeat + 1,
            step: -1,
        })
    }
}

impl Decoder<u8> for RleDecoder {
    fn next(&mut self) -> bool {
        self.step += 1;

        if self.step >= self.repeat as i64 {
            return false;
        }

        if self.step > 0 {
            self.value = self.value.wrapping_add(self.delta).wrapping_sub(128);
        }

        true
    }

    fn read(&self) -> u8 {
        self.value
    }

    fn err(&self) -> Option<&anyhow::Error> {
        None
    }
}

pub struct PackedDecoder<'a> {
    value: u8,
    min: u8,

    bytes: &'a [u8],
    b_step: usize,

    buf: [u8; 240],
    v_step: usize,
    v_len: usize,

    started: bool,
    err: Option<anyhow::Error>,
}

impl<'a> PackedDecoder<'a> {
    fn new(b: &'a [u8]) -> anyhow::Result<Self> {
        if b.len() < 2 {
            return Err(anyhow!("ByteDecoder: not enough data to decode packed value"));
        }

        let min = b[0];

        Ok(Self {
            // The first value is stored unpacked, biased and shifted by min.
            value: b[1].wrapping_add(min).wrapping_sub(128),
            min,
            bytes: &b[2..],
            b_step: 0,
            buf: [0; 240],
            v_step: 0,
            v_len: 0,
            started: false,
            err: None,
        })
    }

    fn apply(&mut self, packed: u8) {
        let delta = packed.wrapping_add(self.min);
        self.value = self.value.wrapping_add(delta).wrapping_sub(128);
    }
}

impl<'a> Decoder<u8> for PackedDecoder<'a> {
    fn next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }

        if !self.started {
            self.started = true;
            return true;
        }

        if self.v_len > 0 && self.v_step < self.v_len - 1 {
            self.v_step += 1;
            let packed = self.buf[self.v_step];
            self.apply(packed);
            return true;
        }

        if self.b_step == self.bytes.len() {
            return false;
        } else if self.b_step + 4 > self.bytes.len() {
            self.err = Some(anyhow!("ByteDecoder: truncated packed word"));
            return false;
        }

        let v = u32::from_be_bytes(
            self.bytes[self.b_step..self.b_step + 4]
                .try_into()
                .unwrap(),
        );
        match compress::decompress(&mut self.buf, v) {
            Ok(n) => self.v_len = n,
            Err(e) => {
                self.err = Some(e);
                return false;
            }
        }

        self.v_step = 0;
        self.b_step += 4;
        let packed = self.buf[0];
        self.apply(packed);
        true
    }

    fn read(&self) -> u8 {
        self.value
    }

    fn err(&self) -> Option<&anyhow::Error> {
        self.err.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::{ByteDecoder, ByteEncoder, BYTE_COMPRESSED_RLE, BYTE_COMPRESSED_SIMPLE};
    use crate::engine::tsm1::codec::{Decoder, Encoder};

    fn decode_all(b: &[u8]) -> Vec<u8> {
        let mut dec = ByteDecoder::new(b).expect("decoder init failed");
        let mut out = vec![];
        while dec.next() {
            out.push(dec.read());
        }
        assert!(dec.err().is_none(), "decoder error: {:?}", dec.err());
        out
    }

    #[test]
    fn test_byte_encoder_rle() {
        let src = [10u8, 20, 30, 40, 50, 60];

        let mut enc = ByteEncoder::new(src.len());
        for v in src {
            enc.write(v);
        }

        let b = enc.bytes().unwrap();
        let got = b[0] >> 4;
        assert_eq!(
            got, BYTE_COMPRESSED_RLE,
            "wrong encoding used: exp rle, got {}",
            got
        );

        assert_eq!(decode_all(&b), src, "decoded values mismatch");
    }

    #[test]
    fn test_byte_encoder_packed() {
        let src = [20u8, 30, 40, 70, 80, 90];

        let mut enc = ByteEncoder::new(src.len());
        for v in src {
            enc.write(v);
        }

        let b = enc.bytes().unwrap();
        let got = b[0] >> 4;
        assert_eq!(
            got, BYTE_COMPRESSED_SIMPLE,
            "wrong encoding used: exp packed, got {}",
            got
        );

        // The smallest biased delta is 10 + 128.
        assert_eq!(b[1], 10 + 128, "min mismatch: got {}, exp {}", b[1], 10 + 128);

        // First packed word holds the min-relative deltas 0,0,20,0,0.
        let word = u32::from_be_bytes(b[3..7].try_into().unwrap());
        let mut buf = [0u8; 240];
        let n = super::compress::decompress(&mut buf, word).unwrap();
        assert_eq!(n, 5, "packed count mismatch: got {}, exp {}", n, 5);
        assert_eq!(&buf[..5], &[0, 0, 20, 0, 0], "packed deltas mismatch");

        assert_eq!(decode_all(&b), src, "decoded values mismatch");
    }

    #[test]
    fn test_byte_encoder_one() {
        let mut enc = ByteEncoder::new(1);
        enc.write(77);

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, BYTE_COMPRESSED_SIMPLE);
        assert_eq!(decode_all(&b), [77], "decoded values mismatch");
    }

    #[test]
    fn test_byte_encoder_two() {
        let mut enc = ByteEncoder::new(2);
        enc.write(5);
        enc.write(255);

        let b = enc.bytes().unwrap();
        assert_eq!(decode_all(&b), [5, 255], "decoded values mismatch");
    }

    #[test]
    fn test_byte_encoder_no_values() {
        let mut enc = ByteEncoder::new(0);
        let b = enc.bytes().unwrap();
        assert!(b.is_empty(), "expected empty buffer");

        let mut dec = ByteDecoder::new(&b).unwrap();
        assert!(!dec.next(), "unexpected next value: got true, exp false");
    }

    #[test]
    fn test_byte_encoder_descending_wraps() {
        let src = [200u8, 150, 100, 50, 0, 250];

        let mut enc = ByteEncoder::new(src.len());
        for v in src {
            enc.write(v);
        }

        let b = enc.bytes().unwrap();
        assert_eq!(decode_all(&b), src, "decoded values mismatch");
    }

    #[test]
    fn test_byte_encoder_constant_run() {
        let src = [42u8; 100];

        let mut enc = ByteEncoder::new(src.len());
        for v in src {
            enc.write(v);
        }

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, BYTE_COMPRESSED_RLE, "expected rle for a constant run");
        assert_eq!(decode_all(&b), src, "decoded values mismatch");
    }

    #[test]
    fn test_byte_encoder_reset_reuse() {
        let mut enc = ByteEncoder::new(4);
        enc.write(1);
        enc.write(2);
        let _ = enc.bytes().unwrap();

        enc.reset();
        let src = [9u8, 9, 9, 9];
        for v in src {
            enc.write(v);
        }
        let b = enc.bytes().unwrap();
        assert_eq!(decode_all(&b), src, "decoded values mismatch after reset");
    }

    #[test]
    fn test_byte_encoder_large_block() {
        let src: Vec<u8> = (0u32..1920).map(|i| (i * 13 % 251) as u8).collect();

        let mut enc = ByteEncoder::new(src.len());
        for v in &src {
            enc.write(*v);
        }

        let b = enc.bytes().unwrap();
        assert_eq!(decode_all(&b), src, "decoded values mismatch");
    }
}
