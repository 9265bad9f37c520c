//! Timestamp encoding is adaptive and based on the structure of the
//! timestamps that are encoded.  Values are first delta-encoded in place;
//! the deltas are scaled down by their largest common power-of-10 divisor.
//!
//! If all scaled deltas after the first are equal the time range is
//! run-length encoded (type 2): the header byte carries the log10 of the
//! divisor in its low nibble, followed by the first timestamp as a
//! little-endian u64, the scaled delta as a varint and the value count as
//! a varint.
//!
//! If any delta exceeds the simple8b range the deltas are stored raw
//! (type 0) as little-endian u64s.
//!
//! Otherwise (type 1) the smallest delta is subtracted from the rest and
//! the results, scaled by the divisor, are simple8b packed: header, first
//! timestamp as little-endian u64, the minimum delta as little-endian u64,
//! then 64-bit words in big-endian order.

use bytes::BufMut;

use crate::engine::tsm1::codec::simple8b;
use crate::engine::tsm1::codec::varint::{VarInt, MAX_VARINT_LEN64};
use crate::engine::tsm1::codec::{Decoder, Encoder};

/// TIME_UNCOMPRESSED is an uncompressed format using 8 bytes per timestamp.
const TIME_UNCOMPRESSED: u8 = 0;
/// TIME_COMPRESSED_PACKED_SIMPLE is a bit-packed format using simple8b.
const TIME_COMPRESSED_PACKED_SIMPLE: u8 = 1;
/// TIME_COMPRESSED_RLE is a run-length encoding format.
const TIME_COMPRESSED_RLE: u8 = 2;

/// TimeEncoder encodes unix-nano timestamps into byte slices.
pub struct TimeEncoder {
    ts: Vec<u64>,
}

impl TimeEncoder {
    pub fn new(sz: usize) -> Self {
        Self {
            ts: Vec::with_capacity(sz),
        }
    }

    /// Rewrites ts to per-position deltas and returns the largest delta,
    /// the smallest delta, the common power-of-10 divisor and whether the
    /// deltas can be run-length encoded.
    fn reduce(&mut self) -> (u64, u64, u64, bool) {
        let deltas = self.ts.as_mut_slice();

        let mut max = 0u64;
        let mut min = u64::MAX;
        let mut divisor = 1_000_000_000_000_u64;
        let mut rle = true;

        // Iterate in reverse so the deltas can be applied in place.
        for i in (1..deltas.len()).rev() {
            deltas[i] = deltas[i].wrapping_sub(deltas[i - 1]);

            let v = deltas[i];
            if v > max {
                max = v;
            }
            if v < min {
                min = v;
            }

            // Decay the divisor until it divides this delta.
            while divisor > 1 && v % divisor != 0 {
                divisor /= 10;
            }

            rle = i == deltas.len() - 1 || (rle && deltas[i + 1] == deltas[i]);
        }

        (max, min, divisor, rle)
    }

    fn encode_packed(&mut self, div: u64, min: u64) -> anyhow::Result<Vec<u8>> {
        let mut deltas: Vec<u64> = self.ts[1..]
            .iter()
            .map(|v| (v.wrapping_sub(min)) / div)
            .collect();
        let words = simple8b::encode_all(&mut deltas)?;

        let mut b = Vec::with_capacity(1 + 16 + words * 8);

        // 4 high bits are the encoding type, 4 low bits the log10 divisor.
        b.push(TIME_COMPRESSED_PACKED_SIMPLE << 4 | log10(div));
        // The first timestamp, unscaled.
        b.put_u64_le(self.ts[0]);
        // The smallest delta.
        b.put_u64_le(min);
        for w in &deltas[..words] {
            b.put_u64(*w);
        }

        Ok(b)
    }

    fn encode_rle(&self, first: u64, delta: u64, div: u64) -> anyhow::Result<Vec<u8>> {
        let mut b = Vec::with_capacity(1 + 8 + 2 * MAX_VARINT_LEN64);

        // 4 high bits are the encoding type, 4 low bits the log10 divisor.
        b.push(TIME_COMPRESSED_RLE << 4 | log10(div));
        // The first timestamp.
        b.put_u64_le(first);

        let mut tmp = [0u8; MAX_VARINT_LEN64];
        // The scaled delta between every timestamp.
        let n = (delta / div).encode_var(&mut tmp);
        b.extend_from_slice(&tmp[..n]);
        // The number of timestamps.
        let n = (self.ts.len() as u64).encode_var(&mut tmp);
        b.extend_from_slice(&tmp[..n]);

        Ok(b)
    }

    fn encode_raw(&self) -> anyhow::Result<Vec<u8>> {
        let mut b = Vec::with_capacity(1 + self.ts.len() * 8);
        b.push(TIME_UNCOMPRESSED << 4);
        for v in &self.ts {
            b.put_u64_le(*v);
        }
        Ok(b)
    }
}

impl Encoder<i64> for TimeEncoder {
    fn write(&mut self, v: i64) {
        self.ts.push(v as u64);
    }

    fn bytes(&mut self) -> anyhow::Result<Vec<u8>> {
        if self.ts.is_empty() {
            return Ok(vec![]);
        }

        let (max, min, div, rle) = self.reduce();

        // The deltas are all the same, so run-length encode them.
        if rle && self.ts.len() > 1 {
            return self.encode_rle(self.ts[0], self.ts[1], div);
        }

        // A delta exceeds the simple8b range, store the deltas raw.
        if max > simple8b::MAX_VALUE {
            return self.encode_raw();
        }

        self.encode_packed(div, min)
    }

    fn reset(&mut self) {
        self.ts.clear();
    }
}

fn log10(div: u64) -> u8 {
    (div as f64).log10() as u8
}

pub enum TimeDecoder<'a> {
    Rle(RleDecoder),
    Packed(PackedDecoder<'a>),
    Uncompressed(UncompressedDecoder<'a>),
    Empty,
}

impl<'a> TimeDecoder<'a> {
    pub fn new(b: &'a [u8]) -> anyhow::Result<Self> {
        if b.is_empty() {
            return Ok(TimeDecoder::Empty);
        }

        let encoding = b[0] >> 4;
        // The low nibble holds the base-10 exponent used to scale the
        // deltas back up.
        let div = u64::pow(10, (b[0] & 0xF) as u32);

        let b = &b[1..];
        match encoding {
            TIME_UNCOMPRESSED => Ok(TimeDecoder::Uncompressed(UncompressedDecoder::new(b)?)),
            TIME_COMPRESSED_PACKED_SIMPLE => Ok(TimeDecoder::Packed(PackedDecoder::new(b, div)?)),
            TIME_COMPRESSED_RLE => Ok(TimeDecoder::Rle(RleDecoder::new(b, div)?)),
            _ => Err(anyhow!("unknown timestamp encoding {}", encoding)),
        }
    }
}

impl<'a> Decoder<i64> for TimeDecoder<'a> {
    fn next(&mut self) -> bool {
        match self {
            Self::Rle(d) => d.next(),
            Self::Packed(d) => d.next(),
            Self::Uncompressed(d) => d.next(),
            Self::Empty => false,
        }
    }

    fn read(&self) -> i64 {
        match self {
            Self::Rle(d) => d.read(),
            Self::Packed(d) => d.read(),
            Self::Uncompressed(d) => d.read(),
            Self::Empty => 0,
        }
    }

    fn err(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Rle(d) => d.err(),
            Self::Packed(d) => d.err(),
            Self::Uncompressed(d) => d.err(),
            Self::Empty => None,
        }
    }
}

pub struct RleDecoder {
    ts: i64,
    delta: i64,
    repeat: u64,
    step: i64,
}

impl RleDecoder {
    fn new(b: &[u8], div: u64) -> anyhow::Result<Self> {
        if b.len() < 8 {
            return Err(anyhow!("TimeDecoder: not enough data to decode RLE value"));
        }

        let first = u64::from_le_bytes(b[..8].try_into().unwrap());
        let mut i = 8;

        let (delta, n) =
            u64::decode_var(&b[i..]).ok_or_else(|| anyhow!("TimeDecoder: invalid RLE delta"))?;
        i += n;

        let (repeat, _) =
            u64::decode_var(&b[i..]).ok_or_else(|| anyhow!("TimeDecoder: invalid RLE count"))?;

        Ok(Self {
            ts: first as i64,
            delta: delta.wrapping_mul(div) as i64,
            repeat,
            step: -1,
        })
    }
}

impl Decoder<i64> for RleDecoder {
    fn next(&mut self) -> bool {
        self.step += 1;

        if self.step >= self.repeat as i64 {
            return false;
        }

        if self.step > 0 {
            self.ts = self.ts.wrapping_add(self.delta);
        }

        true
    }

    fn read(&self) -> i64 {
        self.ts
    }

    fn err(&self) -> Option<&anyhow::Error> {
        None
    }
}

pub struct PackedDecoder<'a> {
    ts: i64,
    div: u64,
    min: u64,

    bytes: &'a [u8],
    b_step: usize,

    values: [u64; 240],
    v_step: usize,
    v_len: usize,

    started: bool,
    err: Option<anyhow::Error>,
}

impl<'a> PackedDecoder<'a> {
    fn new(b: &'a [u8], div: u64) -> anyhow::Result<Self> {
        if b.len() < 16 {
            return Err(anyhow!(
                "TimeDecoder: not enough data to decode packed value"
            ));
        }

        let first = u64::from_le_bytes(b[..8].try_into().unwrap());
        let min = u64::from_le_bytes(b[8..16].try_into().unwrap());

        Ok(Self {
            ts: first as i64,
            div,
            min,
            bytes: &b[16..],
            b_step: 0,
            values: [0; 240],
            v_step: 0,
            v_len: 0,
            started: false,
            err: None,
        })
    }

    fn apply(&mut self, v: u64) {
        // The stored value is (delta - min) / div.
        let delta = v.wrapping_mul(self.div).wrapping_add(self.min);
        self.ts = self.ts.wrapping_add(delta as i64);
    }
}

impl<'a> Decoder<i64> for PackedDecoder<'a> {
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
            let v = self.values[self.v_step];
            self.apply(v);
            return true;
        }

        if self.b_step == self.bytes.len() {
            return false;
        } else if self.b_step + 8 > self.bytes.len() {
            self.err = Some(anyhow!("TimeDecoder: truncated packed word"));
            return false;
        }

        let word = u64::from_be_bytes(
            self.bytes[self.b_step..self.b_step + 8]
                .try_into()
                .unwrap(),
        );
        match simple8b::decode(&mut self.values, word) {
            Ok(0) => {
                self.err = Some(anyhow!("TimeDecoder: simple8b length is 0"));
                return false;
            }
            Ok(n) => self.v_len = n,
            Err(e) => {
                self.err = Some(e);
                return false;
            }
        }

        self.v_step = 0;
        self.b_step += 8;
        let v = self.values[0];
        self.apply(v);
        true
    }

    fn read(&self) -> i64 {
        self.ts
    }

    fn err(&self) -> Option<&anyhow::Error> {
        self.err.as_ref()
    }
}

pub struct UncompressedDecoder<'a> {
    ts: i64,
    bytes: &'a [u8],
    b_step: usize,
    err: Option<anyhow::Error>,
}

impl<'a> UncompressedDecoder<'a> {
    fn new(b: &'a [u8]) -> anyhow::Result<Self> {
        if b.len() < 8 {
            return Err(anyhow!(
                "TimeDecoder: not enough data to decode raw value"
            ));
        }

        let first = u64::from_le_bytes(b[..8].try_into().unwrap());

        Ok(Self {
            ts: first as i64,
            bytes: b,
            b_step: 0,
            err: None,
        })
    }
}

impl<'a> Decoder<i64> for UncompressedDecoder<'a> {
    fn next(&mut self) -> bool {
        if self.b_step == 0 {
            self.b_step += 8;
            return true;
        }

        if self.b_step == self.bytes.len() {
            return false;
        } else if self.b_step + 8 > self.bytes.len() {
            self.err = Some(anyhow!("TimeDecoder: truncated raw value"));
            return false;
        }

        let delta = u64::from_le_bytes(
            self.bytes[self.b_step..self.b_step + 8]
                .try_into()
                .unwrap(),
        );
        self.ts = self.ts.wrapping_add(delta as i64);
        self.b_step += 8;
        true
    }

    fn read(&self) -> i64 {
        self.ts
    }

    fn err(&self) -> Option<&anyhow::Error> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{
        TimeDecoder, TimeEncoder, TIME_COMPRESSED_PACKED_SIMPLE, TIME_COMPRESSED_RLE,
        TIME_UNCOMPRESSED,
    };
    use crate::engine::tsm1::codec::simple8b;
    use crate::engine::tsm1::codec::{Decoder, Encoder};

    fn decode_all(b: &[u8]) -> Vec<i64> {
        let mut dec = TimeDecoder::new(b).expect("decoder init failed");
        let mut out = vec![];
        while dec.next() {
            out.push(dec.read());
        }
        assert!(dec.err().is_none(), "decoder error: {:?}", dec.err());
        out
    }

    #[test]
    fn test_time_encoder_packed() {
        let src = [1000i64, 2000, 4000, 6000, 7000, 8000];

        let mut enc = TimeEncoder::new(src.len());
        for v in src {
            enc.write(v);
        }

        let b = enc.bytes().unwrap();
        let got = b[0] >> 4;
        assert_eq!(
            got, TIME_COMPRESSED_PACKED_SIMPLE,
            "wrong encoding used: exp packed, got {}",
            got
        );
        assert_eq!(b[0] & 0xF, 3, "divisor log mismatch: got {}, exp {}", b[0] & 0xF, 3);

        // First packed deltas are (2000-1000-1000)/1000 and
        // (4000-2000-1000)/1000.
        let word = u64::from_be_bytes(b[17..25].try_into().unwrap());
        let mut buf = [0u64; 240];
        let n = simple8b::decode(&mut buf, word).unwrap();
        assert!(n >= 2, "expected at least two packed deltas, got {}", n);
        assert_eq!(buf[0], 0, "first delta mismatch: got {}, exp {}", buf[0], 0);
        assert_eq!(buf[1], 1, "second delta mismatch: got {}, exp {}", buf[1], 1);

        assert_eq!(decode_all(&b), src, "decoded timestamps mismatch");
    }

    #[test]
    fn test_time_encoder_rle() {
        let src = [1000i64, 2000, 3000, 4000, 5000, 6000];

        let mut enc = TimeEncoder::new(src.len());
        for v in src {
            enc.write(v);
        }

        let b = enc.bytes().unwrap();
        let got = b[0] >> 4;
        assert_eq!(
            got, TIME_COMPRESSED_RLE,
            "wrong encoding used: exp rle, got {}",
            got
        );
        assert_eq!(b[0] & 0xF, 3, "divisor log mismatch: got {}, exp {}", b[0] & 0xF, 3);

        assert_eq!(decode_all(&b), src, "decoded timestamps mismatch");
    }

    #[test]
    fn test_time_encoder_rle_large_range() {
        let src = [1442369134000000000i64, 1442369135000000000];

        let mut enc = TimeEncoder::new(src.len());
        for v in src {
            enc.write(v);
        }

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, TIME_COMPRESSED_RLE, "expected rle");
        assert_eq!(decode_all(&b), src, "decoded timestamps mismatch");
    }

    #[test]
    fn test_time_encoder_one() {
        let mut enc = TimeEncoder::new(1);
        enc.write(0);

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, TIME_COMPRESSED_PACKED_SIMPLE, "expected packed");
        assert_eq!(decode_all(&b), [0], "decoded timestamps mismatch");
    }

    #[test]
    fn test_time_encoder_two() {
        let mut enc = TimeEncoder::new(2);
        enc.write(0);
        enc.write(1);

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, TIME_COMPRESSED_RLE, "expected rle");
        assert_eq!(decode_all(&b), [0, 1], "decoded timestamps mismatch");
    }

    #[test]
    fn test_time_encoder_three() {
        let mut enc = TimeEncoder::new(3);
        enc.write(0);
        enc.write(1);
        enc.write(3);

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, TIME_COMPRESSED_PACKED_SIMPLE, "expected packed");
        assert_eq!(decode_all(&b), [0, 1, 3], "decoded timestamps mismatch");
    }

    #[test]
    fn test_time_encoder_no_values() {
        let mut enc = TimeEncoder::new(0);
        let b = enc.bytes().unwrap();

        let mut dec = TimeDecoder::new(&b).unwrap();
        assert!(!dec.next(), "unexpected next value: got true, exp false");
    }

    #[test]
    fn test_time_encoder_raw() {
        // A negative jump produces a delta above the simple8b range, which
        // forces the raw encoding.
        let src = [3i64, 2, 0];

        let mut enc = TimeEncoder::new(src.len());
        for v in src {
            enc.write(v);
        }

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, TIME_UNCOMPRESSED, "expected raw");
        assert_eq!(b.len(), 25, "length mismatch: got {}, exp {}", b.len(), 25);
        assert_eq!(decode_all(&b), src, "decoded timestamps mismatch");
    }

    #[test]
    fn test_time_encoder_large_raw() {
        let src = [0i64, 1, 1152921506606846976];

        let mut enc = TimeEncoder::new(src.len());
        for v in src {
            enc.write(v);
        }

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, TIME_UNCOMPRESSED, "expected raw");
        assert_eq!(decode_all(&b), src, "decoded timestamps mismatch");
    }

    #[test]
    fn test_time_encoder_irregular_nanos() {
        let src = [1i64, 5, 12, 13, 27, 28, 30, 1000, 1001];

        let mut enc = TimeEncoder::new(src.len());
        for v in src {
            enc.write(v);
        }

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, TIME_COMPRESSED_PACKED_SIMPLE, "expected packed");
        assert_eq!(b[0] & 0xF, 0, "divisor log mismatch: got {}, exp {}", b[0] & 0xF, 0);
        assert_eq!(decode_all(&b), src, "decoded timestamps mismatch");
    }

    #[test]
    fn test_time_encoder_reset_reuse() {
        let mut enc = TimeEncoder::new(4);
        enc.write(10);
        enc.write(20);
        let _ = enc.bytes().unwrap();

        enc.reset();
        let src = [5i64, 6, 7, 9];
        for v in src {
            enc.write(v);
        }
        let b = enc.bytes().unwrap();
        assert_eq!(decode_all(&b), src, "decoded timestamps mismatch after reset");
    }

    #[test]
    fn test_time_encoder_block_of_1920() {
        let src: Vec<i64> = (0..1920).map(|i| 1_000_000_000 * i).collect();

        let mut enc = TimeEncoder::new(src.len());
        for v in &src {
            enc.write(*v);
        }

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, TIME_COMPRESSED_RLE, "expected rle");
        assert_eq!(decode_all(&b), src, "decoded timestamps mismatch");
    }
}
