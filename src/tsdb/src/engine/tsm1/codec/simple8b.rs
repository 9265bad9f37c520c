//! Simple8b packs integers below 1 << 60 into 64-bit words.  The 4 high
//! bits of each word select one of 16 packings; the remaining 60 bits hold
//! the payload.  Selectors 0 and 1 are special and encode runs of 240 and
//! 120 ones using no payload bits at all.
//!
//! ┌──────────────┬─────────────────────────────────────────────────────────────┐
//! │   Selector   │       0    1   2   3   4   5   6   7  8  9 10 11 12 13 14 15│
//! ├──────────────┼─────────────────────────────────────────────────────────────┤
//! │     Bits     │       0    0   1   2   3   4   5   6  7  8 10 12 15 20 30 60│
//! ├──────────────┼─────────────────────────────────────────────────────────────┤
//! │      N       │     240  120  60  30  20  15  12  10  8  7  6  5  4  3  2  1│
//! └──────────────┴─────────────────────────────────────────────────────────────┘

/// MAX_VALUE is the largest value that can be encoded.
pub const MAX_VALUE: u64 = (1 << 60) - 1;

struct Packing {
    n: usize,
    bit: usize,
}

static SELECTOR: [Packing; 16] = [
    Packing { n: 240, bit: 0 },
    Packing { n: 120, bit: 0 },
    Packing { n: 60, bit: 1 },
    Packing { n: 30, bit: 2 },
    Packing { n: 20, bit: 3 },
    Packing { n: 15, bit: 4 },
    Packing { n: 12, bit: 5 },
    Packing { n: 10, bit: 6 },
    Packing { n: 8, bit: 7 },
    Packing { n: 7, bit: 8 },
    Packing { n: 6, bit: 10 },
    Packing { n: 5, bit: 12 },
    Packing { n: 4, bit: 15 },
    Packing { n: 3, bit: 20 },
    Packing { n: 2, bit: 30 },
    Packing { n: 1, bit: 60 },
];

/// Packs src into 64-bit words written back over the front of src, and
/// returns the number of words produced.  Values above [`MAX_VALUE`] fail
/// with "value out of bounds".
pub fn encode_all(src: &mut [u64]) -> anyhow::Result<usize> {
    let src_len = src.len();
    let mut i = 0;
    let mut j = 0;

    'outer: while i < src_len {
        for (sel, p) in SELECTOR.iter().enumerate() {
            if !can_pack(&src[i..], p.n, p.bit) {
                continue;
            }
            let word = pack(sel as u64, p, &src[i..i + p.n]);
            src[j] = word;
            i += p.n;
            j += 1;
            continue 'outer;
        }
        return Err(anyhow!("value out of bounds"));
    }

    Ok(j)
}

/// Unpacks a single word into dst, returning the number of values written.
/// dst must hold at least 240 values.
pub fn decode(dst: &mut [u64], v: u64) -> anyhow::Result<usize> {
    let sel = (v >> 60) as usize;
    if sel >= SELECTOR.len() {
        return Err(anyhow!("invalid selector value: {}", sel));
    }
    let p = &SELECTOR[sel];

    if p.bit == 0 {
        for d in dst.iter_mut().take(p.n) {
            *d = 1;
        }
        return Ok(p.n);
    }

    let mask = (1u64 << p.bit) - 1;
    for (i, d) in dst.iter_mut().take(p.n).enumerate() {
        *d = (v >> (i * p.bit)) & mask;
    }
    Ok(p.n)
}

/// Unpacks every word of src into dst, returning the number of values
/// written.
pub fn decode_all(dst: &mut [u64], src: &[u64]) -> anyhow::Result<usize> {
    let mut j = 0;
    for v in src {
        j += decode(&mut dst[j..], *v)?;
    }
    Ok(j)
}

fn pack(sel: u64, p: &Packing, src: &[u64]) -> u64 {
    let mut w = sel << 60;
    if p.bit == 0 {
        return w;
    }
    for (i, v) in src.iter().enumerate() {
        w |= v << (i * p.bit);
    }
    w
}

fn can_pack(src: &[u64], n: usize, bits: usize) -> bool {
    if src.len() < n {
        return false;
    }

    // Selectors 0 and 1 use no bits and encode runs of ones.
    if bits == 0 {
        return src[..n].iter().all(|v| *v == 1);
    }

    let max = (1u64 << bits) - 1;
    src[..n].iter().all(|v| *v <= max)
}
