//! A Simple8b variant tuned for byte-sized values.  Up to 240 values pack
//! into one 32-bit word: the 4 high bits hold the selector, the low 28
//! bits hold the payload.  Selectors 0-5 spend no payload bits and encode
//! runs of all-zero or all-one values.
//!
//! ┌──────────────┬─────────────────────────────────────────────────────────────┐
//! │   Selector   │       0    1   2   3   4   5   6   7  8  9 10 11 12 13 14 15│
//! ├──────────────┼─────────────────────────────────────────────────────────────┤
//! │     Bits     │       0(0) 0(1)0(0)0(1)0(0)0(1)1   1  2  2  3  4  5  7  8  8│
//! ├──────────────┼─────────────────────────────────────────────────────────────┤
//! │      N       │     240  240 120 120  60  60  28  22 14 12  9  7  5  4  3  1│
//! ├──────────────┼─────────────────────────────────────────────────────────────┤
//! │   Wasted Bits│      28   28  28  28  28  28   0   6  0  4  1  0  3  0  4 20│
//! └──────────────┴─────────────────────────────────────────────────────────────┘

/// MAX_PER_WORD is the most values a single word can carry.
pub const MAX_PER_WORD: usize = 240;

struct Packing {
    n: usize,
    unpack: fn(u32, &mut [u8; 240]),
}

static SELECTOR: [Packing; 16] = [
    Packing { n: 240, unpack: unpack_zero },
    Packing { n: 240, unpack: unpack_one },
    Packing { n: 120, unpack: unpack_zero },
    Packing { n: 120, unpack: unpack_one },
    Packing { n: 60, unpack: unpack_zero },
    Packing { n: 60, unpack: unpack_one },
    Packing { n: 28, unpack: unpack_bit1 },
    Packing { n: 22, unpack: unpack_bit1 },
    Packing { n: 14, unpack: unpack_bit2 },
    Packing { n: 12, unpack: unpack_bit2 },
    Packing { n: 9, unpack: unpack_bit3 },
    Packing { n: 7, unpack: unpack_bit4 },
    Packing { n: 5, unpack: unpack_bit5 },
    Packing { n: 4, unpack: unpack_bit7 },
    Packing { n: 3, unpack: unpack_bit8 },
    Packing { n: 1, unpack: unpack_bit8 },
];

/// Unpacks a single word into dst, returning the number of values decoded.
pub fn decompress(dst: &mut [u8; 240], v: u32) -> anyhow::Result<usize> {
    let sel = (v >> 28) as usize;
    if sel >= SELECTOR.len() {
        return Err(anyhow!("invalid selector value: {}", sel));
    }
    (SELECTOR[sel].unpack)(v, dst);
    Ok(SELECTOR[sel].n)
}

/// Packs src into 32-bit words, always choosing the lowest-index selector
/// whose predicate holds for the next run of values.
pub fn compress_all(src: &[u8]) -> anyhow::Result<Vec<u32>> {
    let mut dst = Vec::with_capacity(src.len() / 3 + 1);
    let mut i = 0;

    while i < src.len() {
        let remaining = &src[i..];

        if can_pack(remaining, 240, 0, 0) {
            // selector 0
            dst.push(0);
            i += 240;
        } else if can_pack(remaining, 240, 0, 1) {
            // selector 1
            dst.push(1 << 28);
            i += 240;
        } else if can_pack(remaining, 120, 0, 0) {
            // selector 2
            dst.push(2 << 28);
            i += 120;
        } else if can_pack(remaining, 120, 0, 1) {
            // selector 3
            dst.push(3 << 28);
            i += 120;
        } else if can_pack(remaining, 60, 0, 0) {
            // selector 4
            dst.push(4 << 28);
            i += 60;
        } else if can_pack(remaining, 60, 0, 1) {
            // selector 5
            dst.push(5 << 28);
            i += 60;
        } else if can_pack(remaining, 28, 1, 0) {
            // selector 6
            dst.push(pack28(&src[i..i + 28]));
            i += 28;
        } else if can_pack(remaining, 22, 1, 0) {
            // selector 7
            dst.push(pack22(&src[i..i + 22]));
            i += 22;
        } else if can_pack(remaining, 14, 2, 0) {
            // selector 8
            dst.push(pack14(&src[i..i + 14]));
            i += 14;
        } else if can_pack(remaining, 12, 2, 0) {
            // selector 9
            dst.push(pack12(&src[i..i + 12]));
            i += 12;
        } else if can_pack(remaining, 9, 3, 0) {
            // selector 10
            dst.push(pack9(&src[i..i + 9]));
            i += 9;
        } else if can_pack(remaining, 7, 4, 0) {
            // selector 11
            dst.push(pack7(&src[i..i + 7]));
            i += 7;
        } else if can_pack(remaining, 5, 5, 0) {
            // selector 12
            dst.push(pack5(&src[i..i + 5]));
            i += 5;
        } else if can_pack(remaining, 4, 7, 0) {
            // selector 13
            dst.push(pack4(&src[i..i + 4]));
            i += 4;
        } else if can_pack(remaining, 3, 8, 0) {
            // selector 14
            dst.push(pack3(&src[i..i + 3]));
            i += 3;
        } else if can_pack(remaining, 1, 8, 0) {
            // selector 15
            dst.push(pack1(&src[i..i + 1]));
            i += 1;
        } else {
            return Err(anyhow!("value out of bounds"));
        }
    }

    Ok(dst)
}

/// Reports whether n values from src can be stored using bits per value.
/// With bits == 0 the run must consist entirely of `expect`.
fn can_pack(src: &[u8], n: usize, bits: usize, expect: u8) -> bool {
    if src.len() < n {
        return false;
    }

    if bits == 0 {
        return src[..n].iter().all(|v| *v == expect);
    }

    let max = (1u32 << bits) - 1;
    src[..n].iter().all(|v| (*v as u32) <= max)
}

/// pack28 packs 28 values using 1 bit each
fn pack28(src: &[u8]) -> u32 {
    let mut w = 6 << 28;
    w |= src[0] as u32;
    w |= (src[1] as u32) << 1;
    w |= (src[2] as u32) << 2;
    w |= (src[3] as u32) << 3;
    w |= (src[4] as u32) << 4;
    w |= (src[5] as u32) << 5;
    w |= (src[6] as u32) << 6;
    w |= (src[7] as u32) << 7;
    w |= (src[8] as u32) << 8;
    w |= (src[9] as u32) << 9;
    w |= (src[10] as u32) << 10;
    w |= (src[11] as u32) << 11;
    w |= (src[12] as u32) << 12;
    w |= (src[13] as u32) << 13;
    w |= (src[14] as u32) << 14;
    w |= (src[15] as u32) << 15;
    w |= (src[16] as u32) << 16;
    w |= (src[17] as u32) << 17;
    w |= (src[18] as u32) << 18;
    w |= (src[19] as u32) << 19;
    w |= (src[20] as u32) << 20;
    w |= (src[21] as u32) << 21;
    w |= (src[22] as u32) << 22;
    w |= (src[23] as u32) << 23;
    w |= (src[24] as u32) << 24;
    w |= (src[25] as u32) << 25;
    w |= (src[26] as u32) << 26;
    w |= (src[27] as u32) << 27;
    w
}

/// pack22 packs 22 values using 1 bit each
fn pack22(src: &[u8]) -> u32 {
    let mut w = 7 << 28;
    w |= src[0] as u32;
    w |= (src[1] as u32) << 1;
    w |= (src[2] as u32) << 2;
    w |= (src[3] as u32) << 3;
    w |= (src[4] as u32) << 4;
    w |= (src[5] as u32) << 5;
    w |= (src[6] as u32) << 6;
    w |= (src[7] as u32) << 7;
    w |= (src[8] as u32) << 8;
    w |= (src[9] as u32) << 9;
    w |= (src[10] as u32) << 10;
    w |= (src[11] as u32) << 11;
    w |= (src[12] as u32) << 12;
    w |= (src[13] as u32) << 13;
    w |= (src[14] as u32) << 14;
    w |= (src[15] as u32) << 15;
    w |= (src[16] as u32) << 16;
    w |= (src[17] as u32) << 17;
    w |= (src[18] as u32) << 18;
    w |= (src[19] as u32) << 19;
    w |= (src[20] as u32) << 20;
    w |= (src[21] as u32) << 21;
    w
}

/// pack14 packs 14 values using 2 bits each
fn pack14(src: &[u8]) -> u32 {
    let mut w = 8 << 28;
    w |= src[0] as u32;
    w |= (src[1] as u32) << 2;
    w |= (src[2] as u32) << 4;
    w |= (src[3] as u32) << 6;
    w |= (src[4] as u32) << 8;
    w |= (src[5] as u32) << 10;
    w |= (src[6] as u32) << 12;
    w |= (src[7] as u32) << 14;
    w |= (src[8] as u32) << 16;
    w |= (src[9] as u32) << 18;
    w |= (src[10] as u32) << 20;
    w |= (src[11] as u32) << 22;
    w |= (src[12] as u32) << 24;
    w |= (src[13] as u32) << 26;
    w
}

/// pack12 packs 12 values using 2 bits each
fn pack12(src: &[u8]) -> u32 {
    let mut w = 9 << 28;
    w |= src[0] as u32;
    w |= (src[1] as u32) << 2;
    w |= (src[2] as u32) << 4;
    w |= (src[3] as u32) << 6;
    w |= (src[4] as u32) << 8;
    w |= (src[5] as u32) << 10;
    w |= (src[6] as u32) << 12;
    w |= (src[7] as u32) << 14;
    w |= (src[8] as u32) << 16;
    w |= (src[9] as u32) << 18;
    w |= (src[10] as u32) << 20;
    w |= (src[11] as u32) << 22;
    w
}

/// pack9 packs 9 values using 3 bits each
fn pack9(src: &[u8]) -> u32 {
    let mut w = 10 << 28;
    w |= src[0] as u32;
    w |= (src[1] as u32) << 3;
    w |= (src[2] as u32) << 6;
    w |= (src[3] as u32) << 9;
    w |= (src[4] as u32) << 12;
    w |= (src[5] as u32) << 15;
    w |= (src[6] as u32) << 18;
    w |= (src[7] as u32) << 21;
    w |= (src[8] as u32) << 24;
    w
}

/// pack7 packs 7 values using 4 bits each
fn pack7(src: &[u8]) -> u32 {
    let mut w = 11 << 28;
    w |= src[0] as u32;
    w |= (src[1] as u32) << 4;
    w |= (src[2] as u32) << 8;
    w |= (src[3] as u32) << 12;
    w |= (src[4] as u32) << 16;
    w |= (src[5] as u32) << 20;
    w |= (src[6] as u32) << 24;
    w
}

/// pack5 packs 5 values using 5 bits each
fn pack5(src: &[u8]) -> u32 {
    let mut w = 12 << 28;
    w |= src[0] as u32;
    w |= (src[1] as u32) << 5;
    w |= (src[2] as u32) << 10;
    w |= (src[3] as u32) << 15;
    w |= (src[4] as u32) << 20;
    w
}

/// pack4 packs 4 values using 7 bits each
fn pack4(src: &[u8]) -> u32 {
    let mut w = 13 << 28;
    w |= src[0] as u32;
    w |= (src[1] as u32) << 7;
    w |= (src[2] as u32) << 14;
    w |= (src[3] as u32) << 21;
    w
}

/// pack3 packs 3 values using 8 bits each
fn pack3(src: &[u8]) -> u32 {
    let mut w = 14 << 28;
    w |= src[0] as u32;
    w |= (src[1] as u32) << 8;
    w |= (src[2] as u32) << 16;
    w
}

/// pack1 packs 1 value using 8 bits
fn pack1(src: &[u8]) -> u32 {
    15 << 28 | src[0] as u32
}

fn unpack_zero(_v: u32, dst: &mut [u8; 240]) {
    dst.fill(0);
}

fn unpack_one(_v: u32, dst: &mut [u8; 240]) {
    dst.fill(1);
}

fn unpack_bit1(v: u32, dst: &mut [u8; 240]) {
    dst[0] = (v & 1) as u8;
    dst[1] = ((v >> 1) & 1) as u8;
    dst[2] = ((v >> 2) & 1) as u8;
    dst[3] = ((v >> 3) & 1) as u8;
    dst[4] = ((v >> 4) & 1) as u8;
    dst[5] = ((v >> 5) & 1) as u8;
    dst[6] = ((v >> 6) & 1) as u8;
    dst[7] = ((v >> 7) & 1) as u8;
    dst[8] = ((v >> 8) & 1) as u8;
    dst[9] = ((v >> 9) & 1) as u8;
    dst[10] = ((v >> 10) & 1) as u8;
    dst[11] = ((v >> 11) & 1) as u8;
    dst[12] = ((v >> 12) & 1) as u8;
    dst[13] = ((v >> 13) & 1) as u8;
    dst[14] = ((v >> 14) & 1) as u8;
    dst[15] = ((v >> 15) & 1) as u8;
    dst[16] = ((v >> 16) & 1) as u8;
    dst[17] = ((v >> 17) & 1) as u8;
    dst[18] = ((v >> 18) & 1) as u8;
    dst[19] = ((v >> 19) & 1) as u8;
    dst[20] = ((v >> 20) & 1) as u8;
    dst[21] = ((v >> 21) & 1) as u8;
    dst[22] = ((v >> 22) & 1) as u8;
    dst[23] = ((v >> 23) & 1) as u8;
    dst[24] = ((v >> 24) & 1) as u8;
    dst[25] = ((v >> 25) & 1) as u8;
    dst[26] = ((v >> 26) & 1) as u8;
    dst[27] = ((v >> 27) & 1) as u8;
}

fn unpack_bit2(v: u32, dst: &mut [u8; 240]) {
    dst[0] = (v & 3) as u8;
    dst[1] = ((v >> 2) & 3) as u8;
    dst[2] = ((v >> 4) & 3) as u8;
    dst[3] = ((v >> 6) & 3) as u8;
    dst[4] = ((v >> 8) & 3) as u8;
    dst[5] = ((v >> 10) & 3) as u8;
    dst[6] = ((v >> 12) & 3) as u8;
    dst[7] = ((v >> 14) & 3) as u8;
    dst[8] = ((v >> 16) & 3) as u8;
    dst[9] = ((v >> 18) & 3) as u8;
    dst[10] = ((v >> 20) & 3) as u8;
    dst[11] = ((v >> 22) & 3) as u8;
    dst[12] = ((v >> 24) & 3) as u8;
    dst[13] = ((v >> 26) & 3) as u8;
}

fn unpack_bit3(v: u32, dst: &mut [u8; 240]) {
    dst[0] = (v & 7) as u8;
    dst[1] = ((v >> 3) & 7) as u8;
    dst[2] = ((v >> 6) & 7) as u8;
    dst[3] = ((v >> 9) & 7) as u8;
    dst[4] = ((v >> 12) & 7) as u8;
    dst[5] = ((v >> 15) & 7) as u8;
    dst[6] = ((v >> 18) & 7) as u8;
    dst[7] = ((v >> 21) & 7) as u8;
    dst[8] = ((v >> 24) & 7) as u8;
}

fn unpack_bit4(v: u32, dst: &mut [u8; 240]) {
    dst[0] = (v & 15) as u8;
    dst[1] = ((v >> 4) & 15) as u8;
    dst[2] = ((v >> 8) & 15) as u8;
    dst[3] = ((v >> 12) & 15) as u8;
    dst[4] = ((v >> 16) & 15) as u8;
    dst[5] = ((v >> 20) & 15) as u8;
    dst[6] = ((v >> 24) & 15) as u8;
}

fn unpack_bit5(v: u32, dst: &mut [u8; 240]) {
    dst[0] = (v & 31) as u8;
    dst[1] = ((v >> 5) & 31) as u8;
    dst[2] = ((v >> 10) & 31) as u8;
    dst[3] = ((v >> 15) & 31) as u8;
    dst[4] = ((v >> 20) & 31) as u8;
}

fn unpack_bit7(v: u32, dst: &mut [u8; 240]) {
    dst[0] = (v & 127) as u8;
    dst[1] = ((v >> 7) & 127) as u8;
    dst[2] = ((v >> 14) & 127) as u8;
    dst[3] = ((v >> 21) & 127) as u8;
}

fn unpack_bit8(v: u32, dst: &mut [u8; 240]) {
    dst[0] = (v & 255) as u8;
    dst[1] = ((v >> 8) & 255) as u8;
    dst[2] = ((v >> 16) & 255) as u8;
}
