use bytedb_common::pool::Generic;

use crate::cache::value::Value;
use crate::engine::tsm1::codec::byte::{ByteDecoder, ByteEncoder};
use crate::engine::tsm1::codec::timestamp::{TimeDecoder, TimeEncoder};
use crate::engine::tsm1::codec::varint::{VarInt, MAX_VARINT_LEN64};
use crate::engine::tsm1::codec::{Decoder, Encoder};

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

lazy_static! {
    static ref TIME_ENCODER_POOL: Generic<TimeEncoder> =
        Generic::new(num_cpus(), TimeEncoder::new);
    static ref BYTE_ENCODER_POOL: Generic<ByteEncoder> =
        Generic::new(num_cpus(), ByteEncoder::new);
}

pub(crate) fn get_time_encoder(sz: usize) -> TimeEncoder {
    let mut enc = TIME_ENCODER_POOL.get(sz);
    enc.reset();
    enc
}

pub(crate) fn put_time_encoder(enc: TimeEncoder) {
    TIME_ENCODER_POOL.put(enc)
}

pub(crate) fn get_byte_encoder(sz: usize) -> ByteEncoder {
    let mut enc = BYTE_ENCODER_POOL.get(sz);
    enc.reset();
    enc
}

pub(crate) fn put_byte_encoder(enc: ByteEncoder) {
    BYTE_ENCODER_POOL.put(enc)
}

/// Encodes a run of samples into one block using the given encoders.
pub fn encode_byte_block_using(
    values: &[Value],
    tenc: &mut TimeEncoder,
    venc: &mut ByteEncoder,
) -> anyhow::Result<Vec<u8>> {
    tenc.reset();
    venc.reset();

    for v in values {
        tenc.write(v.unix_nano);
        venc.write(v.value);
    }

    let tb = tenc.bytes()?;
    let vb = venc.bytes()?;

    Ok(pack_block(&tb, &vb))
}

/// Packs the timestamp and value slices into one block: a varint length
/// prefix for the timestamp bytes, then both slices back to back.
pub fn pack_block(ts: &[u8], values: &[u8]) -> Vec<u8> {
    let mut b = Vec::with_capacity(MAX_VARINT_LEN64 + ts.len() + values.len());

    let mut tmp = [0u8; MAX_VARINT_LEN64];
    let n = (ts.len() as u64).encode_var(&mut tmp);
    b.extend_from_slice(&tmp[..n]);

    b.extend_from_slice(ts);
    b.extend_from_slice(values);
    b
}

/// Splits a block back into its timestamp and value slices.
pub fn unpack_block(block: &[u8]) -> anyhow::Result<(&[u8], &[u8])> {
    let (ts_len, n) =
        u64::decode_var(block).ok_or_else(|| anyhow!("block does not start with a valid length"))?;

    let ts_len = ts_len as usize;
    if n + ts_len > block.len() {
        return Err(anyhow!(
            "block too short for timestamp length {}: {} bytes",
            ts_len,
            block.len()
        ));
    }

    Ok((&block[n..n + ts_len], &block[n + ts_len..]))
}

/// Decodes a packed block back into samples.
pub fn decode_byte_block(block: &[u8]) -> anyhow::Result<Vec<Value>> {
    let (tb, vb) = unpack_block(block)?;

    let mut tdec = TimeDecoder::new(tb)?;
    let mut vdec = ByteDecoder::new(vb)?;

    let mut values = Vec::new();
    while tdec.next() {
        if !vdec.next() {
            return Err(anyhow!("block has fewer values than timestamps"));
        }
        values.push(Value::new(tdec.read(), vdec.read()));
    }
    if let Some(e) = tdec.err() {
        return Err(anyhow!("timestamp decode: {}", e));
    }
    if let Some(e) = vdec.err() {
        return Err(anyhow!("value decode: {}", e));
    }

    Ok(values)
}
