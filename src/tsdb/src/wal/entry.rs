use std::collections::BTreeMap;

use crate::cache::value::Value;
use crate::wal::Error;

/// WriteWalEntry is one write record: samples grouped per series key.
///
/// ┌─────────────────────────────────────────────────────────────┐
/// │                       WriteWalEntry                         │
/// ├────────┬─────────┬─────────┬────────┬─────────┬─────────┬───┤
/// │   Key  │  Time   │  Value  │   Key  │  Time   │  Value  │...│
/// │ 4 bytes│ 8 bytes │ 1 byte  │ 4 bytes│ 8 bytes │ 1 byte  │   │
/// └────────┴─────────┴─────────┴────────┴─────────┴─────────┴───┘
///
/// Tuples are emitted in ascending key order so the encoding is
/// deterministic; on decode, every run of a key folds into that key's
/// sample list.
#[derive(Debug)]
pub struct WriteWalEntry {
    pub values: BTreeMap<u32, Vec<Value>>,
}

/// Bytes one (key, timestamp, value) tuple occupies on the wire.
const TUPLE_SIZE: usize = 4 + 8 + 1;

impl WriteWalEntry {
    pub fn new(values: BTreeMap<u32, Vec<Value>>) -> Self {
        Self { values }
    }

    /// Returns the exact encoded size of `values`.
    pub fn encoded_size(values: &BTreeMap<u32, Vec<Value>>) -> usize {
        values.values().map(|v| TUPLE_SIZE * v.len()).sum()
    }

    /// Encodes `values` into dst, which must be at least
    /// [`Self::encoded_size`] bytes, and returns the written prefix.
    pub fn encode_values<'a>(values: &BTreeMap<u32, Vec<Value>>, dst: &'a mut [u8]) -> &'a [u8] {
        let mut n = 0;
        for (k, v) in values {
            for vv in v {
                dst[n..n + 4].copy_from_slice(&k.to_be_bytes());
                n += 4;
                dst[n..n + 8].copy_from_slice(&(vv.unix_nano as u64).to_be_bytes());
                n += 8;
                dst[n] = vv.value;
                n += 1;
            }
        }
        &dst[..n]
    }

    pub fn marshal_binary(values: &BTreeMap<u32, Vec<Value>>) -> Vec<u8> {
        let mut b = vec![0u8; Self::encoded_size(values)];
        let n = Self::encode_values(values, &mut b).len();
        b.truncate(n);
        b
    }

    /// Decodes a record.  Trailing bytes shorter than a full tuple mean
    /// the record was cut off mid-write.
    pub fn unmarshal_binary(b: &[u8]) -> Result<Self, Error> {
        let mut values: BTreeMap<u32, Vec<Value>> = BTreeMap::new();

        let mut i = 0;
        while i < b.len() {
            if i + TUPLE_SIZE > b.len() {
                return Err(Error::Corrupt);
            }

            let key = u32::from_be_bytes(b[i..i + 4].try_into().unwrap());
            i += 4;
            let unix_nano = u64::from_be_bytes(b[i..i + 8].try_into().unwrap()) as i64;
            i += 8;
            let value = b[i];
            i += 1;

            values
                .entry(key)
                .or_default()
                .push(Value::new(unix_nano, value));
        }

        Ok(Self { values })
    }
}
