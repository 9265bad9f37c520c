/// Value is a single sample: a unix-nano timestamp and a one-byte value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub unix_nano: i64,
    pub value: u8,
}

impl Value {
    pub fn new(unix_nano: i64, value: u8) -> Self {
        Self { unix_nano, value }
    }
}

/// Sorts values by timestamp and drops duplicate timestamps, keeping the
/// last occurrence.  Already-ordered input is left untouched.
///
/// The sort is stable, so among samples with equal timestamps the most
/// recently appended one survives.
pub fn deduplicate(values: &mut Vec<Value>) {
    if values.len() <= 1 {
        return;
    }

    let mut need_sort = false;
    for i in 1..values.len() {
        if values[i - 1].unix_nano >= values[i].unix_nano {
            need_sort = true;
            break;
        }
    }
    if !need_sort {
        return;
    }

    values.sort_by_key(|v| v.unix_nano);

    let mut i = 0;
    for j in 1..values.len() {
        let v = values[j];
        if v.unix_nano != values[i].unix_nano {
            i += 1;
        }
        values[i] = v;
    }
    values.truncate(i + 1);
}
