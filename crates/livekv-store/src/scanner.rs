//! Cursor scanner: one consistent, bounded, ordered read of a range.

use livekv_engine::{Cursor, KvEngine, ReadTransaction};
use tracing::debug;

use crate::codec::Codec;
use crate::error::{StoreError, StoreResult};
use crate::range::{Bound, RangeSpec};
use crate::record::Record;

/// Read the records of `spec` in its logical order from one read
/// transaction.
///
/// The cursor seeks to the near side of the range (the upper bound when
/// reversed), so only the far bound is checked while walking; the walk
/// stops at the first key past it and at the limit. A value that fails to
/// decode aborts the whole scan. The transaction is released on every exit
/// path, and a walk error wins over a release error.
pub fn scan(
    engine: &dyn KvEngine,
    codec: &dyn Codec,
    spec: &RangeSpec,
) -> StoreResult<Vec<Record>> {
    let txn = engine.begin_read()?;
    let walked = walk(txn.as_ref(), codec, spec);
    let released = txn.commit();
    let records = walked?;
    released?;
    debug!(
        count = records.len(),
        reverse = spec.reverse,
        "range scanned"
    );
    Ok(records)
}

pub(crate) fn walk(
    txn: &dyn ReadTransaction,
    codec: &dyn Codec,
    spec: &RangeSpec,
) -> StoreResult<Vec<Record>> {
    let limit = spec.limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();
    if limit == 0 {
        return Ok(records);
    }

    let mut cursor = txn.cursor()?;
    let mut found = seek_near(cursor.as_mut(), spec)?;

    while let Some(key) = found {
        if past_far(spec, &key) {
            break;
        }
        if let Some(bytes) = txn.get(&key)? {
            let record = codec.decode(&bytes).map_err(|source| StoreError::Decode {
                key: String::from_utf8_lossy(&key).into_owned(),
                source,
            })?;
            records.push(record);
            if records.len() >= limit {
                break;
            }
        }
        found = if spec.reverse {
            cursor.prev()?
        } else {
            cursor.next()?
        };
    }
    Ok(records)
}

fn seek_near(cursor: &mut (dyn Cursor + '_), spec: &RangeSpec) -> StoreResult<Option<Vec<u8>>> {
    let landed = if spec.reverse {
        match &spec.upper {
            None => cursor.seek_last()?,
            Some(bound) => {
                let landed = cursor.seek_to_or_before(bound.key().as_bytes())?;
                if !bound.is_inclusive() && landed.as_deref() == Some(bound.key().as_bytes()) {
                    cursor.prev()?
                } else {
                    landed
                }
            }
        }
    } else {
        match &spec.lower {
            None => cursor.seek_first()?,
            Some(bound) => {
                let landed = cursor.seek_to_or_after(bound.key().as_bytes())?;
                if !bound.is_inclusive() && landed.as_deref() == Some(bound.key().as_bytes()) {
                    cursor.next()?
                } else {
                    landed
                }
            }
        }
    };
    Ok(landed)
}

/// Whether `key` lies beyond the bound on the walk's far side.
fn past_far(spec: &RangeSpec, key: &[u8]) -> bool {
    if spec.reverse {
        match &spec.lower {
            None => false,
            Some(Bound::Inclusive(bound)) => key < bound.as_bytes(),
            Some(Bound::Exclusive(bound)) => key <= bound.as_bytes(),
        }
    } else {
        match &spec.upper {
            None => false,
            Some(Bound::Inclusive(bound)) => key > bound.as_bytes(),
            Some(Bound::Exclusive(bound)) => key >= bound.as_bytes(),
        }
    }
}
