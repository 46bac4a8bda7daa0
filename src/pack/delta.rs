//! Generic content delta: a copy/insert op stream encoding a transformation
//! from a base buffer to a target buffer.
//!
//! This is not a port of any single reference delta format — the corpus
//! carries no existing crate for it — but it fits a pack record laid out as
//! `base_id || original_length || delta_bytes`: `delta_bytes` here is the op
//! stream produced by [`compute_delta`] and consumed by [`apply_delta`].
//!
//! Op stream: a sequence of `Copy{offset, len}` / `Insert{bytes}` ops, each
//! `tag:u8` (`0` = copy, `1` = insert) followed by varint-encoded operands
//! (`Copy`: `varint(offset) || varint(len)`; `Insert`: `varint(len) ||
//! bytes`).

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::varint;

const MIN_MATCH: usize = 16;
const HASH_WINDOW: usize = 16;

fn window_hash(bytes: &[u8]) -> u64 {
    // FNV-1a over a fixed window; good enough to bucket candidate match
    // positions without pulling in a hashing crate beyond what the rest of
    // the store already uses.
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Computes an op stream that reconstructs `target` from `base`.
pub fn compute_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut index: std::collections::HashMap<u64, Vec<usize>> = std::collections::HashMap::new();
    if base.len() >= HASH_WINDOW {
        for pos in 0..=(base.len() - HASH_WINDOW) {
            let h = window_hash(&base[pos..pos + HASH_WINDOW]);
            index.entry(h).or_default().push(pos);
        }
    }

    let mut out = Vec::new();
    let mut literal_start = 0usize;
    let mut i = 0usize;

    let flush_literal = |out: &mut Vec<u8>, target: &[u8], start: usize, end: usize| {
        if start == end {
            return;
        }
        out.push(1);
        varint::encode((end - start) as u64, out);
        out.extend_from_slice(&target[start..end]);
    };

    while i < target.len() {
        let mut best: Option<(usize, usize)> = None; // (base_offset, len)
        if i + HASH_WINDOW <= target.len() {
            let h = window_hash(&target[i..i + HASH_WINDOW]);
            if let Some(candidates) = index.get(&h) {
                for &cand in candidates.iter().rev().take(32) {
                    let mut len = 0;
                    while cand + len < base.len()
                        && i + len < target.len()
                        && base[cand + len] == target[i + len]
                    {
                        len += 1;
                    }
                    if len >= MIN_MATCH && best.map(|(_, best_len)| len > best_len).unwrap_or(true) {
                        best = Some((cand, len));
                    }
                }
            }
        }

        match best {
            Some((offset, len)) => {
                flush_literal(&mut out, target, literal_start, i);
                out.push(0);
                varint::encode(offset as u64, &mut out);
                varint::encode(len as u64, &mut out);
                i += len;
                literal_start = i;
            }
            None => {
                i += 1;
            }
        }
    }
    flush_literal(&mut out, target, literal_start, target.len());
    out
}

/// Applies an op stream produced by [`compute_delta`] against `base`,
/// reconstructing the target buffer.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> StoreResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < delta.len() {
        let tag = delta[pos];
        pos += 1;
        match tag {
            0 => {
                let (offset, consumed) = varint::decode(&delta[pos..])
                    .ok_or_else(|| StoreError::corruption("truncated delta copy offset"))?;
                pos += consumed;
                let (len, consumed) = varint::decode(&delta[pos..])
                    .ok_or_else(|| StoreError::corruption("truncated delta copy length"))?;
                pos += consumed;
                let offset = offset as usize;
                let len = len as usize;
                let end = offset
                    .checked_add(len)
                    .ok_or_else(|| StoreError::corruption("delta copy range overflow"))?;
                if end > base.len() {
                    return Err(StoreError::corruption(
                        "delta copy range exceeds base object",
                    ));
                }
                out.extend_from_slice(&base[offset..end]);
            }
            1 => {
                let (len, consumed) = varint::decode(&delta[pos..])
                    .ok_or_else(|| StoreError::corruption("truncated delta insert length"))?;
                pos += consumed;
                let len = len as usize;
                if pos + len > delta.len() {
                    return Err(StoreError::corruption("truncated delta insert payload"));
                }
                out.extend_from_slice(&delta[pos..pos + len]);
                pos += len;
            }
            other => {
                return Err(StoreError::corruption(format!(
                    "unknown delta op tag {other}"
                )));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_similar_content() {
        let base = b"the quick brown fox jumps over the lazy dog, repeatedly and often";
        let target = b"the quick brown fox leaps over the lazy dog, repeatedly and often!";
        let delta = compute_delta(base, target);
        let restored = apply_delta(base, &delta).unwrap();
        assert_eq!(restored, target);
    }

    #[test]
    fn empty_target_round_trips() {
        let base = b"anything";
        let delta = compute_delta(base, b"");
        let restored = apply_delta(base, &delta).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn delta_is_smaller_for_near_duplicate_content() {
        let base = vec![b'x'; 4096];
        let mut target = base.clone();
        target.push(b'y');
        let delta = compute_delta(&base, &target);
        assert!(delta.len() < target.len());
        assert_eq!(apply_delta(&base, &delta).unwrap(), target);
    }

    #[test]
    fn rejects_out_of_range_copy() {
        let mut delta = Vec::new();
        delta.push(0u8);
        varint::encode(1000, &mut delta);
        varint::encode(10, &mut delta);
        assert!(apply_delta(b"short", &delta).is_err());
    }
}
