//! Writing a pack: memtable rotation and level compaction both funnel
//! through this one routine.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use sha1::Digest as _;
use sha1::Sha1;
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::hash::HashId;
use crate::header::DataHeader;
use crate::header::DataType;
use crate::pack::delta;
use crate::pack::record::DataTag;
use crate::pack::record::DeltaHeader;
use crate::loose::Codec;
use crate::pack::similarity::Fingerprint;
use crate::pack::table::build_index_bytes;
use crate::pack::table::PackFile;

/// Candidates are only considered delta-eligible above this size, and only
/// keep a delta when it shrinks the payload below this fraction.
const MIN_DELTA_CANDIDATE_SIZE: usize = 64;
const DELTA_KEEP_RATIO_NUM: usize = 85;
const DELTA_KEEP_RATIO_DEN: usize = 100;
const SLIDING_WINDOW: usize = 256;
const MAX_WRITE_CHAIN_DEPTH: u32 = 64;

struct Candidate {
    id: HashId,
    fingerprint: Fingerprint,
    content: Vec<u8>,
    chain_depth: u32,
}

fn emission_priority(ty: DataType) -> u8 {
    match ty {
        DataType::Commit => 0,
        DataType::Renames => 1,
        DataType::Tree => 2,
        DataType::Blob => 3,
        DataType::Index => 4,
        DataType::Tag => 5,
    }
}

fn emission_order(entries: &BTreeMap<HashId, (DataType, Vec<u8>)>) -> Vec<HashId> {
    let mut ids: Vec<HashId> = entries.keys().copied().collect();
    ids.sort_by(|a, b| {
        let (ty_a, content_a) = &entries[a];
        let (ty_b, content_b) = &entries[b];
        emission_priority(*ty_a)
            .cmp(&emission_priority(*ty_b))
            .then_with(|| content_b.len().cmp(&content_a.len()))
            .then_with(|| a.cmp(b))
    });
    ids
}

/// Collects `(id, type, content)` tuples from possibly-overlapping inputs,
/// sorts by id, and keeps the last-seen portion per id (later inputs shadow
/// earlier ones).
pub fn collect_and_dedup<I>(sources: I) -> BTreeMap<HashId, (DataType, Vec<u8>)>
where
    I: IntoIterator<Item = Vec<(HashId, DataType, Vec<u8>)>>,
{
    let mut map = BTreeMap::new();
    for source in sources {
        for (id, ty, content) in source {
            map.insert(id, (ty, content));
        }
    }
    map
}

pub struct WrittenPack {
    pub pack: PackFile,
}

/// Streams `entries` to a new pack in `dir` at `level`, optionally
/// delta-encoding Blob/Tree records against a sliding window of
/// already-emitted same-type records, then writes the matching `.index`
/// and validates by reopening and probing every id.
pub fn write_pack(
    dir: &Path,
    level: u32,
    entries: BTreeMap<HashId, (DataType, Vec<u8>)>,
    deltify: bool,
    codec: Codec,
) -> StoreResult<WrittenPack> {
    let order = emission_order(&entries);
    let mut pack_bytes = Vec::new();
    let mut offsets: Vec<(HashId, DataHeader, u64)> = Vec::with_capacity(order.len());
    let mut windows: std::collections::HashMap<DataType, VecDeque<Candidate>> =
        std::collections::HashMap::new();

    for id in order {
        let (ty, content) = &entries[&id];
        let offset = pack_bytes.len() as u64;
        let header = DataHeader::new(*ty, content.len() as u64)?;

        let deltified = deltify
            && content.len() >= MIN_DELTA_CANDIDATE_SIZE
            && matches!(ty, DataType::Blob | DataType::Tree);

        let mut wrote_delta = false;
        if deltified {
            let fingerprint = Fingerprint::compute(content);
            if let Some(window) = windows.get(ty) {
                if let Some(candidate) = pick_candidate(window, &fingerprint) {
                    let delta_ops = delta::compute_delta(&candidate.content, content);
                    if delta_ops.len() * DELTA_KEEP_RATIO_DEN
                        < content.len() * DELTA_KEEP_RATIO_NUM
                    {
                        let mut payload = Vec::new();
                        DeltaHeader {
                            base_id: candidate.id,
                            original_length: content.len() as u32,
                        }
                        .encode(&mut payload);
                        payload.extend_from_slice(&delta_ops);
                        write_record(&mut pack_bytes, &payload, true, codec);
                        let depth = candidate.chain_depth + 1;
                        push_candidate(
                            windows.entry(*ty).or_default(),
                            id,
                            fingerprint,
                            content.clone(),
                            depth,
                        );
                        wrote_delta = true;
                    }
                }
            }
            if !wrote_delta {
                push_candidate(windows.entry(*ty).or_default(), id, fingerprint, content.clone(), 0);
            }
        }

        if !wrote_delta {
            write_record(&mut pack_bytes, content, false, codec);
        }

        offsets.push((id, header, offset));
    }

    offsets.sort_by(|a, b| a.0.cmp(&b.0));
    let index_bytes = build_index_bytes(&offsets)?;

    let mut hasher = Sha1::new();
    hasher.update(&pack_bytes);
    let content_hash = hex::encode(hasher.finalize());

    let (index_name, data_name) = PackFile::file_name(&content_hash, level);
    let index_path = dir.join(&index_name);
    let data_path = dir.join(&data_name);

    persist_temp(dir, &pack_bytes, &data_path)?;
    persist_temp(dir, &index_bytes, &index_path)?;

    let pack = PackFile::open(index_path, data_path, level, content_hash)?;
    validate(&pack, &offsets)?;

    Ok(WrittenPack { pack })
}

fn pick_candidate<'a>(
    window: &'a VecDeque<Candidate>,
    fingerprint: &Fingerprint,
) -> Option<&'a Candidate> {
    window
        .iter()
        .filter(|c| c.chain_depth < MAX_WRITE_CHAIN_DEPTH)
        .min_by_key(|c| c.fingerprint.distance(fingerprint))
}

fn push_candidate(
    window: &mut VecDeque<Candidate>,
    id: HashId,
    fingerprint: Fingerprint,
    content: Vec<u8>,
    chain_depth: u32,
) {
    if window.len() >= SLIDING_WINDOW {
        window.pop_front();
    }
    window.push_back(Candidate {
        id,
        fingerprint,
        content,
        chain_depth,
    });
}

/// Writes one `DataTag || payload` record. With `codec == Lz4`, LZ4-
/// compresses the payload when that shrinks it; `codec == None` always
/// writes the payload as-is.
fn write_record(out: &mut Vec<u8>, raw_payload: &[u8], is_delta: bool, codec: Codec) {
    let compressed = match codec {
        Codec::Lz4 => Some(lz4_flex::compress_prepend_size(raw_payload)),
        Codec::None => None,
    };
    let (is_compressed, payload): (bool, &[u8]) = match &compressed {
        Some(c) if c.len() < raw_payload.len() => (true, c),
        _ => (false, raw_payload),
    };
    let tag = DataTag {
        length: payload.len() as u64,
        is_compressed,
        is_delta,
    };
    tag.encode(out);
    out.extend_from_slice(payload);
}

fn persist_temp(dir: &Path, bytes: &[u8], final_path: &Path) -> StoreResult<()> {
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir.to_path_buf(), e))?;
    temp.write_all(bytes)
        .map_err(|e| StoreError::io(final_path.to_path_buf(), e))?;
    temp.as_file()
        .sync_data()
        .map_err(|e| StoreError::io(final_path.to_path_buf(), e))?;
    temp.persist(final_path)
        .map_err(|e| StoreError::io(final_path.to_path_buf(), e.error))?;
    Ok(())
}

fn validate(pack: &PackFile, offsets: &[(HashId, DataHeader, u64)]) -> StoreResult<()> {
    for (id, header, offset) in offsets {
        let (found_header, found_offset) = pack.index.find(*id)?.ok_or_else(|| {
            StoreError::corruption(format!("freshly written pack is missing probed id {id}"))
        })?;
        if found_header != *header || found_offset != *offset {
            return Err(StoreError::corruption(format!(
                "freshly written pack index disagrees with writer state for {id}"
            )));
        }
        // A light read-back: make sure the record header at the recorded
        // offset at least parses.
        pack.data.record_at(found_offset)?;
    }
    Ok(())
}

/// Removes a pack's `.index` and `.pack` files, used after a successful
/// compaction to drop its inputs.
pub fn remove_pack_files(pack: &PackFile) -> StoreResult<()> {
    fs::remove_file(&pack.index_path).map_err(|e| StoreError::io(pack.index_path.clone(), e))?;
    fs::remove_file(&pack.data_path).map_err(|e| StoreError::io(pack.data_path.clone(), e))?;
    Ok(())
}
