//! On-disk persistence for a [`BitmapIndexSet`] under a database's
//! `search_index/` directory (spec §6).
//!
//! Each fixed bitmap gets its own `.ror` file: a `u32` little-endian byte
//! length followed by the bitmap's native `roaring` serialization. The
//! three reverse indexes additionally need their bin boundaries and their
//! full key->ids membership (needed to re-bin correctly on the next
//! incremental [`crate::builder::build_indexes`] call) — spec §6 names the
//! per-bin `.ror` files but is silent on how the bin boundaries and
//! membership survive a reopen, so this module's `.conf`/`.members` layout
//! is a documented deviation (see DESIGN.md).

use crate::bitmap_index::{BitmapIndexSet, NB_LENGTH_BUCKETS, NB_NDIMS_BUCKETS};
use crate::reverse_index::ReverseIndex;
use roaring::RoaringTreemap;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use vdb_core::config::Config;
use vdb_core::error::{Error, Result};
use vdb_core::model::ValueType;

fn save_bitmap(path: &Path, bitmap: &RoaringTreemap) -> Result<()> {
    let mut bytes = Vec::new();
    bitmap
        .serialize_into(&mut bytes)
        .map_err(|e| Error::Index(e.to_string()))?;
    let mut buf = Vec::with_capacity(4 + bytes.len());
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&bytes);
    fs::write(path, buf).map_err(|e| Error::io("write search index bitmap", path, e))
}

fn load_bitmap(path: &Path) -> Result<RoaringTreemap> {
    let raw = fs::read(path).map_err(|e| Error::io("read search index bitmap", path, e))?;
    if raw.len() < 4 {
        return Err(Error::Index(format!("{} is truncated", path.display())));
    }
    let len = u32::from_le_bytes(raw[0..4].try_into().unwrap()) as usize;
    let body = raw.get(4..4 + len).ok_or_else(|| {
        Error::Index(format!("{} declares {} bytes but is shorter", path.display(), len))
    })?;
    RoaringTreemap::deserialize_from(body).map_err(|e| Error::Index(e.to_string()))
}

fn encode_member_map(members: &BTreeMap<u32, Vec<u64>>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(members.len() as u32).to_le_bytes());
    for (key, ids) in members {
        buf.extend_from_slice(&key.to_le_bytes());
        buf.extend_from_slice(&(ids.len() as u32).to_le_bytes());
        for id in ids {
            buf.extend_from_slice(&id.to_le_bytes());
        }
    }
    buf
}

fn decode_member_map(bytes: &[u8]) -> BTreeMap<u32, Vec<u64>> {
    let mut members = BTreeMap::new();
    if bytes.len() < 4 {
        return members;
    }
    let n_keys = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let mut pos = 4;
    for _ in 0..n_keys {
        if pos + 8 > bytes.len() {
            break;
        }
        let key = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
        let n_ids = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        pos += 8;
        let mut ids = Vec::with_capacity(n_ids);
        for _ in 0..n_ids {
            if pos + 8 > bytes.len() {
                break;
            }
            ids.push(u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap()));
            pos += 8;
        }
        members.insert(key, ids);
    }
    members
}

fn save_reverse_index(dir: &Path, name: &str, index: &ReverseIndex, members: &BTreeMap<u32, Vec<u64>>) -> Result<()> {
    let bins: Vec<_> = index.bins_iter().collect();
    let mut conf = Config::new();
    conf.set("threshold", index.threshold().to_string());
    conf.set("nb_bins", bins.len().to_string());
    for (i, (min_key, max_key, _)) in bins.iter().enumerate() {
        conf.set(format!("bin_{i}_min"), min_key.to_string());
        conf.set(format!("bin_{i}_max"), max_key.to_string());
    }
    conf.write_atomic(&dir.join(format!("{name}_index.conf")))?;
    for (i, (_, _, bitmap)) in bins.iter().enumerate() {
        save_bitmap(&dir.join(format!("{name}_index_{i}.ror")), bitmap)?;
    }
    fs::write(dir.join(format!("{name}_index.members")), encode_member_map(members))
        .map_err(|e| Error::io("write reverse index members", dir, e))
}

fn load_reverse_index(dir: &Path, name: &str) -> Result<(ReverseIndex, BTreeMap<u32, Vec<u64>>)> {
    let conf_path = dir.join(format!("{name}_index.conf"));
    if !conf_path.exists() {
        return Ok((ReverseIndex::new(), BTreeMap::new()));
    }
    let conf = Config::load(&conf_path)?;
    let threshold = conf.get_u64("threshold")? as usize;
    let nb_bins = conf.get_u64("nb_bins")? as usize;
    let mut bins = Vec::with_capacity(nb_bins);
    for i in 0..nb_bins {
        let min_key = conf.get_u32(&format!("bin_{i}_min"))?;
        let max_key = conf.get_u32(&format!("bin_{i}_max"))?;
        let bitmap = load_bitmap(&dir.join(format!("{name}_index_{i}.ror")))?;
        bins.push((min_key, max_key, bitmap));
    }
    let members_path = dir.join(format!("{name}_index.members"));
    let members = if members_path.exists() {
        decode_member_map(&fs::read(&members_path).map_err(|e| Error::io("read reverse index members", &members_path, e))?)
    } else {
        BTreeMap::new()
    };
    Ok((ReverseIndex::from_bins(threshold, bins), members))
}

/// Saves every bitmap in `index` under `dir` (typically `search_index/`),
/// creating the directory if needed.
pub fn save(dir: &Path, index: &BitmapIndexSet) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::io("create search index dir", dir, e))?;

    for (tag, bitmap) in index.types.iter().enumerate() {
        save_bitmap(&dir.join(format!("types_index_{tag}.ror")), bitmap)?;
    }
    save_bitmap(&dir.join("na_index.ror"), &index.na)?;
    save_bitmap(&dir.join("class_index.ror"), &index.class)?;
    save_bitmap(&dir.join("vector_index.ror"), &index.vector)?;
    save_bitmap(&dir.join("attributes_index.ror"), &index.attributes)?;
    for (i, bitmap) in index.lengths.iter().enumerate() {
        save_bitmap(&dir.join(format!("lengths_index_{i}.ror")), bitmap)?;
    }
    for (i, bitmap) in index.ndims.iter().enumerate() {
        save_bitmap(&dir.join(format!("ndims_index_{i}.ror")), bitmap)?;
    }

    save_reverse_index(dir, "classnames", &index.classnames, &index.classname_members)?;
    save_reverse_index(dir, "packages", &index.packages, &index.package_members)?;
    save_reverse_index(dir, "functions", &index.functions, &index.function_members)?;

    let mut meta = Config::new();
    meta.set("last_computed", index.last_computed.to_string());
    meta.write_atomic(&dir.join("index.conf"))
}

/// Loads a [`BitmapIndexSet`] back from `dir`, or an empty, unbuilt one if
/// the directory doesn't exist yet.
pub fn load(dir: &Path) -> Result<BitmapIndexSet> {
    let mut index = BitmapIndexSet::new();
    let meta_path = dir.join("index.conf");
    if !meta_path.exists() {
        return Ok(index);
    }
    let meta = Config::load(&meta_path)?;
    index.last_computed = meta.get_u64("last_computed")?;

    for tag in 0..ValueType::COUNT as usize {
        index.types[tag] = load_bitmap(&dir.join(format!("types_index_{tag}.ror")))?;
    }
    index.na = load_bitmap(&dir.join("na_index.ror"))?;
    index.class = load_bitmap(&dir.join("class_index.ror"))?;
    index.vector = load_bitmap(&dir.join("vector_index.ror"))?;
    index.attributes = load_bitmap(&dir.join("attributes_index.ror"))?;
    for i in 0..NB_LENGTH_BUCKETS {
        index.lengths[i] = load_bitmap(&dir.join(format!("lengths_index_{i}.ror")))?;
    }
    for i in 0..NB_NDIMS_BUCKETS {
        index.ndims[i] = load_bitmap(&dir.join(format!("ndims_index_{i}.ror")))?;
    }

    let (classnames, classname_members) = load_reverse_index(dir, "classnames")?;
    let (packages, package_members) = load_reverse_index(dir, "packages")?;
    let (functions, function_members) = load_reverse_index(dir, "functions")?;
    index.classnames = classnames;
    index.classname_members = classname_members;
    index.packages = packages;
    index.package_members = package_members;
    index.functions = functions;
    index.function_members = function_members;

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_indexes, IndexContext};
    use tempfile::tempdir;
    use vdb_core::model::StaticMeta;

    struct FakeContext {
        metas: Vec<StaticMeta>,
        classes: Vec<Vec<u32>>,
    }

    impl IndexContext for FakeContext {
        fn nb_values(&self) -> u64 {
            self.metas.len() as u64
        }
        fn static_meta(&self, id: u64) -> Result<StaticMeta> {
            Ok(self.metas[id as usize])
        }
        fn has_na(&self, _id: u64) -> Result<bool> {
            Ok(false)
        }
        fn class_name_ids(&self, id: u64) -> Result<Vec<u32>> {
            Ok(self.classes[id as usize].clone())
        }
        fn package_ids(&self, _id: u64) -> Result<Vec<u32>> {
            Ok(vec![])
        }
        fn function_ids(&self, _id: u64) -> Result<Vec<u32>> {
            Ok(vec![])
        }
    }

    fn meta(type_tag: ValueType, length: u64) -> StaticMeta {
        StaticMeta {
            type_tag: type_tag.tag(),
            size_bytes: 8 * length,
            length,
            n_attributes: 0,
            n_dims: 0,
            n_rows: length as u32,
        }
    }

    #[test]
    fn round_trips_fixed_bitmaps_and_reverse_index() {
        let ctx = FakeContext {
            metas: vec![meta(ValueType::Double, 5), meta(ValueType::Integer, 1)],
            classes: vec![vec![3], vec![]],
        };
        let mut index = BitmapIndexSet::new();
        build_indexes(&ctx, &mut index).unwrap();

        let dir = tempdir().unwrap();
        save(dir.path(), &index).unwrap();
        let reloaded = load(dir.path()).unwrap();

        assert_eq!(reloaded.last_computed, 2);
        assert!(reloaded.types[ValueType::Double.tag() as usize].contains(0));
        assert!(reloaded.vector.contains(0));
        let (bitmap, _) = reloaded.classnames.get(3).unwrap();
        assert!(bitmap.contains(0));
        assert_eq!(reloaded.classname_members.get(&3), Some(&vec![0]));
    }

    #[test]
    fn missing_directory_loads_as_empty_unbuilt_index() {
        let dir = tempdir().unwrap();
        let index = load(&dir.path().join("search_index")).unwrap();
        assert_eq!(index.last_computed, 0);
    }
}
