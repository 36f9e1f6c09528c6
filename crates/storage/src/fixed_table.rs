//! Append-only table of fixed-size records (spec §4.2).
//!
//! Disk layout is `record_size`-byte records concatenated with no framing;
//! a sidecar `.conf` file records `nb_values` and `record_size` so a
//! reader never has to infer layout from file size alone. An optional
//! in-memory mirror ([`ChunkedVec`]) lets a writer batch appends in
//! memory and materialize them to disk only at [`FixedTable::flush`] or
//! on drop — the common case for tables a writer holds open for the
//! whole session (`runtime_meta`, `debug_counters`).

use crate::stable_vec::ChunkedVec;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use vdb_core::error::{Error, Result};

/// A record type that can be stored in a [`FixedTable`].
pub trait FixedRecord: Sized + Copy {
    /// Fixed on-disk size in bytes.
    const RECORD_SIZE: usize;

    fn encode_into(&self, buf: &mut [u8]);
    fn decode_from(buf: &[u8]) -> Result<Self>;
}

macro_rules! impl_fixed_record_for_core {
    ($ty:ty) => {
        impl FixedRecord for $ty {
            const RECORD_SIZE: usize = <$ty>::ENCODED_LEN;

            fn encode_into(&self, buf: &mut [u8]) {
                buf.copy_from_slice(&self.encode());
            }

            fn decode_from(buf: &[u8]) -> Result<Self> {
                <$ty>::decode(buf)
            }
        }
    };
}

impl_fixed_record_for_core!(vdb_core::StaticMeta);
impl_fixed_record_for_core!(vdb_core::RuntimeMeta);
impl_fixed_record_for_core!(vdb_core::DebugCounters);
impl_fixed_record_for_core!(vdb_core::Hash128);

impl FixedRecord for vdb_core::Location {
    const RECORD_SIZE: usize = vdb_core::Location::ENCODED_LEN;

    fn encode_into(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.encode());
    }

    fn decode_from(buf: &[u8]) -> Result<Self> {
        Ok(vdb_core::Location::decode(buf))
    }
}

impl FixedRecord for u64 {
    const RECORD_SIZE: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Result<Self> {
        Ok(u64::from_le_bytes(buf.try_into().unwrap()))
    }
}

fn sidecar_path(data_path: &Path) -> PathBuf {
    data_path.with_extension("conf")
}

/// Append-only table of fixed-size records, with an optional in-memory
/// mirror.
pub struct FixedTable<T: FixedRecord> {
    data_path: PathBuf,
    file: File,
    n_values: u64,
    mirror: Option<ChunkedVec<T>>,
    last_written_index: u64,
    only_append: bool,
}

impl<T: FixedRecord> FixedTable<T> {
    /// Opens an existing table or creates an empty one at `data_path`.
    pub fn open(data_path: impl Into<PathBuf>) -> Result<Self> {
        let data_path = data_path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&data_path)
            .map_err(|e| Error::io("open fixed table", &data_path, e))?;

        let sidecar = sidecar_path(&data_path);
        let n_values = if sidecar.exists() {
            let cfg = vdb_core::config::Config::load(&sidecar)?;
            cfg.get_u64("nb_values")?
        } else {
            let len = file
                .metadata()
                .map_err(|e| Error::io("stat fixed table", &data_path, e))?
                .len();
            if len % (T::RECORD_SIZE as u64) != 0 {
                return Err(Error::Codec(format!(
                    "fixed table {} has {} bytes, not a multiple of record size {}",
                    data_path.display(),
                    len,
                    T::RECORD_SIZE
                )));
            }
            len / (T::RECORD_SIZE as u64)
        };

        Ok(FixedTable {
            data_path,
            file,
            n_values,
            mirror: None,
            last_written_index: n_values,
            only_append: true,
        })
    }

    pub fn nb_values(&self) -> u64 {
        self.n_values
    }

    /// Appends a single record, returning its newly assigned index.
    pub fn append(&mut self, value: T) -> Result<u64> {
        let index = self.n_values;
        if let Some(mirror) = &mut self.mirror {
            mirror.push(value);
        } else {
            self.write_record_to_disk(index, &value)?;
            self.last_written_index = index + 1;
        }
        self.n_values += 1;
        Ok(index)
    }

    pub fn append_many(&mut self, values: &[T]) -> Result<u64> {
        let start = self.n_values;
        for v in values {
            self.append(*v)?;
        }
        Ok(start)
    }

    pub fn read(&mut self, index: u64) -> Result<T> {
        if index >= self.n_values {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.n_values,
            });
        }
        if let Some(mirror) = &self.mirror {
            return mirror.get(index as usize).copied().ok_or(Error::IndexOutOfRange {
                index,
                len: self.n_values,
            });
        }
        self.read_record_from_disk(index)
    }

    /// Overwrites an existing record. Forces a full rewrite on the next
    /// flush, since the table can no longer be materialized as a pure
    /// append of its tail.
    pub fn write(&mut self, index: u64, value: T) -> Result<()> {
        if index >= self.n_values {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.n_values,
            });
        }
        if let Some(mirror) = &mut self.mirror {
            *mirror.get_mut(index as usize).unwrap() = value;
        } else {
            self.write_record_to_disk(index, &value)?;
        }
        self.only_append = false;
        Ok(())
    }

    /// Loads the whole table into memory. After this call, reads and
    /// writes hit the in-memory mirror only; [`FixedTable::memory_view`]
    /// becomes valid and its addresses remain stable across further
    /// appends (spec §4.2).
    pub fn load_all(&mut self) -> Result<()> {
        if self.mirror.is_some() {
            return Ok(());
        }
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::io("seek fixed table", &self.data_path, e))?;
        let mut buf = vec![0u8; T::RECORD_SIZE];
        let mut mirror = ChunkedVec::new();
        for _ in 0..self.n_values {
            self.file
                .read_exact(&mut buf)
                .map_err(|e| Error::io("read fixed table", &self.data_path, e))?;
            mirror.push(T::decode_from(&buf)?);
        }
        self.last_written_index = self.n_values;
        self.mirror = Some(mirror);
        Ok(())
    }

    /// Returns the in-memory mirror, valid only once [`FixedTable::load_all`]
    /// has been called.
    pub fn memory_view(&self) -> Option<&ChunkedVec<T>> {
        self.mirror.as_ref()
    }

    /// Reads a record by `&self` from the in-memory mirror, without the
    /// `&mut self` a disk read would need. Callers that read the same
    /// table from many call sites without threading a `&mut` through
    /// (the search index builder, the query engine) call
    /// [`FixedTable::load_all`] once up front and use this afterwards.
    pub fn get_loaded(&self, index: u64) -> Result<T> {
        let mirror = self.mirror.as_ref().ok_or_else(|| {
            Error::Codec(format!(
                "fixed table {} not loaded into memory",
                self.data_path.display()
            ))
        })?;
        mirror.get(index as usize).copied().ok_or(Error::IndexOutOfRange {
            index,
            len: self.n_values,
        })
    }

    /// Truncates the table to its first `n` records, discarding the rest.
    /// Used by the integrity checker's repair path (spec §4.7, §8 P8).
    pub fn truncate_to(&mut self, n: u64) -> Result<()> {
        if n > self.n_values {
            return Err(Error::IndexOutOfRange {
                index: n,
                len: self.n_values,
            });
        }
        self.file
            .set_len(n * T::RECORD_SIZE as u64)
            .map_err(|e| Error::io("truncate fixed table", &self.data_path, e))?;
        self.file
            .sync_all()
            .map_err(|e| Error::io("fsync fixed table", &self.data_path, e))?;
        self.n_values = n;
        self.last_written_index = n;
        self.mirror = None;
        let sidecar = sidecar_path(&self.data_path);
        let mut cfg = vdb_core::config::Config::new();
        cfg.set("nb_values", self.n_values.to_string());
        cfg.set("record_size", T::RECORD_SIZE.to_string());
        cfg.write_atomic(&sidecar)
    }

    fn read_record_from_disk(&mut self, index: u64) -> Result<T> {
        self.file
            .seek(SeekFrom::Start(index * T::RECORD_SIZE as u64))
            .map_err(|e| Error::io("seek fixed table", &self.data_path, e))?;
        let mut buf = vec![0u8; T::RECORD_SIZE];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| Error::io("read fixed table", &self.data_path, e))?;
        T::decode_from(&buf)
    }

    fn write_record_to_disk(&mut self, index: u64, value: &T) -> Result<()> {
        let mut buf = vec![0u8; T::RECORD_SIZE];
        value.encode_into(&mut buf);
        self.file
            .seek(SeekFrom::Start(index * T::RECORD_SIZE as u64))
            .map_err(|e| Error::io("seek fixed table", &self.data_path, e))?;
        self.file
            .write_all(&buf)
            .map_err(|e| Error::io("write fixed table", &self.data_path, e))?;
        Ok(())
    }

    /// Materializes pending in-memory changes to disk and rewrites the
    /// sidecar `.conf`. If only appends happened since the mirror was
    /// loaded, only the new tail is written; otherwise the whole mirror
    /// is rewritten.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(mirror) = &self.mirror {
            if self.only_append {
                if self.last_written_index < self.n_values {
                    self.file
                        .seek(SeekFrom::Start(self.last_written_index * T::RECORD_SIZE as u64))
                        .map_err(|e| Error::io("seek fixed table", &self.data_path, e))?;
                    let mut buf = vec![0u8; T::RECORD_SIZE];
                    for record in mirror.tail_from(self.last_written_index as usize) {
                        record.encode_into(&mut buf);
                        self.file
                            .write_all(&buf)
                            .map_err(|e| Error::io("write fixed table", &self.data_path, e))?;
                    }
                }
            } else {
                self.file
                    .seek(SeekFrom::Start(0))
                    .map_err(|e| Error::io("seek fixed table", &self.data_path, e))?;
                self.file
                    .set_len(0)
                    .map_err(|e| Error::io("truncate fixed table", &self.data_path, e))?;
                let mut buf = vec![0u8; T::RECORD_SIZE];
                for record in mirror.iter() {
                    record.encode_into(&mut buf);
                    self.file
                        .write_all(&buf)
                        .map_err(|e| Error::io("write fixed table", &self.data_path, e))?;
                }
            }
            self.file
                .sync_all()
                .map_err(|e| Error::io("fsync fixed table", &self.data_path, e))?;
            self.last_written_index = self.n_values;
            self.only_append = true;
        }

        let sidecar = sidecar_path(&self.data_path);
        let mut cfg = vdb_core::config::Config::new();
        cfg.set("nb_values", self.n_values.to_string());
        cfg.set("record_size", T::RECORD_SIZE.to_string());
        cfg.write_atomic(&sidecar)?;
        Ok(())
    }
}

impl<T: FixedRecord> Drop for FixedTable<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(path = %self.data_path.display(), error = %e, "failed to flush fixed table on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_without_mirror() {
        let dir = tempdir().unwrap();
        let mut t: FixedTable<u64> = FixedTable::open(dir.path().join("t.bin")).unwrap();
        let i0 = t.append(10).unwrap();
        let i1 = t.append(20).unwrap();
        assert_eq!((i0, i1), (0, 1));
        assert_eq!(t.read(0).unwrap(), 10);
        assert_eq!(t.read(1).unwrap(), 20);
        assert_eq!(t.nb_values(), 2);
    }

    #[test]
    fn mirror_roundtrips_and_addresses_are_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        {
            let mut t: FixedTable<u64> = FixedTable::open(&path).unwrap();
            for i in 0..10u64 {
                t.append(i).unwrap();
            }
        }
        let mut t: FixedTable<u64> = FixedTable::open(&path).unwrap();
        t.load_all().unwrap();
        let addr_before = t.memory_view().unwrap().get(0).unwrap() as *const u64;
        for i in 10..50u64 {
            t.append(i).unwrap();
        }
        let addr_after = t.memory_view().unwrap().get(0).unwrap() as *const u64;
        assert_eq!(addr_before, addr_after);
        assert_eq!(t.read(49).unwrap(), 49);
    }

    #[test]
    fn reopen_sees_flushed_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        {
            let mut t: FixedTable<u64> = FixedTable::open(&path).unwrap();
            t.append(42).unwrap();
        }
        let mut t: FixedTable<u64> = FixedTable::open(&path).unwrap();
        assert_eq!(t.nb_values(), 1);
        assert_eq!(t.read(0).unwrap(), 42);
    }

    #[test]
    fn write_forces_full_rewrite_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let mut t: FixedTable<u64> = FixedTable::open(&path).unwrap();
        t.append(1).unwrap();
        t.append(2).unwrap();
        t.load_all().unwrap();
        t.write(0, 100).unwrap();
        t.flush().unwrap();
        drop(t);

        let mut t: FixedTable<u64> = FixedTable::open(&path).unwrap();
        assert_eq!(t.read(0).unwrap(), 100);
        assert_eq!(t.read(1).unwrap(), 2);
    }
}
