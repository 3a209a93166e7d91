use crate::KeyValueStoreError;
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::hash::BuildHasher;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::TempDir;

/// A multi-map from byte keys to byte values. Values of a key are returned in insertion order.
pub trait KeyValueStore: Send + Debug {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KeyValueStoreError>;

    /// Returns all values stored under `key`.
    fn get(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>, KeyValueStoreError>;

    fn clear(&mut self) -> Result<(), KeyValueStoreError>;

    /// Returns the number of stored values.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases all resources. The store cannot be used afterwards.
    fn close(&mut self) -> Result<(), KeyValueStoreError>;
}

/// A [KeyValueStore] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemKeyValueStore {
    values: FxHashMap<Vec<u8>, Vec<Vec<u8>>>,
    len: usize,
}

impl MemKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemKeyValueStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KeyValueStoreError> {
        self.values
            .entry(key.to_vec())
            .or_default()
            .push(value.to_vec());
        self.len += 1;
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>, KeyValueStoreError> {
        Ok(self.values.get(key).cloned().unwrap_or_default())
    }

    fn clear(&mut self) -> Result<(), KeyValueStoreError> {
        self.values.clear();
        self.len = 0;
        Ok(())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn close(&mut self) -> Result<(), KeyValueStoreError> {
        self.clear()
    }
}

/// A [KeyValueStore] with one append-only file per hash bucket.
///
/// Records are `[u32 key length][u32 value length][key][value]`. A lookup reads the whole
/// bucket file. The files live in a temporary directory that is removed on close or drop.
#[derive(Debug)]
pub struct FileKeyValueStore {
    dir: Option<TempDir>,
    buckets: Vec<Option<File>>,
    len: usize,
}

impl FileKeyValueStore {
    /// Creates a new store with `number_of_buckets` files below `tmp_dir`.
    pub fn new(tmp_dir: &Path, number_of_buckets: usize) -> Result<Self, KeyValueStoreError> {
        let dir = tempfile::Builder::new()
            .prefix("koral-spill-")
            .tempdir_in(tmp_dir)?;
        Ok(Self {
            dir: Some(dir),
            buckets: (0..number_of_buckets.max(1)).map(|_| None).collect(),
            len: 0,
        })
    }

    fn bucket_of(&self, key: &[u8]) -> usize {
        let hash = FxBuildHasher.hash_one(key);
        let buckets = u64::try_from(self.buckets.len()).unwrap_or(1);
        usize::try_from(hash % buckets).unwrap_or_default()
    }

    fn bucket_file(&mut self, bucket: usize) -> Result<&mut File, KeyValueStoreError> {
        let dir = self.dir.as_ref().ok_or(KeyValueStoreError::Closed)?;
        let path = dir.path().join(format!("bucket-{bucket}"));
        let slot = &mut self.buckets[bucket];
        if slot.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(path)?;
            *slot = Some(file);
        }
        slot.as_mut().ok_or(KeyValueStoreError::Closed)
    }
}

fn read_length(bytes: &[u8], offset: usize) -> Result<usize, KeyValueStoreError> {
    let field = bytes
        .get(offset..offset + 4)
        .and_then(|field| <[u8; 4]>::try_from(field).ok())
        .ok_or_else(|| KeyValueStoreError::Corrupted(format!("truncated record at {offset}")))?;
    usize::try_from(u32::from_be_bytes(field))
        .map_err(|e| KeyValueStoreError::Corrupted(e.to_string()))
}

fn length_field(length: usize) -> Result<[u8; 4], KeyValueStoreError> {
    u32::try_from(length)
        .map(u32::to_be_bytes)
        .map_err(|e| KeyValueStoreError::Corrupted(e.to_string()))
}

impl KeyValueStore for FileKeyValueStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KeyValueStoreError> {
        let mut record = Vec::with_capacity(8 + key.len() + value.len());
        record.extend_from_slice(&length_field(key.len())?);
        record.extend_from_slice(&length_field(value.len())?);
        record.extend_from_slice(key);
        record.extend_from_slice(value);

        let bucket = self.bucket_of(key);
        let file = self.bucket_file(bucket)?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(&record)?;
        self.len += 1;
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>, KeyValueStoreError> {
        let bucket = self.bucket_of(key);
        if self.buckets[bucket].is_none() {
            return Ok(Vec::new());
        }
        let file = self.bucket_file(bucket)?;
        let mut content = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut content)?;

        let mut result = Vec::new();
        let mut offset = 0;
        while offset < content.len() {
            let key_length = read_length(&content, offset)?;
            let value_length = read_length(&content, offset + 4)?;
            let key_start = offset + 8;
            let value_start = key_start + key_length;
            let end = value_start + value_length;
            if end > content.len() {
                return Err(KeyValueStoreError::Corrupted(format!(
                    "record at {offset} exceeds bucket file"
                )));
            }
            if &content[key_start..value_start] == key {
                result.push(content[value_start..end].to_vec());
            }
            offset = end;
        }
        Ok(result)
    }

    fn clear(&mut self) -> Result<(), KeyValueStoreError> {
        for file in self.buckets.iter_mut().flatten() {
            file.set_len(0)?;
        }
        self.len = 0;
        Ok(())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn close(&mut self) -> Result<(), KeyValueStoreError> {
        self.buckets.iter_mut().for_each(|bucket| *bucket = None);
        self.len = 0;
        if let Some(dir) = self.dir.take() {
            dir.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &mut dyn KeyValueStore) {
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();
        store.put(b"a", b"3").unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(b"a").unwrap(), vec![b"1".to_vec(), b"3".to_vec()]);
        assert_eq!(store.get(b"c").unwrap(), Vec::<Vec<u8>>::new());

        store.clear().unwrap();
        assert!(store.is_empty());
        assert!(store.get(b"a").unwrap().is_empty());
    }

    #[test]
    fn memory_store() {
        exercise(&mut MemKeyValueStore::new());
    }

    #[test]
    fn file_store() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileKeyValueStore::new(tmp.path(), 2).unwrap();
        exercise(&mut store);

        store.put(b"x", b"y").unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.put(b"x", b"y"),
            Err(KeyValueStoreError::Closed)
        ));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
