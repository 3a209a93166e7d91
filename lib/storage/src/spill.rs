use crate::KeyValueStoreError;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// A file-backed FIFO queue of byte records.
///
/// The file is created on the first push and deleted by the operating system once the queue is
/// dropped. When the queue runs empty, the file is truncated.
#[derive(Debug)]
pub struct SpillQueue {
    dir: PathBuf,
    file: Option<File>,
    read_position: u64,
    write_position: u64,
    len: usize,
}

impl SpillQueue {
    /// Creates a new [SpillQueue] whose file will be placed in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: None,
            read_position: 0,
            write_position: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn file(&mut self) -> Result<&mut File, KeyValueStoreError> {
        if self.file.is_none() {
            self.file = Some(tempfile::tempfile_in(&self.dir)?);
        }
        self.file.as_mut().ok_or(KeyValueStoreError::Closed)
    }

    pub fn push(&mut self, record: &[u8]) -> Result<(), KeyValueStoreError> {
        let length = u32::try_from(record.len())
            .map_err(|e| KeyValueStoreError::Corrupted(e.to_string()))?;
        let position = self.write_position;
        let file = self.file()?;
        file.seek(SeekFrom::Start(position))?;
        file.write_all(&length.to_be_bytes())?;
        file.write_all(record)?;
        self.write_position += 4 + u64::from(length);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Option<Vec<u8>>, KeyValueStoreError> {
        if self.len == 0 {
            return Ok(None);
        }
        let position = self.read_position;
        let file = self.file()?;
        file.seek(SeekFrom::Start(position))?;
        let mut length = [0; 4];
        file.read_exact(&mut length)?;
        let length = u32::from_be_bytes(length);
        let mut record = vec![0; usize::try_from(length).unwrap_or_default()];
        file.read_exact(&mut record)?;

        self.read_position += 4 + u64::from(length);
        self.len -= 1;
        if self.len == 0 {
            self.clear()?;
        }
        Ok(Some(record))
    }

    pub fn clear(&mut self) -> Result<(), KeyValueStoreError> {
        if let Some(file) = &mut self.file {
            file.set_len(0)?;
        }
        self.read_position = 0;
        self.write_position = 0;
        self.len = 0;
        Ok(())
    }
}
