//! External-memory sort-and-load buffer for staged trie-node writes.

use crate::TrieError;
use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
};

/// Default in-memory budget before a sorted run is spilled to disk.
const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024 * 1024;

/// Collects `(key, value)` pairs in arbitrary order and later replays them
/// in ascending key order.
///
/// Entries accumulate in memory up to a byte budget; overflow is sorted
/// and spilled into an unlinked temporary file, so spill space is
/// reclaimed on every exit path, including abnormal ones. Duplicate keys
/// replay in insertion order, letting the sink's upsert keep the last
/// write.
#[derive(Debug)]
pub struct Collector {
    buffer: Vec<Entry>,
    buffered_bytes: usize,
    capacity: usize,
    spills: Vec<File>,
    sequence: u64,
    len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    key: Vec<u8>,
    sequence: u64,
    value: Vec<u8>,
}

impl Default for Collector {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }
}

impl Collector {
    /// Creates a collector with the default in-memory budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collector with an explicit in-memory byte budget.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::new(),
            buffered_bytes: 0,
            capacity: capacity.max(1),
            spills: Vec::new(),
            sequence: 0,
            len: 0,
        }
    }

    /// Number of collected entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds one entry.
    pub fn collect(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), TrieError> {
        self.buffered_bytes += key.len() + value.len() + 16;
        self.buffer.push(Entry { key, sequence: self.sequence, value });
        self.sequence += 1;
        self.len += 1;
        if self.buffered_bytes >= self.capacity {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<(), TrieError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort();
        // unlinked immediately: the file vanishes when the handle drops
        let mut file = tempfile::tempfile()?;
        {
            let mut writer = BufWriter::new(&mut file);
            for entry in self.buffer.drain(..) {
                writer.write_all(&(entry.key.len() as u32).to_be_bytes())?;
                writer.write_all(&(entry.value.len() as u32).to_be_bytes())?;
                writer.write_all(&entry.sequence.to_be_bytes())?;
                writer.write_all(&entry.key)?;
                writer.write_all(&entry.value)?;
            }
            writer.flush()?;
        }
        self.spills.push(file);
        self.buffered_bytes = 0;
        Ok(())
    }

    /// Replays every entry in ascending `(key, insertion)` order into
    /// `sink`, consuming the collector.
    pub fn load(
        mut self,
        mut sink: impl FnMut(&[u8], &[u8]) -> Result<(), TrieError>,
    ) -> Result<(), TrieError> {
        self.buffer.sort();
        let mut runs: Vec<Run> = Vec::with_capacity(self.spills.len() + 1);
        for mut file in self.spills.drain(..) {
            file.seek(SeekFrom::Start(0))?;
            runs.push(Run::Spill(BufReader::new(file)));
        }
        runs.push(Run::Memory(self.buffer.into_iter()));

        let mut heap = BinaryHeap::new();
        for (index, run) in runs.iter_mut().enumerate() {
            if let Some(entry) = run.next_entry()? {
                heap.push(Reverse((entry, index)));
            }
        }
        while let Some(Reverse((entry, index))) = heap.pop() {
            sink(&entry.key, &entry.value)?;
            if let Some(next) = runs[index].next_entry()? {
                heap.push(Reverse((next, index)));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Run {
    Memory(std::vec::IntoIter<Entry>),
    Spill(BufReader<File>),
}

impl Run {
    fn next_entry(&mut self) -> Result<Option<Entry>, TrieError> {
        match self {
            Self::Memory(iter) => Ok(iter.next()),
            Self::Spill(reader) => {
                let mut header = [0u8; 16];
                match reader.read_exact(&mut header) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                        return Ok(None);
                    }
                    Err(err) => return Err(err.into()),
                }
                let key_len = u32::from_be_bytes(header[..4].try_into().expect("4 bytes")) as usize;
                let value_len =
                    u32::from_be_bytes(header[4..8].try_into().expect("4 bytes")) as usize;
                let sequence = u64::from_be_bytes(header[8..].try_into().expect("8 bytes"));
                let mut key = vec![0u8; key_len];
                reader.read_exact(&mut key)?;
                let mut value = vec![0u8; value_len];
                reader.read_exact(&mut value)?;
                Ok(Some(Entry { key, sequence, value }))
            }
        }
    }
}
