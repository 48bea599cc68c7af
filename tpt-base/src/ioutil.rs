//! Stream and memory-mapped I/O abstractions shared by every builder and
//! reader. The `Reader`/`Writer` traits and their `Mem*`/`File*`
//! implementations follow `submerge-coldb::ioutil`; `MmapReader` is new,
//! since the builders here are stream-oriented but the finished on-disk
//! formats are read lock-free straight off a memory map (spec.md §5).

use std::{
    fs::File,
    io::{BufReader, BufWriter, Cursor, Read, Seek, Write},
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{err, Result};

pub trait Reader: Read + Seek + Send + Sized {
    fn try_clone_independent(&self) -> std::io::Result<Self>;
}

pub trait Writer: Write + Seek + Send + Sized {
    type PairedReader: Reader;
    fn try_into_reader(self) -> std::io::Result<Self::PairedReader>;
}

// MemReader

pub struct MemReader {
    mem: Cursor<Arc<[u8]>>,
}

impl MemReader {
    fn new(mem: Arc<[u8]>) -> Self {
        Self { mem: Cursor::new(mem) }
    }
}

impl From<Vec<u8>> for MemReader {
    fn from(vec: Vec<u8>) -> Self {
        let rc: Arc<[u8]> = Arc::from(vec);
        Self::new(rc)
    }
}

impl Read for MemReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.mem.read(buf)
    }
}

impl Seek for MemReader {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.mem.seek(pos)
    }
}

impl Reader for MemReader {
    fn try_clone_independent(&self) -> std::io::Result<Self> {
        let rc = self.mem.get_ref().clone();
        Ok(Self::new(rc))
    }
}

// MemWriter

pub struct MemWriter {
    mem: Cursor<Vec<u8>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self { mem: Cursor::new(Vec::new()) }
    }
}

impl Default for MemWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.mem.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.mem.flush()
    }
}

impl Seek for MemWriter {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.mem.seek(pos)
    }
}

impl Writer for MemWriter {
    type PairedReader = MemReader;
    fn try_into_reader(self) -> std::io::Result<Self::PairedReader> {
        let mem = self.mem.into_inner();
        let rc: Arc<[u8]> = Arc::from(mem);
        Ok(MemReader { mem: Cursor::new(rc) })
    }
}

// FileReader

pub struct FileReader {
    file: BufReader<File>,
    path: PathBuf,
}

impl FileReader {
    pub fn try_open_existing(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let file = BufReader::new(file);
        Ok(Self { file, path })
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileReader {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Reader for FileReader {
    fn try_clone_independent(&self) -> std::io::Result<Self> {
        FileReader::try_open_existing(self.path.clone())
    }
}

// FileWriter

pub struct FileWriter {
    file: BufWriter<File>,
    path: PathBuf,
}

impl FileWriter {
    pub fn try_create_non_existing(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        let file = BufWriter::new(file);
        Ok(Self { file, path })
    }

    pub fn try_create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let file = BufWriter::new(file);
        Ok(Self { file, path })
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FileWriter {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Writer for FileWriter {
    type PairedReader = FileReader;
    fn try_into_reader(self) -> std::io::Result<Self::PairedReader> {
        let Self { mut file, path } = self;
        file.flush()?;
        let file = file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        FileReader::try_open_existing(path)
    }
}

/// A read-only memory-mapped file: the storage backing for every finished
/// tightly packed artifact once a builder has produced it. All reads on a
/// `MmapReader` are lock-free functions of `(base_pointer, offset)`
/// (spec.md §5), and it is `Clone`-able cheaply since the map is refcounted.
#[derive(Clone)]
pub struct MmapReader {
    mmap: Arc<memmap2::Mmap>,
}

impl MmapReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| err(format!("failed to open {}: {e}", path.as_ref().display())))?;
        // SAFETY: the mapped files are write-once/read-many artifacts this
        // process does not mutate concurrently with the mapping's lifetime;
        // the mmap crate's usual caveat about external truncation applies.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| err(format!("failed to mmap {}: {e}", path.as_ref().display())))?;
        Ok(Self { mmap: Arc::new(mmap) })
    }

    pub fn from_bytes_for_test(bytes: Vec<u8>) -> Self {
        // Builds a throwaway temp-file-backed map so tests can exercise
        // mmap-reading code paths without a fixture file on disk.
        let mut tmp = std::env::temp_dir();
        tmp.push(format!("tpt-mmap-test-{:x}", rapidhash::rapidhash(&bytes)));
        std::fs::write(&tmp, &bytes).expect("write mmap test fixture");
        Self::open(&tmp).expect("mmap test fixture")
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl Deref for MmapReader {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn mem_writer_round_trips_through_reader() {
        let mut w = MemWriter::new();
        w.write_all(b"hello world").unwrap();
        let mut r = w.try_into_reader().unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn mmap_reader_exposes_file_contents() {
        let bytes = b"tightly packed".to_vec();
        let mapped = MmapReader::from_bytes_for_test(bytes.clone());
        assert_eq!(mapped.as_slice(), &bytes[..]);
        assert_eq!(mapped.len(), bytes.len());
    }
}
