//! File-backed data source

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{DataSource, SourceError};

/// Seekable source over a file on disk
#[derive(Debug)]
pub struct FileSource {
    reader: BufReader<File>,
    path: PathBuf,
    size: u64,
}

impl FileSource {
    /// Open a file for reading; its size is captured at open time
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| SourceError::Open(format!("{}: {}", path.display(), e)))?;
        let size = file.metadata()?.len();

        tracing::debug!(path = %path.display(), size, "Opened file source");

        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            size,
        })
    }

    /// Path this source was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        Ok(self.reader.read(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, SourceError> {
        Ok(self.reader.seek(pos)?)
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempdir::TempDir;

    fn write_temp(dir: &TempDir, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join("source.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_file_source_reads_and_seeks() {
        let dir = TempDir::new("file_source").unwrap();
        let path = write_temp(&dir, b"0123456789");
        let mut source = FileSource::open(&path).unwrap();

        assert_eq!(source.size(), Some(10));
        assert!(source.is_seekable());

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");

        assert_eq!(source.seek(SeekFrom::End(-2)).unwrap(), 8);
        let mut tail = [0u8; 8];
        assert_eq!(source.read(&mut tail).unwrap(), 2);
        assert_eq!(&tail[..2], b"89");

        // End of file reads as zero bytes
        assert_eq!(source.read(&mut tail).unwrap(), 0);
    }

    #[test]
    fn test_file_source_missing_file() {
        let dir = TempDir::new("file_source").unwrap();
        let result = FileSource::open(dir.path().join("missing.mp4"));
        assert!(matches!(result, Err(SourceError::Open(_))));
    }
}
