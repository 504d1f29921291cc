//! Line cursor over a class source file.
//!
//! Every frame owns one cursor, positioned right after the method header so
//! that reading resumes at the next instruction. The cursor remembers that
//! position (the mark) so jumps can rewind to the start of the method and
//! rescan for their label. The file handle is released when the cursor is
//! dropped, whichever way the frame goes away.
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Line-oriented reader over one class file with a single mark.
#[derive(Debug)]
pub struct SourceCursor {
    path: PathBuf,
    reader: BufReader<File>,
    // Byte offset of the next unread line.
    offset: u64,
    // 1-based number of the last line read.
    line: usize,
    mark_offset: u64,
    mark_line: usize,
}

impl SourceCursor {
    /// Opens `path` positioned at its first line.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            offset: 0,
            line: 0,
            mark_offset: 0,
            mark_line: 0,
        })
    }

    /// Reads the next physical line without its terminator, or `None` at end
    /// of file. Invalid UTF-8 is replaced rather than rejected.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let read = self.reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        self.offset += read as u64;
        self.line += 1;
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Remembers the current position as the method start.
    pub fn mark(&mut self) {
        self.mark_offset = self.offset;
        self.mark_line = self.line;
    }

    /// Rewinds to the mark.
    pub fn reset(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(self.mark_offset))?;
        self.offset = self.mark_offset;
        self.line = self.mark_line;
        Ok(())
    }

    /// Opens an independent cursor over the same file, positioned and marked
    /// at this cursor's mark. Reading from it leaves `self` untouched.
    pub fn fork(&self) -> io::Result<Self> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.mark_offset))?;
        Ok(Self {
            path: self.path.clone(),
            reader: BufReader::new(file),
            offset: self.mark_offset,
            line: self.mark_line,
            mark_offset: self.mark_offset,
            mark_line: self.mark_line,
        })
    }

    /// Number of the last line read, 1-based.
    pub fn line_number(&self) -> usize {
        self.line
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
