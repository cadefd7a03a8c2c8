//! File: a buffered readable or writable stream.
//!
//! Files are acyclic, so the handle is destroyed (and the stream flushed
//! and closed) the moment the last reference is dropped.

use std::cell::{Cell, RefCell};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use crate::class::VmDisplay;
use crate::error::{runtime_error, type_error, Result};
use crate::string::Str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

impl OpenMode {
    pub fn parse(mode: &str) -> Result<OpenMode> {
        match mode {
            "r" => Ok(OpenMode::Read),
            "w" => Ok(OpenMode::Write),
            "a" => Ok(OpenMode::Append),
            other => Err(type_error(format!(
                "Invalid file mode \"{}\" (expected \"r\", \"w\" or \"a\")",
                other
            ))),
        }
    }
}

enum Stream {
    Reader(BufReader<fs::File>),
    Writer(BufWriter<fs::File>),
    Closed,
}

pub struct File {
    path: String,
    mode: OpenMode,
    stream: RefCell<Stream>,
    /// Number of lines read so far, for the file iterator's key.
    lines_read: Cell<i64>,
}

fn io_err(path: &str, e: std::io::Error) -> crate::error::RuntimeError {
    runtime_error(format!("{}: {}", path, e))
}

impl File {
    pub fn open(path: &str, mode: OpenMode) -> Result<File> {
        let stream = match mode {
            OpenMode::Read => {
                let f = fs::File::open(path).map_err(|e| io_err(path, e))?;
                Stream::Reader(BufReader::new(f))
            }
            OpenMode::Write => {
                let f = fs::File::create(path).map_err(|e| io_err(path, e))?;
                Stream::Writer(BufWriter::new(f))
            }
            OpenMode::Append => {
                let f = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| io_err(path, e))?;
                Stream::Writer(BufWriter::new(f))
            }
        };
        Ok(File {
            path: path.to_string(),
            mode,
            stream: RefCell::new(stream),
            lines_read: Cell::new(0),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn readable(&self) -> bool {
        matches!(&*self.stream.borrow(), Stream::Reader(_))
    }

    pub fn writable(&self) -> bool {
        matches!(&*self.stream.borrow(), Stream::Writer(_))
    }

    pub fn lines_read(&self) -> i64 {
        self.lines_read.get()
    }

    fn reader_error(&self) -> crate::error::RuntimeError {
        runtime_error(format!("File \"{}\" is not open for reading", self.path))
    }

    fn writer_error(&self) -> crate::error::RuntimeError {
        runtime_error(format!("File \"{}\" is not open for writing", self.path))
    }

    /// Read the next line, without its end-of-line marker. Returns an empty
    /// string at end of file; check `at_end` first to tell the two apart.
    pub fn read_line(&self) -> Result<Str> {
        let mut stream = self.stream.borrow_mut();
        let reader = match &mut *stream {
            Stream::Reader(r) => r,
            _ => return Err(self.reader_error()),
        };
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| io_err(&self.path, e))?;
        if n > 0 {
            self.lines_read.set(self.lines_read.get() + 1);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Str::from(line))
    }

    pub fn read_all(&self) -> Result<Str> {
        let mut stream = self.stream.borrow_mut();
        let reader = match &mut *stream {
            Stream::Reader(r) => r,
            _ => return Err(self.reader_error()),
        };
        let mut contents = String::new();
        reader
            .read_to_string(&mut contents)
            .map_err(|e| io_err(&self.path, e))?;
        Ok(Str::from(contents))
    }

    pub fn read_lines(&self) -> Result<Vec<Str>> {
        let mut lines = Vec::new();
        while !self.at_end()? {
            lines.push(self.read_line()?);
        }
        Ok(lines)
    }

    pub fn write(&self, text: &str) -> Result<()> {
        let mut stream = self.stream.borrow_mut();
        let writer = match &mut *stream {
            Stream::Writer(w) => w,
            _ => return Err(self.writer_error()),
        };
        writer
            .write_all(text.as_bytes())
            .map_err(|e| io_err(&self.path, e))
    }

    pub fn write_line(&self, text: &str) -> Result<()> {
        self.write(text)?;
        self.write("\n")
    }

    pub fn seek(&self, position: i64) -> Result<()> {
        let mut stream = self.stream.borrow_mut();
        let result = match &mut *stream {
            Stream::Reader(r) => r.seek(SeekFrom::Start(position.max(0) as u64)),
            Stream::Writer(w) => w.seek(SeekFrom::Start(position.max(0) as u64)),
            Stream::Closed => return Err(runtime_error("File is closed")),
        };
        result.map(|_| ()).map_err(|e| io_err(&self.path, e))
    }

    pub fn tell(&self) -> Result<i64> {
        let mut stream = self.stream.borrow_mut();
        let result = match &mut *stream {
            Stream::Reader(r) => r.stream_position(),
            Stream::Writer(w) => w.stream_position(),
            Stream::Closed => return Err(runtime_error("File is closed")),
        };
        result.map(|p| p as i64).map_err(|e| io_err(&self.path, e))
    }

    pub fn at_end(&self) -> Result<bool> {
        let mut stream = self.stream.borrow_mut();
        match &mut *stream {
            Stream::Reader(r) => {
                let buf = r.fill_buf().map_err(|e| io_err(&self.path, e))?;
                Ok(buf.is_empty())
            }
            Stream::Writer(_) => Ok(true),
            Stream::Closed => Ok(true),
        }
    }

    pub fn close(&self) {
        let mut stream = self.stream.borrow_mut();
        if let Stream::Writer(w) = &mut *stream {
            let _ = w.flush();
        }
        *stream = Stream::Closed;
    }
}

impl VmDisplay for File {
    fn display(&self, quote: bool, _seen: bool) -> Result<String> {
        let s = format!("<file {}>", self.path);
        Ok(if quote { format!("\"{}\"", s) } else { s })
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_lines() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "one").unwrap();
        writeln!(tmp, "two").unwrap();
        tmp.flush().unwrap();

        let f = File::open(tmp.path().to_str().unwrap(), OpenMode::Read).unwrap();
        assert!(!f.at_end().unwrap());
        assert_eq!(f.read_line().unwrap().as_str(), "one");
        assert_eq!(f.read_line().unwrap().as_str(), "two");
        assert!(f.at_end().unwrap());
        assert_eq!(f.lines_read(), 2);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let path = path.to_str().unwrap();
        {
            let f = File::open(path, OpenMode::Write).unwrap();
            f.write_line("hello").unwrap();
            f.close();
        }
        let f = File::open(path, OpenMode::Read).unwrap();
        assert_eq!(f.read_all().unwrap().as_str(), "hello\n");
    }

    #[test]
    fn test_mode_errors() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let f = File::open(tmp.path().to_str().unwrap(), OpenMode::Read).unwrap();
        assert!(f.write("x").is_err());
        assert!(OpenMode::parse("z").is_err());
    }
}
