//! Binary session log
//!
//! A log is a bare sequence of 24-byte little-endian records, no header or
//! trailer:
//!
//! ```text
//! | timestamp_ms (i64) | frame_id (u32) | pad (u32, zero) | value (f64) |
//! ```
//!
//! [`LogWriter`] appends records to a fresh file per session; [`LogReader`] reads
//! them back.

use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::types::{millis_to_timestamp, now_millis, Timestamp};

/// Errors from writing or reading a session log
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Log I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path:?} ends with a partial record: {len} bytes at offset {offset}")]
    Truncated {
        path: PathBuf,
        offset: u64,
        len: usize,
    },

    #[error("{path:?} record at offset {offset} is corrupt: padding is 0x{pad:08X}")]
    Corrupt { path: PathBuf, offset: u64, pad: u32 },
}

impl LogError {
    fn io(path: &Path, source: io::Error) -> Self {
        LogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One persisted value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogEntry {
    /// Write time in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub frame_id: u32,
    pub value: f64,
}

impl LogEntry {
    /// Encoded record size
    pub const SIZE: usize = 24;

    pub fn new(timestamp_ms: i64, frame_id: u32, value: f64) -> Self {
        Self {
            timestamp_ms,
            frame_id,
            value,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        millis_to_timestamp(self.timestamp_ms)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_i64(&mut buf[0..8], self.timestamp_ms);
        LittleEndian::write_u32(&mut buf[8..12], self.frame_id);
        LittleEndian::write_f64(&mut buf[16..24], self.value);
        buf
    }

    /// Decode a record; `Err` carries a non-zero padding word
    pub fn decode(buf: &[u8; Self::SIZE]) -> std::result::Result<Self, u32> {
        let pad = LittleEndian::read_u32(&buf[12..16]);
        if pad != 0 {
            return Err(pad);
        }
        Ok(Self::new(
            LittleEndian::read_i64(&buf[0..8]),
            LittleEndian::read_u32(&buf[8..12]),
            LittleEndian::read_f64(&buf[16..24]),
        ))
    }
}

/// Upper bound on `-N` suffixes tried for one session name
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Appends records to one session file
pub struct LogWriter {
    path: PathBuf,
    out: BufWriter<File>,
    last_timestamp_ms: i64,
    records: u64,
}

impl LogWriter {
    /// Open a new session file in `dir`, creating the directory if needed
    ///
    /// The file is named after the local wall-clock time
    /// (`%Y-%m-%dT%H-%M-%S.bin`); an existing file is never reused.
    pub fn create(dir: &Path) -> Result<Self, LogError> {
        std::fs::create_dir_all(dir).map_err(|e| LogError::io(dir, e))?;

        let stem = chrono::Local::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let mut last_err = None;
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{stem}.bin")
            } else {
                format!("{stem}-{attempt}.bin")
            };
            let path = dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    log::info!("Logging to {}", path.display());
                    return Ok(Self {
                        path,
                        out: BufWriter::new(file),
                        last_timestamp_ms: i64::MIN,
                        records: 0,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => last_err = Some(e),
                Err(e) => return Err(LogError::io(&path, e)),
            }
        }

        Err(LogError::io(
            &dir.join(format!("{stem}.bin")),
            last_err.unwrap_or_else(|| io::Error::from(ErrorKind::AlreadyExists)),
        ))
    }

    /// Append a record stamped with the current time
    pub fn write(&mut self, frame_id: u32, value: f64) -> Result<(), LogError> {
        self.write_at(now_millis(), frame_id, value)
    }

    /// Append a record with an explicit timestamp
    ///
    /// Timestamps are clamped so they never decrease within a session, even if
    /// the wall clock steps backwards.
    pub fn write_at(
        &mut self,
        timestamp_ms: i64,
        frame_id: u32,
        value: f64,
    ) -> Result<(), LogError> {
        let timestamp_ms = timestamp_ms.max(self.last_timestamp_ms);
        self.last_timestamp_ms = timestamp_ms;

        let entry = LogEntry::new(timestamp_ms, frame_id, value);
        self.out
            .write_all(&entry.encode())
            .map_err(|e| LogError::io(&self.path, e))?;
        self.records += 1;
        Ok(())
    }

    /// Push buffered records to stable storage
    pub fn flush(&mut self) -> Result<(), LogError> {
        self.out.flush().map_err(|e| LogError::io(&self.path, e))?;
        self.out
            .get_ref()
            .sync_data()
            .map_err(|e| LogError::io(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written this session
    pub fn records(&self) -> u64 {
        self.records
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("Final flush failed: {}", e);
        }
    }
}

/// Sequential reader over a session file
pub struct LogReader {
    path: PathBuf,
    input: BufReader<File>,
    offset: u64,
    done: bool,
}

impl LogReader {
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let file = File::open(path).map_err(|e| LogError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            input: BufReader::new(file),
            offset: 0,
            done: false,
        })
    }

    fn next_record(&mut self) -> Result<Option<LogEntry>, LogError> {
        let mut buf = [0u8; LogEntry::SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(LogError::io(&self.path, e)),
            }
        }

        match filled {
            0 => Ok(None),
            LogEntry::SIZE => {
                let offset = self.offset;
                self.offset += LogEntry::SIZE as u64;
                LogEntry::decode(&buf).map(Some).map_err(|pad| LogError::Corrupt {
                    path: self.path.clone(),
                    offset,
                    pad,
                })
            }
            len => Err(LogError::Truncated {
                path: self.path.clone(),
                offset: self.offset,
                len,
            }),
        }
    }
}

impl Iterator for LogReader {
    type Item = Result<LogEntry, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
