use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Identifies a courtside log and its record format version.
const MAGIC: &[u8; 8] = b"CSWAL\0\0\x01";

/// Upper bound on a single record payload. Anything larger is garbage.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// What [`Wal::replay`] recovered from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the valid prefix (header plus intact records).
    pub valid_len: u64,
    /// A partial or corrupt record followed the valid prefix.
    pub torn: bool,
}

enum Record {
    Event(Event, u64),
    End,
    Torn,
}

/// Write one `[u32 len][bincode payload][u32 crc32]` record. Returns its size.
fn write_record(w: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(&payload)?;
    w.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// Read until `buf` is full or EOF. Returns the number of bytes read.
fn fill(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(n)
}

fn read_record(r: &mut impl Read) -> io::Result<Record> {
    let mut len_buf = [0u8; 4];
    match fill(r, &mut len_buf)? {
        0 => return Ok(Record::End),
        4 => {}
        _ => return Ok(Record::Torn),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Torn);
    }

    let mut body = vec![0u8; len + 4];
    if fill(r, &mut body)? < body.len() {
        return Ok(Record::Torn);
    }
    let (payload, crc) = body.split_at(len);
    let crc = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    if crc != crc32fast::hash(payload) {
        return Ok(Record::Torn);
    }
    match bincode::deserialize::<Event>(payload) {
        Ok(event) => Ok(Record::Event(event, len as u64 + 8)),
        Err(_) => Ok(Record::Torn),
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent().filter(|d| !d.as_os_str().is_empty()) {
        Some(dir) => File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Append-only log of store writes, fsynced per record.
///
/// Layout: an 8-byte magic header, then records of
/// `[u32: len][bincode: Event][u32: crc32]`. A torn tail left by a crash
/// mid-write is cut off when the log is opened, so later appends stay
/// reachable on replay.
///
/// A failed append is rolled back to the last good length. If that is not
/// possible the log is poisoned and refuses writes until reopened.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Bytes of header plus committed records.
    len: u64,
    appends_since_compact: u64,
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the log at `path`, returning it together with the
    /// events it already holds.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        let len = if replay.valid_len == 0 {
            let mut file = File::create(path)?;
            file.write_all(MAGIC)?;
            file.sync_all()?;
            MAGIC.len() as u64
        } else {
            if replay.torn {
                warn!(
                    "{}: discarding torn tail after {} records",
                    path.display(),
                    replay.events.len()
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(replay.valid_len)?;
                file.sync_all()?;
            }
            replay.valid_len
        };
        let wal = Self {
            file: open_append(path)?,
            path: path.to_path_buf(),
            len,
            appends_since_compact: 0,
            poisoned: false,
        };
        Ok((wal, replay.events))
    }

    /// Append one event. Durable on return; on error nothing of it remains.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(format!(
                "{} is unwritable until the next compaction",
                self.path.display()
            )));
        }
        let mut record = Vec::new();
        let size = write_record(&mut record, event)?;
        if let Err(e) = self.file.write_all(&record).and_then(|()| self.file.sync_all()) {
            self.roll_back();
            return Err(e);
        }
        self.len += size;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Cut the file back to the committed length.
    fn roll_back(&mut self) {
        let restored = self.file.set_len(self.len).and_then(|()| self.file.sync_all());
        if let Err(e) = restored {
            error!("{}: rollback of failed append failed, refusing writes: {e}", self.path.display());
            self.poisoned = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    #[cfg(test)]
    fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Replace the log with `events`, which must recreate the current state.
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves one complete log or the other.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let written = Self::write_compacted(&tmp_path, events);
        let len = match written.and_then(|len| fs::rename(&tmp_path, &self.path).map(|()| len)) {
            Ok(len) => len,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        // From here the old handle refers to an unlinked file.
        self.install(open_append(&self.path), len)?;
        sync_parent(&self.path)
    }

    fn write_compacted(tmp_path: &Path, events: &[Event]) -> io::Result<u64> {
        let mut w = BufWriter::new(File::create(tmp_path)?);
        w.write_all(MAGIC)?;
        let mut len = MAGIC.len() as u64;
        for event in events {
            len += write_record(&mut w, event)?;
        }
        w.flush()?;
        w.get_ref().sync_all()?;
        Ok(len)
    }

    /// Switch to the handle of a freshly swapped-in log.
    fn install(&mut self, reopened: io::Result<File>, len: u64) -> io::Result<()> {
        match reopened {
            Ok(file) => {
                self.file = file;
                self.len = len;
                self.appends_since_compact = 0;
                self.poisoned = false;
                Ok(())
            }
            Err(e) => {
                error!("{}: cannot reopen after compaction, refusing writes: {e}", self.path.display());
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// Read every intact record. A missing or empty file is an empty log; a
    /// file without the header is rejected rather than overwritten.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);

        let mut header = [0u8; MAGIC.len()];
        match fill(&mut reader, &mut header)? {
            n if n == MAGIC.len() && &header == MAGIC => {}
            // Empty, or a crash while the header was being written.
            n if n < MAGIC.len() && header[..n] == MAGIC[..n] => return Ok(Replay::default()),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} is not a courtside log", path.display()),
                ));
            }
        }

        let mut replay = Replay { valid_len: MAGIC.len() as u64, ..Replay::default() };
        loop {
            match read_record(&mut reader)? {
                Record::Event(event, size) => {
                    replay.events.push(event);
                    replay.valid_len += size;
                }
                Record::End => break,
                Record::Torn => {
                    replay.torn = true;
                    break;
                }
            }
        }
        Ok(replay)
    }
}
