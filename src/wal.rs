use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Bytes of framing around each payload: `len` prefix + CRC suffix.
const FRAME_OVERHEAD: u64 = 8;

/// Encode a single event to `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the file ended first.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of scanning a WAL file.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte offset just past the last intact entry.
    pub valid_len: u64,
}

/// Append-only write-ahead log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// `len` counts the bincode payload only. A torn or corrupt tail (crash
/// mid-write) is cut off by [`Wal::recover`] so that later appends stay
/// reachable on the next replay.
///
/// Buffered entries only reach the file in `flush_sync`. If that write or
/// fsync fails, the file is cut back to the last committed offset so a
/// rejected batch never shows up in a later replay. If the cut itself fails
/// the log is poisoned and refuses further appends.
#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
    pending: Vec<u8>,
    pending_events: u64,
    /// Byte offset just past the last fsynced entry.
    committed_len: u64,
    poisoned: Option<String>,
    appends_since_compact: u64,
    #[cfg(test)]
    fail_next_flush_after: Option<usize>,
}

impl Wal {
    /// Replay `path`, truncate anything after the last good entry, and open
    /// it for appending. A missing file starts an empty log.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        if file.metadata()?.len() > replay.valid_len {
            tracing::warn!(
                "WAL {}: discarding torn tail after byte {}",
                path.display(),
                replay.valid_len
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_events: 0,
            committed_len: replay.valid_len,
            poisoned: None,
            appends_since_compact: 0,
            #[cfg(test)]
            fail_next_flush_after: None,
        };
        Ok((wal, replay.events))
    }

    /// Append and fsync one event. Tests only; the engine batches through
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Not durable until the next `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.check_poisoned()?;
        // Serialization fails before any byte is buffered.
        encode_event(&mut self.pending, event)?;
        self.pending_events += 1;
        Ok(())
    }

    /// Drop everything buffered since the last `flush_sync()`.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_events = 0;
    }

    /// Write the buffer and fsync the file. On failure the whole buffer is
    /// dropped and the file is rolled back to the last committed offset.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        let result = self.write_pending();
        let written = self.pending.len() as u64;
        let events = self.pending_events;
        self.discard_pending();
        match result {
            Ok(()) => {
                self.committed_len += written;
                self.appends_since_compact += events;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    tracing::error!(
                        "WAL {}: rollback to byte {} failed, refusing further appends: {rollback}",
                        self.path.display(),
                        self.committed_len
                    );
                    self.poisoned = Some(rollback.to_string());
                }
                Err(e)
            }
        }
    }

    fn write_pending(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if let Some(n) = self.fail_next_flush_after.take() {
            let n = n.min(self.pending.len());
            self.file.write_all(&self.pending[..n])?;
            return Err(io::Error::other("injected write failure"));
        }
        self.file.write_all(&self.pending)?;
        self.file.sync_all()
    }

    /// Cut the file back to the last committed entry.
    fn rollback(&mut self) -> io::Result<()> {
        self.file.set_len(self.committed_len)?;
        self.file.sync_all()
    }

    fn check_poisoned(&self) -> io::Result<()> {
        match &self.poisoned {
            Some(reason) => Err(io::Error::other(format!("WAL is poisoned: {reason}"))),
            None => Ok(()),
        }
    }

    /// Make the next `flush_sync` write `n` bytes and then fail.
    #[cfg(test)]
    pub fn fail_next_flush_after(&mut self, n: usize) {
        self.fail_next_flush_after = Some(n);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a full snapshot to the temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.flush_sync()?;
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.file = file;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact entry. Stops at the first truncated entry, CRC
    /// mismatch, or undecodable payload.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf);

            let mut payload = vec![0u8; len as usize];
            if !read_frame_part(&mut reader, &mut payload)? {
                break;
            }

            let mut crc_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => break,
            }
            replay.valid_len += u64::from(len) + FRAME_OVERHEAD;
        }

        Ok(replay)
    }
}
