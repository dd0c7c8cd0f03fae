use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// File name of the booking log inside the data directory.
pub const WAL_FILE_NAME: &str = "ringside.wal";

/// Encode a single event to [len][bincode][crc32] format. Returns the bytes written.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(entry_len(payload.len()))
}

fn entry_len(payload_len: usize) -> u64 {
    8 + payload_len as u64
}

/// Append-only log of coach and booking events. The system of record.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) is cut off on open, so
///   new entries always follow the last valid one.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length covered by the last successful `flush_sync`.
    durable_len: u64,
    /// Bytes and entries buffered since then.
    pending_len: u64,
    pending_appends: u64,
    /// Set while a rollback has not completed; refuses further appends.
    broken: bool,
    /// Fail `append_buffered` once this many entries are pending.
    #[cfg(test)]
    pub(crate) fail_after_pending: Option<u64>,
}

impl Wal {
    /// Open (or create) the WAL file at `path` and return the events it holds.
    /// Anything past the last valid entry is truncated before appends resume.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = Self::scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            tracing::warn!(
                path = %path.display(),
                discarded_bytes = on_disk - valid_len,
                "truncating WAL after last valid entry"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            durable_len: valid_len,
            pending_len: 0,
            pending_appends: 0,
            broken: false,
            #[cfg(test)]
            fail_after_pending: None,
        };
        Ok((wal, events))
    }

    /// Append and fsync one event. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::other("WAL is unusable after a failed rollback"));
        }
        #[cfg(test)]
        if self.fail_after_pending.is_some_and(|n| self.pending_appends >= n) {
            // Leave a partial entry behind, as a short write would.
            self.writer.write_all(&[0xAB; 3])?;
            return Err(io::Error::other("injected append failure"));
        }
        self.pending_len += encode_event(&mut self.writer, event)?;
        self.pending_appends += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    /// Forget every append since the last successful `flush_sync`: buffered
    /// bytes are dropped unwritten and bytes that already reached the file
    /// are truncated away.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.broken = true;
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer instead of flushing it on drop
        let _ = stale.into_parts();

        self.appends_since_compact = self.appends_since_compact.saturating_sub(self.pending_appends);
        self.pending_len = 0;
        self.pending_appends = 0;

        let file = self.writer.get_ref();
        file.set_len(self.durable_len)?;
        file.sync_all()?;
        self.broken = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a state snapshot to the temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.pending_len = 0;
        self.pending_appends = 0;
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

    /// Replay the WAL from disk, returning all valid events in order.
    #[cfg(test)]
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Self::scan(path).map(|(events, _)| events)
    }

    /// Read valid events in order, stopping at the first truncated or corrupt
    /// entry. Also returns the byte length of the valid prefix.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            if !read_or_eof(&mut reader, &mut payload)? {
                tracing::warn!(path = %path.display(), "discarding truncated WAL entry");
                break;
            }

            let mut crc_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut crc_buf)? {
                tracing::warn!(path = %path.display(), "discarding truncated WAL entry");
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(path = %path.display(), replayed = events.len(), "WAL checksum mismatch, stopping replay");
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => {
                    events.push(event);
                    valid_len += entry_len(len);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "undecodable WAL entry, stopping replay");
                    break;
                }
            }
        }

        Ok((events, valid_len))
    }
}

/// `Ok(false)` on a clean or partial EOF.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{booking, coach};
    use crate::model::BookingStatus;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("ringside_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn sample_events() -> Vec<Event> {
        let c = coach("ali", (8, 0), (20, 0), 60);
        let b = booking(c.id, 1_000, 2_000, BookingStatus::Pending);
        vec![
            Event::CoachRegistered { coach: c.clone() },
            Event::BookingPlaced { booking: b.clone() },
            Event::BookingCancelled {
                id: b.id,
                coach_id: c.id,
                reason: Some("injury".into()),
                cancelled_at: 1_500,
            },
        ]
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = sample_events();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_discards_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let events = sample_events();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&events[0]).unwrap();
        }
        // Length prefix promising more bytes than follow
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&64u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![events[0].clone()]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let events = sample_events();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&events[0]).unwrap();
        }
        {
            let payload = bincode::serialize(&events[1]).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
            // A valid entry after the corrupt one is not reached
            let payload = bincode::serialize(&events[2]).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&crc32fast::hash(&payload).to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![events[0].clone()]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_truncates_torn_tail_before_appending() {
        let path = tmp_path("reopen_torn.wal");
        let events = sample_events();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&events[0]).unwrap();
        }
        let valid_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&64u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }
        {
            let (mut wal, replayed) = Wal::open(&path).unwrap();
            assert_eq!(replayed, vec![events[0].clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), valid_len);
            wal.append(&events[1]).unwrap();
        }
        let (_, replayed) = Wal::open(&path).unwrap();
        assert_eq!(replayed, events[..2].to_vec());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rollback_discards_unflushed_appends() {
        let path = tmp_path("rollback_buffered.wal");
        let events = sample_events();
        let (mut wal, _) = Wal::open(&path).unwrap();
        wal.append(&events[0]).unwrap();

        wal.append_buffered(&events[1]).unwrap();
        wal.rollback().unwrap();
        assert_eq!(wal.appends_since_compact(), 1);

        wal.append(&events[2]).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![events[0].clone(), events[2].clone()]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rollback_truncates_bytes_already_written() {
        let path = tmp_path("rollback_written.wal");
        let events = sample_events();
        let (mut wal, _) = Wal::open(&path).unwrap();
        wal.append(&events[0]).unwrap();
        let durable = fs::metadata(&path).unwrap().len();

        // Bytes reach the file but the batch never completes its fsync
        wal.append_buffered(&events[1]).unwrap();
        wal.writer.flush().unwrap();
        wal.writer.get_mut().write_all(&[0xAB; 5]).unwrap();
        assert!(fs::metadata(&path).unwrap().len() > durable);

        wal.rollback().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), durable);

        wal.append(&events[2]).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![events[0].clone(), events[2].clone()]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let events = sample_events();
        let (mut wal, _) = Wal::open(&path).unwrap();
        for e in &events {
            wal.append(e).unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 3);

        wal.compact(&events[..1]).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        wal.append(&events[1]).unwrap();
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap(), events[..2].to_vec());
        assert!(!Wal::tmp_path(&path).exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_need_flush() {
        let path = tmp_path("buffered_flush.wal");
        let events = sample_events();
        let (mut wal, _) = Wal::open(&path).unwrap();
        for e in &events {
            wal.append_buffered(e).unwrap();
        }
        wal.flush_sync().unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
