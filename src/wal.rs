use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_WAL_RECORD_BYTES;
use crate::model::WalRecord;

const COMPACT_EXTENSION: &str = "wal.tmp";

/// Frame one record as `[len][bincode][crc32]`.
fn encode_record(writer: &mut impl Write, record: &WalRecord) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_WAL_RECORD_BYTES)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn end of file.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact payload, or `None` once the log ends or stops verifying. A
/// length prefix above [`MAX_WAL_RECORD_BYTES`] counts as torn.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_WAL_RECORD_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Append-only write-ahead log of [`WalRecord`]s.
///
/// Each entry is `[u32 len][bincode payload][u32 crc32]`, little endian. A torn
/// tail left by a crash fails the length or CRC check and is dropped on replay,
/// along with anything after it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one record.
    #[cfg(test)]
    pub fn append(&mut self, record: &WalRecord) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record; nothing is durable until [`Wal::flush_sync`].
    pub fn append_buffered(&mut self, record: &WalRecord) -> io::Result<()> {
        encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted log next to `path` and fsync it. Does not touch the
    /// live file; follow with [`Wal::swap_compact_file`].
    pub fn write_compact_file(path: &Path, records: &[WalRecord]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension(COMPACT_EXTENSION))?);
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the live log and reopen it for append.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension(COMPACT_EXTENSION), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[WalRecord]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact record in file order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<WalRecord>> {
        Ok(scan(path)?.0)
    }

    /// Replay the log, cut off any torn or corrupt tail, and open it for
    /// append. New records then follow the last intact frame instead of
    /// landing behind bytes that replay would stop at.
    pub fn recover(path: &Path) -> io::Result<(Vec<WalRecord>, Self)> {
        let (records, intact_len) = scan(path)?;
        let wal = Self::open(path)?;
        let file = wal.writer.get_ref();
        if file.metadata()?.len() > intact_len {
            file.set_len(intact_len)?;
            file.sync_all()?;
        }
        Ok((records, wal))
    }
}

/// Intact records and the byte length they occupy.
fn scan(path: &Path) -> io::Result<(Vec<WalRecord>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut intact_len = 0u64;
    while let Some(payload) = read_frame(&mut reader)? {
        match bincode::deserialize::<WalRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
        intact_len += 8 + payload.len() as u64;
    }
    Ok((records, intact_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("classbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn classroom(name: &str) -> ClassroomInfo {
        ClassroomInfo {
            id: Ulid::new(),
            name: name.into(),
            capacity: 20,
            created_at: 1,
            updated_at: 1,
        }
    }

    fn audit(entity_id: Ulid, action: AuditAction) -> AuditEntry {
        AuditEntry {
            id: Ulid::new(),
            at: 1,
            actor: "admin".into(),
            action,
            entity: AuditEntity::Classroom,
            entity_id,
        }
    }

    fn commit(event: Event, entity_id: Ulid, action: AuditAction) -> WalRecord {
        WalRecord::Commit {
            event,
            audit: audit(entity_id, action),
        }
    }

    fn created(info: &ClassroomInfo) -> WalRecord {
        commit(
            Event::ClassroomCreated { classroom: info.clone() },
            info.id,
            AuditAction::Create,
        )
    }

    #[test]
    fn records_survive_reopen() {
        let path = tmp_path("reopen.wal");
        let room = classroom("A-101");
        let records = vec![
            created(&room),
            commit(Event::ClassroomDeleted { id: room.id }, room.id, AuditAction::Delete),
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for r in &records {
                wal.append(r).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), records);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let record = created(&classroom("A-101"));
        Wal::open(&path).unwrap().append(&record).unwrap();

        // Length prefix promising more bytes than follow.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&64u32.to_le_bytes()).unwrap();
        f.write_all(&[7u8; 10]).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), vec![record]);
    }

    #[test]
    fn missing_file_replays_empty() {
        let path = tmp_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = created(&classroom("A-101"));
        let bad = bincode::serialize(&created(&classroom("B-202"))).unwrap();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(bad.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&bad).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        {
            // Intact but unreachable after the corrupt entry.
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn compaction_shrinks_log_and_keeps_history() {
        let path = tmp_path("compact_shrinks.wal");
        let room = classroom("A-101");
        let mut history = Vec::new();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&created(&room)).unwrap();
            history.push(audit(room.id, AuditAction::Create));
            for i in 0..20 {
                let renamed = ClassroomInfo {
                    name: format!("A-{i}"),
                    ..room.clone()
                };
                let record = commit(
                    Event::ClassroomUpdated { classroom: renamed },
                    room.id,
                    AuditAction::Update,
                );
                wal.append(&record).unwrap();
                if let WalRecord::Commit { audit, .. } = record {
                    history.push(audit);
                }
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let final_room = ClassroomInfo {
            name: "A-19".into(),
            ..room.clone()
        };
        let mut compacted: Vec<WalRecord> = history.into_iter().map(WalRecord::Audit).collect();
        compacted.push(WalRecord::Event(Event::ClassroomCreated {
            classroom: final_room,
        }));
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), compacted);
        assert!(!path.with_extension(COMPACT_EXTENSION).exists());
    }

    #[test]
    fn appends_after_compaction_follow_snapshot() {
        let path = tmp_path("compact_then_append.wal");
        let room = classroom("A-101");
        let snapshot = vec![WalRecord::Event(Event::ClassroomCreated {
            classroom: room.clone(),
        })];
        let later = commit(Event::ClassroomDeleted { id: room.id }, room.id, AuditAction::Delete);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&created(&room)).unwrap();
            wal.compact(&snapshot).unwrap();
            wal.append(&later).unwrap();
        }
        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], snapshot[0]);
        assert_eq!(replayed[1], later);
    }

    #[test]
    fn buffered_appends_are_counted_and_flushed_together() {
        let path = tmp_path("group_commit.wal");
        let records: Vec<WalRecord> = (0..5).map(|i| created(&classroom(&format!("R{i}")))).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for r in &records {
                wal.append_buffered(r).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), records);
    }

    #[test]
    fn recover_truncates_torn_tail_before_appending() {
        let path = tmp_path("recover_torn.wal");
        let first = created(&classroom("A-101"));
        Wal::open(&path).unwrap().append(&first).unwrap();
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&64u32.to_le_bytes()).unwrap();
            f.write_all(&[7u8; 10]).unwrap();
        }

        let second = created(&classroom("B-202"));
        {
            let (records, mut wal) = Wal::recover(&path).unwrap();
            assert_eq!(records, vec![first.clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), intact);
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn oversized_length_prefix_is_torn() {
        let path = tmp_path("oversized_len.wal");
        let record = created(&classroom("A-101"));
        Wal::open(&path).unwrap().append(&record).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![record.clone()]);

        let (records, _wal) = Wal::recover(&path).unwrap();
        assert_eq!(records, vec![record]);
    }

    #[test]
    fn batch_record_replays_whole_or_not_at_all() {
        let path = tmp_path("batch.wal");
        let rooms: Vec<ClassroomInfo> = (0..3).map(|i| classroom(&format!("R{i}"))).collect();
        let batch = WalRecord::Batch {
            commits: rooms
                .iter()
                .map(|r| {
                    (
                        Event::ClassroomCreated { classroom: r.clone() },
                        audit(r.id, AuditAction::Create),
                    )
                })
                .collect(),
        };
        let before = created(&classroom("A-101"));
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&before).unwrap();
            wal.append(&batch).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![before.clone(), batch]);

        // Lose the last byte of the batch frame: the whole batch goes.
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 1).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![before]);
    }
}
