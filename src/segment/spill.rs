//! Spill file for external sorting of inverted batches
//!
//! Each committed batch appends one *run* of sorted records. A run's
//! header is written with placeholder sizes, then patched in place once
//! the records are out:
//!
//! ```text
//! run    := data_size u32 | n_rec u32 | next_off u64 | n_rec x record
//! record := rec_len u16 | term bytes | 0u8 | doc_id u32 | term_pos u32
//! rec_len = term_len + 1 + 4 + 4
//! ```
//!
//! `next_off` is the absolute file offset where the following run starts,
//! letting a reader walk runs without parsing records. Native endianness;
//! spill files are transient and never leave the machine that wrote them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{MantixError, Result};

use super::types::DocId;

/// Fixed run header size: data_size + n_rec + next_off
const RUN_HEADER_LEN: u64 = 4 + 4 + 8;

/// One spilled `(term, doc_id, term_pos)` tuple
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpillRecord {
    pub term: Vec<u8>,
    pub doc_id: DocId,
    pub term_pos: u32,
}

impl SpillRecord {
    fn sort_key(&self) -> (&[u8], DocId, u32) {
        (&self.term, self.doc_id, self.term_pos)
    }
}

/// Writer appending runs to a spill file
///
/// The underlying stream must support random-access writes: the run
/// header is patched with `seek` after the records are written.
pub struct SpillWriter<W: Write + Seek> {
    inner: W,
    tuple_count: u64,
    run_count: u32,
    // in-flight run state
    data_size_pos: u64,
    next_off_pos: u64,
    data_start: u64,
    pending: Option<u32>,
    written: u32,
}

impl<W: Write + Seek> SpillWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            tuple_count: 0,
            run_count: 0,
            data_size_pos: 0,
            next_off_pos: 0,
            data_start: 0,
            pending: None,
            written: 0,
        }
    }

    /// Total records written across all runs
    pub fn tuple_count(&self) -> u64 {
        self.tuple_count
    }

    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    /// Start a run of `n_rec` records; placeholder sizes are patched by
    /// `end_run`
    pub fn begin_run(&mut self, n_rec: u32) -> Result<()> {
        assert!(self.pending.is_none(), "previous run still open");

        self.data_size_pos = self.inner.stream_position()?;
        self.inner.write_all(&0u32.to_ne_bytes())?;
        self.inner.write_all(&n_rec.to_ne_bytes())?;
        self.next_off_pos = self.inner.stream_position()?;
        self.inner.write_all(&0u64.to_ne_bytes())?;
        self.data_start = self.inner.stream_position()?;
        self.pending = Some(n_rec);
        self.written = 0;
        Ok(())
    }

    /// Append one record to the open run
    pub fn push_record(&mut self, term: &[u8], doc_id: DocId, term_pos: u32) -> Result<()> {
        debug_assert!(self.pending.is_some(), "no open run");

        let rec_len = (term.len() + 1 + 4 + 4) as u16;
        self.inner.write_all(&rec_len.to_ne_bytes())?;
        self.inner.write_all(term)?;
        self.inner.write_all(&[0u8])?;
        self.inner.write_all(&doc_id.to_ne_bytes())?;
        self.inner.write_all(&term_pos.to_ne_bytes())?;
        self.written += 1;
        Ok(())
    }

    /// Patch the run header and leave the cursor where the next run starts
    pub fn end_run(&mut self) -> Result<()> {
        let n_rec = self.pending.take().expect("no open run");
        assert_eq!(n_rec, self.written, "run record count mismatch");

        let next_off = self.inner.stream_position()?;
        let data_size = (next_off - self.data_start) as u32;

        self.inner.seek(SeekFrom::Start(self.data_size_pos))?;
        self.inner.write_all(&data_size.to_ne_bytes())?;
        self.inner.seek(SeekFrom::Start(self.next_off_pos))?;
        self.inner.write_all(&next_off.to_ne_bytes())?;
        self.inner.seek(SeekFrom::Start(next_off))?;
        self.inner.flush()?;

        self.tuple_count += u64::from(n_rec);
        self.run_count += 1;
        Ok(())
    }

    /// Write a whole run from a slice of records
    pub fn write_run(&mut self, records: &[SpillRecord]) -> Result<()> {
        self.begin_run(records.len() as u32)?;
        for rec in records {
            self.push_record(&rec.term, rec.doc_id, rec.term_pos)?;
        }
        self.end_run()
    }
}

/// Reader walking the runs of a spill file
pub struct SpillReader<R: Read + Seek> {
    inner: R,
    end: u64,
}

impl SpillReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let end = file.metadata()?.len();
        Ok(Self {
            inner: BufReader::new(file),
            end,
        })
    }
}

impl<R: Read + Seek> SpillReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, end })
    }

    /// Byte offsets of every run header in the file
    pub fn run_offsets(&mut self) -> Result<Vec<u64>> {
        let mut offsets = Vec::new();
        let mut at = 0u64;
        while at + RUN_HEADER_LEN <= self.end {
            offsets.push(at);
            self.inner.seek(SeekFrom::Start(at + 8))?;
            let mut buf = [0u8; 8];
            self.inner.read_exact(&mut buf)?;
            let next_off = u64::from_ne_bytes(buf);
            if next_off <= at + RUN_HEADER_LEN || next_off > self.end {
                return Err(MantixError::Corrupt(format!(
                    "spill run at {at} has bad next offset {next_off}"
                )));
            }
            at = next_off;
        }
        Ok(offsets)
    }

    /// Read the run starting at `offset` into memory
    pub fn read_run(&mut self, offset: u64) -> Result<Vec<SpillRecord>> {
        self.inner.seek(SeekFrom::Start(offset))?;

        let mut head = [0u8; RUN_HEADER_LEN as usize];
        self.inner.read_exact(&mut head)?;
        let data_size = u32::from_ne_bytes(head[0..4].try_into().unwrap());
        let n_rec = u32::from_ne_bytes(head[4..8].try_into().unwrap());

        let mut records = Vec::with_capacity(n_rec as usize);
        let mut consumed = 0usize;
        for _ in 0..n_rec {
            let record = read_record(&mut self.inner, &mut consumed)?;
            records.push(record);
        }
        if consumed != data_size as usize {
            return Err(MantixError::Corrupt(format!(
                "spill run at {offset}: {consumed} bytes of records, header says {data_size}"
            )));
        }
        Ok(records)
    }

    /// Read every run, in file order
    pub fn read_all_runs(&mut self) -> Result<Vec<Vec<SpillRecord>>> {
        let offsets = self.run_offsets()?;
        offsets.into_iter().map(|off| self.read_run(off)).collect()
    }
}

fn read_record<R: Read>(reader: &mut R, consumed: &mut usize) -> Result<SpillRecord> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf)?;
    let rec_len = u16::from_ne_bytes(len_buf) as usize;
    if rec_len < 1 + 4 + 4 {
        return Err(MantixError::Corrupt(format!(
            "spill record length {rec_len} too short"
        )));
    }

    let term_len = rec_len - 1 - 4 - 4;
    let mut term = vec![0u8; term_len];
    reader.read_exact(&mut term)?;

    let mut tail = [0u8; 9];
    reader.read_exact(&mut tail)?;
    if tail[0] != 0 {
        return Err(MantixError::Corrupt(
            "spill record missing terminator".to_string(),
        ));
    }

    *consumed += 2 + rec_len;
    Ok(SpillRecord {
        term,
        doc_id: u32::from_ne_bytes(tail[1..5].try_into().unwrap()),
        term_pos: u32::from_ne_bytes(tail[5..9].try_into().unwrap()),
    })
}

/// One run's cursor during a k-way merge
struct RunCursor {
    reader: BufReader<File>,
    remaining: u32,
    ordinal: usize,
    current: SpillRecord,
}

impl RunCursor {
    fn advance(&mut self) -> Result<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        let mut consumed = 0;
        self.current = read_record(&mut self.reader, &mut consumed)?;
        self.remaining -= 1;
        Ok(true)
    }
}

impl PartialEq for RunCursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RunCursor {}

impl Ord for RunCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest record is on top.
        // The ordinal keeps equal records deterministic across runs.
        self.current
            .sort_key()
            .cmp(&other.current.sort_key())
            .then(self.ordinal.cmp(&other.ordinal))
            .reverse()
    }
}

impl PartialOrd for RunCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Iterator over the k-way merge of all runs in a spill file
pub struct SpillMerge {
    heap: BinaryHeap<RunCursor>,
}

impl SpillMerge {
    /// Next record in global `(term, doc_id, term_pos)` order
    pub fn next_record(&mut self) -> Result<Option<SpillRecord>> {
        let Some(mut cursor) = self.heap.pop() else {
            return Ok(None);
        };
        let record = cursor.current.clone();
        if cursor.advance()? {
            self.heap.push(cursor);
        }
        Ok(Some(record))
    }
}

/// Open a k-way merge over every run of the spill file at `path`
///
/// Each run gets its own file handle so the cursors advance independently;
/// within a run records are already sorted, so a binary heap over the run
/// heads yields the global order.
pub fn merge_spill_runs(path: &Path) -> Result<SpillMerge> {
    let offsets = SpillReader::open(path)?.run_offsets()?;

    let mut heap = BinaryHeap::with_capacity(offsets.len());
    for (ordinal, offset) in offsets.into_iter().enumerate() {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);

        let mut head = [0u8; RUN_HEADER_LEN as usize];
        reader.read_exact(&mut head)?;
        let n_rec = u32::from_ne_bytes(head[4..8].try_into().unwrap());
        if n_rec == 0 {
            continue;
        }

        let mut cursor = RunCursor {
            reader,
            remaining: n_rec,
            ordinal,
            current: SpillRecord {
                term: Vec::new(),
                doc_id: 0,
                term_pos: 0,
            },
        };
        cursor.advance()?;
        heap.push(cursor);
    }

    Ok(SpillMerge { heap })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    fn rec(term: &str, doc_id: u32, term_pos: u32) -> SpillRecord {
        SpillRecord {
            term: term.as_bytes().to_vec(),
            doc_id,
            term_pos,
        }
    }

    #[test]
    fn test_run_roundtrip() {
        let mut writer = SpillWriter::new(Cursor::new(Vec::new()));
        let records = vec![rec("a", 0, 0), rec("b", 1, 0), rec("c", 2, 0)];
        writer.write_run(&records).unwrap();
        assert_eq!(writer.tuple_count(), 3);

        let data = writer.inner.into_inner();
        let mut reader = SpillReader::new(Cursor::new(data)).unwrap();
        let runs = reader.read_all_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0], records);
    }

    #[test]
    fn test_multiple_runs_chained_by_next_off() {
        let mut writer = SpillWriter::new(Cursor::new(Vec::new()));
        writer.write_run(&[rec("x", 0, 0), rec("y", 0, 1)]).unwrap();
        writer.write_run(&[rec("w", 1, 0)]).unwrap();
        writer.write_run(&[rec("z", 2, 5)]).unwrap();
        assert_eq!(writer.run_count(), 3);
        assert_eq!(writer.tuple_count(), 4);

        let data = writer.inner.into_inner();
        let mut reader = SpillReader::new(Cursor::new(data)).unwrap();
        let offsets = reader.run_offsets().unwrap();
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets[0], 0);

        let runs = reader.read_all_runs().unwrap();
        assert_eq!(runs[1], vec![rec("w", 1, 0)]);
        assert_eq!(runs[2], vec![rec("z", 2, 5)]);
    }

    #[test]
    fn test_header_patched_in_place() {
        let mut writer = SpillWriter::new(Cursor::new(Vec::new()));
        writer.write_run(&[rec("ab", 7, 3)]).unwrap();
        let data = writer.inner.into_inner();

        let data_size = u32::from_ne_bytes(data[0..4].try_into().unwrap());
        let n_rec = u32::from_ne_bytes(data[4..8].try_into().unwrap());
        let next_off = u64::from_ne_bytes(data[8..16].try_into().unwrap());

        // rec_len(2) + "ab"(2) + NUL(1) + doc(4) + pos(4)
        assert_eq!(data_size, 13);
        assert_eq!(n_rec, 1);
        assert_eq!(next_off, data.len() as u64);
    }

    #[test]
    fn test_corrupt_record_detected() {
        let mut writer = SpillWriter::new(Cursor::new(Vec::new()));
        writer.write_run(&[rec("ab", 7, 3)]).unwrap();
        let mut data = writer.inner.into_inner();
        // Clobber the NUL terminator
        data[2 + 2 + 2] = b'!';

        let mut reader = SpillReader::new(Cursor::new(data)).unwrap();
        assert!(reader.read_run(0).is_err());
    }

    #[test]
    fn test_k_way_merge_across_runs() {
        let file = NamedTempFile::new().unwrap();
        {
            let handle = file.reopen().unwrap();
            let mut writer = SpillWriter::new(handle);
            writer
                .write_run(&[rec("apple", 0, 0), rec("pear", 0, 1), rec("pear", 2, 0)])
                .unwrap();
            writer
                .write_run(&[rec("apple", 5, 2), rec("banana", 6, 0)])
                .unwrap();
            writer.write_run(&[rec("banana", 1, 1)]).unwrap();
        }

        let mut merge = merge_spill_runs(file.path()).unwrap();
        let mut out = Vec::new();
        while let Some(record) = merge.next_record().unwrap() {
            out.push(record);
        }

        assert_eq!(
            out,
            vec![
                rec("apple", 0, 0),
                rec("apple", 5, 2),
                rec("banana", 1, 1),
                rec("banana", 6, 0),
                rec("pear", 0, 1),
                rec("pear", 2, 0),
            ]
        );
    }

    #[test]
    fn test_empty_file_has_no_runs() {
        let mut reader = SpillReader::new(Cursor::new(Vec::new())).unwrap();
        assert!(reader.run_offsets().unwrap().is_empty());
    }
}
