//! k-way segment merge into a consolidated segment
//!
//! A binary min-heap of per-segment term cursors yields terms in
//! ascending byte order; every cursor positioned at the minimum term is
//! drained together, so each output term is written exactly once. Doc
//! ids are rewritten into the global space by adding each segment's base
//! doc id; segments partition the doc-id space, so per-term merging is
//! pure concatenation in base order, and any posting that crosses into
//! the next segment's range is a hard error. The ascending term stream
//! feeds the FST builder directly.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{MantixError, Result};
use crate::memory::{MemoryPool, RecycledBuffer, RecyclePool};

use super::postings::{PostingEncoder, SegmentPostingCursor};
use super::term_dict::{TermDictionary, TermDictionaryWriter};
use super::types::{segment_file_names, DocId, OptionFlags, TermMeta};

/// Sequential term cursor over one input segment
struct SegmentTermCursor {
    ordinal: usize,
    base_name: String,
    base_doc_id: DocId,
    /// Base of the next segment in doc-id order, if any; postings must
    /// stay below it
    next_base: Option<(String, DocId)>,
    dict: TermDictionary,
    pos_file: File,
    pos_len: u64,
    current: Option<(Vec<u8>, TermMeta)>,
}

impl SegmentTermCursor {
    fn open(
        dir: &Path,
        ordinal: usize,
        base_name: &str,
        base_doc_id: DocId,
        next_base: Option<(String, DocId)>,
        flags: OptionFlags,
    ) -> Result<Self> {
        let (dict_name, pos_name, fst_name) = segment_file_names(base_name);
        let dict = TermDictionary::open(&dir.join(dict_name), &dir.join(fst_name), flags)?;
        let pos_file = File::open(dir.join(&pos_name))?;
        let pos_len = pos_file.metadata()?.len();

        Ok(Self {
            ordinal,
            base_name: base_name.to_string(),
            base_doc_id,
            next_base,
            dict,
            pos_file,
            pos_len,
            current: None,
        })
    }

    /// Move to the next term; `false` once the dictionary is exhausted
    fn advance(&mut self) -> Result<bool> {
        let prev = self.current.take();
        self.current = self
            .dict
            .next_term_after(prev.as_ref().map(|(t, _)| t.as_slice()))?;
        Ok(self.current.is_some())
    }

    fn term(&self) -> &[u8] {
        &self.current.as_ref().expect("cursor positioned").0
    }

    fn meta(&self) -> &TermMeta {
        &self.current.as_ref().expect("cursor positioned").1
    }

    /// Read the current term's posting bytes into a recycled buffer
    fn read_posting<'p>(&mut self, pool: &'p RecyclePool) -> Result<RecycledBuffer<'p>> {
        let meta = *self.meta();
        let end = meta.posting_offset + u64::from(meta.posting_length);
        if end > self.pos_len {
            return Err(MantixError::Corrupt(format!(
                "segment '{}': posting at {}..{} exceeds posting file of {} bytes",
                self.base_name, meta.posting_offset, end, self.pos_len
            )));
        }

        let mut buf = pool.acquire(meta.posting_length as usize);
        buf.resize(meta.posting_length as usize, 0);
        self.pos_file.seek(SeekFrom::Start(meta.posting_offset))?;
        self.pos_file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl PartialEq for SegmentTermCursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SegmentTermCursor {}

impl Ord for SegmentTermCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest term wins.
        // Ordinal keeps ties deterministic for reproducible output.
        self.term()
            .cmp(other.term())
            .then(self.ordinal.cmp(&other.ordinal))
            .reverse()
    }
}

impl PartialOrd for SegmentTermCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of segment term cursors, grouped by the minimum term
struct SegmentTermPostingQueue {
    heap: BinaryHeap<SegmentTermCursor>,
    group: Vec<SegmentTermCursor>,
}

impl SegmentTermPostingQueue {
    fn new<S: AsRef<str>>(
        dir: &Path,
        base_names: &[S],
        base_docids: &[DocId],
        flags: OptionFlags,
    ) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(base_names.len());
        for (i, (base_name, &base_doc_id)) in base_names.iter().zip(base_docids).enumerate() {
            let next_base = base_names
                .get(i + 1)
                .map(|n| (n.as_ref().to_string(), base_docids[i + 1]));
            let mut cursor = SegmentTermCursor::open(
                dir,
                i,
                base_name.as_ref(),
                base_doc_id,
                next_base,
                flags,
            )?;
            if cursor.advance()? {
                heap.push(cursor);
            }
        }
        Ok(Self {
            heap,
            group: Vec::new(),
        })
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty() && self.group.is_empty()
    }

    /// Pop every cursor positioned at the minimum term, in base order
    fn pop_current_merging(&mut self) -> &mut [SegmentTermCursor] {
        debug_assert!(self.group.is_empty(), "previous group not advanced");
        if let Some(first) = self.heap.pop() {
            loop {
                let same_term = self
                    .heap
                    .peek()
                    .is_some_and(|top| top.term() == first.term());
                if !same_term {
                    break;
                }
                let cursor = self.heap.pop().unwrap();
                self.group.push(cursor);
            }
            self.group.push(first);
            self.group.sort_by_key(|c| c.ordinal);
        }
        &mut self.group
    }

    /// Advance the drained group and return live cursors to the heap
    fn move_to_next_term(&mut self) -> Result<()> {
        for mut cursor in self.group.drain(..) {
            if cursor.advance()? {
                self.heap.push(cursor);
            }
        }
        Ok(())
    }
}

/// Merges one term's postings from several segments into one block
struct PostingMerger<'a> {
    memory_pool: &'a MemoryPool,
    buffer_pool: &'a RecyclePool,
    encoder: PostingEncoder,
}

impl<'a> PostingMerger<'a> {
    fn new(flags: OptionFlags, memory_pool: &'a MemoryPool, buffer_pool: &'a RecyclePool) -> Self {
        Self {
            memory_pool,
            buffer_pool,
            encoder: PostingEncoder::new(flags),
        }
    }

    /// Concatenate the group's postings in base order, rewriting doc ids
    fn merge(&mut self, group: &mut [SegmentTermCursor]) -> Result<()> {
        let flags = self.encoder.flags();
        for cursor in group {
            let doc_freq = cursor.meta().doc_freq;
            let data = cursor.read_posting(self.buffer_pool)?;
            let mut postings = SegmentPostingCursor::new(&data, doc_freq, flags)?;
            while let Some(local) = postings.advance(&data)? {
                let doc = local + cursor.base_doc_id;
                if let Some((next_name, next_base)) = &cursor.next_base {
                    if doc >= *next_base {
                        return Err(MantixError::DocIdOverlap {
                            base_name: next_name.clone(),
                            base_doc_id: *next_base,
                            previous_end: doc,
                        });
                    }
                }
                self.encoder
                    .add_doc(doc, postings.term_freq(), postings.positions())?;
            }
        }
        Ok(())
    }

    /// Stage the consolidated posting in a pool buffer and flush it to
    /// the posting writer
    fn dump<W: Write>(self, pos_writer: &mut W, posting_offset: u64) -> Result<TermMeta> {
        let mut staging = self.memory_pool.lease();
        let mut meta = self.encoder.finish(&mut *staging)?;
        pos_writer.write_all(&staging)?;
        meta.posting_offset = posting_offset;
        Ok(meta)
    }
}

/// Merges N on-disk segments into one consolidated segment
pub struct ColumnIndexMerger {
    dir: PathBuf,
    flags: OptionFlags,
    memory_pool: MemoryPool,
    buffer_pool: RecyclePool,
}

impl ColumnIndexMerger {
    pub fn new(dir: &Path, flags: OptionFlags) -> Self {
        Self {
            dir: dir.to_path_buf(),
            flags,
            memory_pool: MemoryPool::new(),
            buffer_pool: RecyclePool::new(),
        }
    }

    /// Merge the named segments into `target_base_name`
    ///
    /// Input segments must share this merger's option flags and own
    /// disjoint, ascending doc-id ranges.
    pub fn merge<S: AsRef<str>>(
        &self,
        base_names: &[S],
        base_docids: &[DocId],
        target_base_name: &str,
    ) -> Result<()> {
        if base_names.is_empty() || base_names.len() != base_docids.len() {
            return Err(MantixError::InvalidRequest(format!(
                "{} base names but {} base doc ids",
                base_names.len(),
                base_docids.len()
            )));
        }
        for (i, window) in base_docids.windows(2).enumerate() {
            if window[1] <= window[0] {
                return Err(MantixError::DocIdOverlap {
                    base_name: base_names[i + 1].as_ref().to_string(),
                    base_doc_id: window[1],
                    previous_end: window[0],
                });
            }
        }

        let mut queue = SegmentTermPostingQueue::new(&self.dir, base_names, base_docids, self.flags)?;

        let (dict_name, pos_name, fst_name) = segment_file_names(target_base_name);
        let mut pos_writer = BufWriter::new(File::create(self.dir.join(pos_name))?);
        let mut dict_writer = TermDictionaryWriter::new(
            BufWriter::new(File::create(self.dir.join(dict_name))?),
            BufWriter::new(File::create(self.dir.join(fst_name))?),
            self.flags,
        )?;

        let mut posting_offset = 0u64;
        let mut term_count = 0usize;
        while !queue.is_empty() {
            let group = queue.pop_current_merging();
            let term = group[0].term().to_vec();

            let mut posting_merger =
                PostingMerger::new(self.flags, &self.memory_pool, &self.buffer_pool);
            posting_merger.merge(group)?;
            let meta = posting_merger.dump(&mut pos_writer, posting_offset)?;
            posting_offset += u64::from(meta.posting_length);

            dict_writer.insert(&term, &meta)?;
            term_count += 1;

            queue.move_to_next_term()?;
            // Inter-term recycling: the next PostingMerger starts from
            // a rewound pool
            self.memory_pool.reset();
            self.buffer_pool.reset();
        }

        dict_writer.finish()?;
        pos_writer.flush()?;
        self.memory_pool.release();
        self.buffer_pool.release();

        info!(
            target_base_name,
            segments = base_names.len(),
            terms = term_count,
            posting_bytes = posting_offset,
            "merged segments"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::segment::{ColumnIndexReader, ColumnInverter, CommitTarget, MemoryIndexer};
    use tempfile::TempDir;

    fn build_segment(dir: &Path, base_name: &str, rows: &[String], flags: OptionFlags) {
        let indexer = MemoryIndexer::new(flags, &TokenizerConfig::default());
        let mut inverter = ColumnInverter::new(&indexer);
        inverter.invert_column(rows, 0);
        inverter.commit(CommitTarget::InMemory).unwrap();
        indexer.dump(dir, base_name).unwrap();
    }

    #[test]
    fn test_merge_two_segments() {
        let dir = TempDir::new().unwrap();
        let flags = OptionFlags::full();
        build_segment(
            dir.path(),
            "a",
            &["apple pear".to_string(), "apple".to_string()],
            flags,
        );
        build_segment(
            dir.path(),
            "b",
            &["pear plum".to_string()],
            flags,
        );

        let merger = ColumnIndexMerger::new(dir.path(), flags);
        merger.merge(&["a", "b"], &[0, 100], "merged").unwrap();

        let reader = ColumnIndexReader::open(dir.path(), &["merged"], &[0], flags).unwrap();
        let pool = MemoryPool::new();

        let mut iter = reader.lookup(b"apple", &pool).unwrap().unwrap();
        assert_eq!(iter.advance().unwrap(), Some(0));
        assert_eq!(iter.advance().unwrap(), Some(1));
        assert_eq!(iter.advance().unwrap(), None);

        let mut iter = reader.lookup(b"pear", &pool).unwrap().unwrap();
        assert_eq!(iter.advance().unwrap(), Some(0));
        assert_eq!(iter.advance().unwrap(), Some(100));
        assert_eq!(iter.advance().unwrap(), None);

        let mut iter = reader.lookup(b"plum", &pool).unwrap().unwrap();
        assert_eq!(iter.advance().unwrap(), Some(100));
        assert_eq!(iter.advance().unwrap(), None);
    }

    #[test]
    fn test_merge_doc_freq_and_global_order() {
        // Two segments of 100 docs each, all containing "hello" in half
        let dir = TempDir::new().unwrap();
        let flags = OptionFlags::full();
        let rows: Vec<String> = (0..100)
            .map(|i| {
                if i % 2 == 0 {
                    format!("hello filler{i}")
                } else {
                    format!("filler{i}")
                }
            })
            .collect();
        build_segment(dir.path(), "s1", &rows, flags);
        build_segment(dir.path(), "s2", &rows, flags);

        let merger = ColumnIndexMerger::new(dir.path(), flags);
        merger.merge(&["s1", "s2"], &[0, 100], "merged").unwrap();

        let reader = ColumnIndexReader::open(dir.path(), &["merged"], &[0], flags).unwrap();
        assert_eq!(reader.doc_freq(b"hello").unwrap(), 100);

        let pool = MemoryPool::new();
        let mut iter = reader.lookup(b"hello", &pool).unwrap().unwrap();
        assert_eq!(iter.doc_freq(), 100);
        let mut prev = None;
        let mut count = 0;
        while let Some(doc) = iter.advance().unwrap() {
            if let Some(p) = prev {
                assert!(doc > p);
            }
            prev = Some(doc);
            count += 1;
        }
        assert_eq!(count, 100);
        assert_eq!(prev, Some(198));
    }

    #[test]
    fn test_merge_term_in_single_segment() {
        let dir = TempDir::new().unwrap();
        let flags = OptionFlags::full();
        build_segment(dir.path(), "a", &["lonely".to_string()], flags);
        build_segment(dir.path(), "b", &["other".to_string()], flags);

        let merger = ColumnIndexMerger::new(dir.path(), flags);
        merger.merge(&["a", "b"], &[0, 10], "merged").unwrap();

        let reader = ColumnIndexReader::open(dir.path(), &["merged"], &[0], flags).unwrap();
        let pool = MemoryPool::new();
        let mut iter = reader.lookup(b"lonely", &pool).unwrap().unwrap();
        assert_eq!(iter.advance().unwrap(), Some(0));
        assert_eq!(iter.advance().unwrap(), None);
        let mut iter = reader.lookup(b"other", &pool).unwrap().unwrap();
        assert_eq!(iter.advance().unwrap(), Some(10));
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let dir = TempDir::new().unwrap();
        let flags = OptionFlags::full();
        let rows: Vec<String> = (0..20).map(|_| "word".to_string()).collect();
        build_segment(dir.path(), "a", &rows, flags);
        build_segment(dir.path(), "b", &rows, flags);

        let merger = ColumnIndexMerger::new(dir.path(), flags);
        // Segment "a" holds docs 0..19 but "b" claims base 10
        let err = merger.merge(&["a", "b"], &[0, 10], "merged").unwrap_err();
        assert!(matches!(err, MantixError::DocIdOverlap { .. }));

        // Non-ascending bases fail before any IO
        let err = merger.merge(&["a", "b"], &[10, 10], "merged2").unwrap_err();
        assert!(matches!(err, MantixError::DocIdOverlap { .. }));
    }

    #[test]
    fn test_flag_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        build_segment(
            dir.path(),
            "with_pos",
            &["alpha".to_string()],
            OptionFlags::full(),
        );
        build_segment(
            dir.path(),
            "doc_only",
            &["alpha".to_string()],
            OptionFlags::doc_only(),
        );

        let merger = ColumnIndexMerger::new(dir.path(), OptionFlags::full());
        let err = merger
            .merge(&["with_pos", "doc_only"], &[0, 10], "merged")
            .unwrap_err();
        assert!(matches!(err, MantixError::FlagMismatch { .. }));
    }

    #[test]
    fn test_merge_preserves_positions() {
        let dir = TempDir::new().unwrap();
        let flags = OptionFlags::full();
        build_segment(dir.path(), "a", &["x y x".to_string()], flags);
        build_segment(dir.path(), "b", &["y x".to_string()], flags);

        let merger = ColumnIndexMerger::new(dir.path(), flags);
        merger.merge(&["a", "b"], &[0, 1], "merged").unwrap();

        let reader = ColumnIndexReader::open(dir.path(), &["merged"], &[0], flags).unwrap();
        let pool = MemoryPool::new();

        let mut iter = reader.lookup(b"x", &pool).unwrap().unwrap();
        assert_eq!(iter.advance().unwrap(), Some(0));
        assert_eq!(iter.positions(), &[0, 2]);
        assert_eq!(iter.term_freq(), 2);
        assert_eq!(iter.advance().unwrap(), Some(1));
        assert_eq!(iter.positions(), &[1]);
    }

    #[test]
    fn test_merger_pools_drain_after_merge() {
        let dir = TempDir::new().unwrap();
        let flags = OptionFlags::full();
        build_segment(dir.path(), "a", &["one two three".to_string()], flags);
        build_segment(dir.path(), "b", &["two four".to_string()], flags);

        let merger = ColumnIndexMerger::new(dir.path(), flags);
        merger.merge(&["a", "b"], &[0, 5], "merged").unwrap();

        assert!(merger.memory_pool.usage().is_zero());
        assert!(merger.buffer_pool.usage().is_zero());
    }
}
