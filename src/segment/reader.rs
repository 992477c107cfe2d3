//! Read side: open segments and serve per-term posting iterators
//!
//! A [`ColumnIndexReader`] opens one [`DiskSegmentReader`] per segment.
//! `lookup` gathers the term's posting bytes from every segment that has
//! it into buffers leased from the caller's session pool, then wraps
//! them in a [`PostingIterator`] that walks the segments in base-doc-id
//! order, translating local doc ids into the global space. The
//! iterator's buffers return to the session pool when it is dropped, so
//! its lifetime is bounded by the pool exactly as the query expects.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{MantixError, Result};
use crate::memory::{MemoryPool, PoolBuffer};

use super::postings::SegmentPostingCursor;
use super::term_dict::TermDictionary;
use super::types::{segment_file_names, DocId, OptionFlags, TermMeta};

/// One term's posting bytes from one segment, staged in a session-pool
/// buffer
pub struct SegmentPosting<'p> {
    pub base_doc_id: DocId,
    pub term_meta: TermMeta,
    data: PoolBuffer<'p>,
}

impl SegmentPosting<'_> {
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Reader over one on-disk segment triple
#[derive(Debug)]
pub struct DiskSegmentReader {
    base_name: String,
    base_doc_id: DocId,
    flags: OptionFlags,
    dict: TermDictionary,
    pos_path: PathBuf,
    pos_len: u64,
}

impl DiskSegmentReader {
    pub fn open(dir: &Path, base_name: &str, base_doc_id: DocId, flags: OptionFlags) -> Result<Self> {
        let (dict_name, pos_name, fst_name) = segment_file_names(base_name);
        let dict = TermDictionary::open(&dir.join(dict_name), &dir.join(fst_name), flags)?;
        let pos_path = dir.join(pos_name);
        let pos_len = std::fs::metadata(&pos_path)?.len();

        Ok(Self {
            base_name: base_name.to_string(),
            base_doc_id,
            flags,
            dict,
            pos_path,
            pos_len,
        })
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn base_doc_id(&self) -> DocId {
        self.base_doc_id
    }

    pub fn flags(&self) -> OptionFlags {
        self.flags
    }

    pub fn term_dictionary(&self) -> &TermDictionary {
        &self.dict
    }

    /// Number of distinct terms in this segment
    pub fn term_count(&self) -> usize {
        self.dict.len()
    }

    /// Document frequency of a term, zero when absent
    pub fn doc_freq(&self, term: &[u8]) -> Result<u32> {
        Ok(self.dict.get(term)?.map(|m| m.doc_freq).unwrap_or(0))
    }

    /// Fetch a term's posting bytes into a session-pool buffer
    ///
    /// Returns `None` when the segment does not contain the term.
    pub fn get_segment_posting<'p>(
        &self,
        term: &[u8],
        session_pool: &'p MemoryPool,
    ) -> Result<Option<SegmentPosting<'p>>> {
        let Some(term_meta) = self.dict.get(term)? else {
            return Ok(None);
        };

        let end = term_meta.posting_offset + u64::from(term_meta.posting_length);
        if end > self.pos_len {
            return Err(MantixError::Corrupt(format!(
                "segment '{}': posting at {}..{} exceeds posting file of {} bytes",
                self.base_name, term_meta.posting_offset, end, self.pos_len
            )));
        }

        let mut data = session_pool.lease();
        data.resize(term_meta.posting_length as usize, 0);
        let mut file = File::open(&self.pos_path)?;
        file.seek(SeekFrom::Start(term_meta.posting_offset))?;
        file.read_exact(&mut data)?;

        Ok(Some(SegmentPosting {
            base_doc_id: self.base_doc_id,
            term_meta,
            data,
        }))
    }
}

/// Reader over a set of segments forming one column index
#[derive(Debug)]
pub struct ColumnIndexReader {
    flags: OptionFlags,
    segment_readers: Vec<DiskSegmentReader>,
}

impl ColumnIndexReader {
    /// Open every segment; base doc ids must be strictly ascending
    pub fn open<S: AsRef<str>>(
        dir: &Path,
        base_names: &[S],
        base_docids: &[DocId],
        flags: OptionFlags,
    ) -> Result<Self> {
        if base_names.len() != base_docids.len() {
            return Err(MantixError::InvalidRequest(format!(
                "{} base names but {} base doc ids",
                base_names.len(),
                base_docids.len()
            )));
        }
        for window in base_docids.windows(2) {
            if window[1] <= window[0] {
                return Err(MantixError::InvalidRequest(format!(
                    "base doc ids not ascending: {} then {}",
                    window[0], window[1]
                )));
            }
        }

        let mut segment_readers = Vec::with_capacity(base_names.len());
        for (base_name, &base_doc_id) in base_names.iter().zip(base_docids) {
            segment_readers.push(DiskSegmentReader::open(
                dir,
                base_name.as_ref(),
                base_doc_id,
                flags,
            )?);
        }

        Ok(Self {
            flags,
            segment_readers,
        })
    }

    pub fn flags(&self) -> OptionFlags {
        self.flags
    }

    pub fn segment_count(&self) -> usize {
        self.segment_readers.len()
    }

    /// Total document frequency of a term across all segments
    pub fn doc_freq(&self, term: &[u8]) -> Result<u32> {
        let mut total = 0;
        for reader in &self.segment_readers {
            total += reader.doc_freq(term)?;
        }
        Ok(total)
    }

    /// Gather the term's postings from every segment into an iterator
    ///
    /// Returns `None` when no segment contains the term. The iterator's
    /// decode buffers are leased from `session_pool` and return to it on
    /// drop; reset the pool when the query ends.
    pub fn lookup<'p>(
        &self,
        term: &[u8],
        session_pool: &'p MemoryPool,
    ) -> Result<Option<PostingIterator<'p>>> {
        let mut seg_postings = Vec::new();
        for reader in &self.segment_readers {
            if let Some(posting) = reader.get_segment_posting(term, session_pool)? {
                seg_postings.push(posting);
            }
        }
        if seg_postings.is_empty() {
            return Ok(None);
        }
        Ok(Some(PostingIterator::new(self.flags, seg_postings)?))
    }
}

/// Unified posting iterator over one term's postings in N segments
///
/// Segments are visited in base-doc-id order; local doc ids are rewritten
/// into the global space by adding each segment's base. `seek` targets
/// must be non-decreasing across calls.
pub struct PostingIterator<'p> {
    flags: OptionFlags,
    segments: Vec<SegmentPosting<'p>>,
    seg_idx: usize,
    cursor: Option<SegmentPostingCursor>,
    current_doc: Option<DocId>,
    doc_freq: u32,
}

impl<'p> PostingIterator<'p> {
    pub(crate) fn new(flags: OptionFlags, segments: Vec<SegmentPosting<'p>>) -> Result<Self> {
        debug_assert!(segments.windows(2).all(|w| w[0].base_doc_id < w[1].base_doc_id));
        let doc_freq = segments.iter().map(|s| s.term_meta.doc_freq).sum();
        Ok(Self {
            flags,
            segments,
            seg_idx: 0,
            cursor: None,
            current_doc: None,
            doc_freq,
        })
    }

    /// Total documents across all segments for this term
    pub fn doc_freq(&self) -> u32 {
        self.doc_freq
    }

    /// Current doc id; only valid while positioned
    pub fn doc(&self) -> DocId {
        self.current_doc.expect("iterator not positioned")
    }

    /// Advance to the next document, in global doc id order
    pub fn advance(&mut self) -> Result<Option<DocId>> {
        while self.seg_idx < self.segments.len() {
            self.ensure_cursor()?;
            let seg = &self.segments[self.seg_idx];
            let cursor = self.cursor.as_mut().unwrap();
            match cursor.advance(&seg.data)? {
                Some(local) => {
                    let doc = local + seg.base_doc_id;
                    self.current_doc = Some(doc);
                    return Ok(Some(doc));
                }
                None => {
                    self.seg_idx += 1;
                    self.cursor = None;
                }
            }
        }
        self.current_doc = None;
        Ok(None)
    }

    /// Advance to the first document with id >= `target`
    pub fn seek(&mut self, target: DocId) -> Result<Option<DocId>> {
        if let Some(doc) = self.current_doc {
            if doc >= target {
                return Ok(Some(doc));
            }
        }

        while self.seg_idx < self.segments.len() {
            self.ensure_cursor()?;
            let seg = &self.segments[self.seg_idx];
            let cursor = self.cursor.as_mut().unwrap();
            let local_target = target.saturating_sub(seg.base_doc_id);
            match cursor.seek(&seg.data, local_target)? {
                Some(local) => {
                    let doc = local + seg.base_doc_id;
                    self.current_doc = Some(doc);
                    return Ok(Some(doc));
                }
                None => {
                    self.seg_idx += 1;
                    self.cursor = None;
                }
            }
        }
        self.current_doc = None;
        Ok(None)
    }

    /// Term frequency of the current document
    pub fn term_freq(&self) -> u32 {
        debug_assert!(self.current_doc.is_some());
        self.cursor.as_ref().map(|c| c.term_freq()).unwrap_or(0)
    }

    /// Next position within the current document
    pub fn next_position(&mut self) -> Option<u32> {
        debug_assert!(self.current_doc.is_some());
        self.cursor.as_mut().and_then(|c| c.next_position())
    }

    /// Positions of the current document
    pub fn positions(&self) -> &[u32] {
        debug_assert!(self.current_doc.is_some());
        self.cursor.as_ref().map(|c| c.positions()).unwrap_or(&[])
    }

    fn ensure_cursor(&mut self) -> Result<()> {
        if self.cursor.is_none() {
            let seg = &self.segments[self.seg_idx];
            self.cursor = Some(SegmentPostingCursor::new(
                &seg.data,
                seg.term_meta.doc_freq,
                self.flags,
            )?);
        }
        Ok(())
    }
}
