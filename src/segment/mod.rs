//! Per-column inverted index segments
//!
//! A segment is an immutable index partition covering a contiguous doc-id
//! range, stored as three co-located files sharing a base name:
//! `<base>.dict` (term metadata records in term-sorted order), `<base>.pos`
//! (concatenated posting blocks) and `<base>.dict.fst` (FST mapping term
//! bytes to the `.dict` offset of the term's record).
//!
//! Build path: tokenized batches flow through a [`ColumnInverter`] into
//! either the in-memory [`MemoryIndexer`] or a spill file, and segments are
//! consolidated with the [`ColumnIndexMerger`]. Query path: a
//! [`ColumnIndexReader`] opens a set of segments and serves per-term
//! posting iterators.

mod inverter;
mod merger;
mod indexer;
mod postings;
mod radix;
mod reader;
mod spill;
mod term_dict;
mod types;

pub use inverter::{ColumnInverter, CommitTarget};
pub use indexer::{MemoryIndexer, PostingBuilder};
pub use merger::ColumnIndexMerger;
pub use postings::{PostingEncoder, SegmentPostingCursor};
pub use reader::{ColumnIndexReader, DiskSegmentReader, PostingIterator, SegmentPosting};
pub use spill::{merge_spill_runs, SpillMerge, SpillReader, SpillRecord, SpillWriter};
pub use term_dict::{TermDictionary, TermDictionaryWriter};
pub use types::{
    segment_file_names, DocId, OptionFlags, PosRecord, TermMeta, BLOCK_SIZE, INVALID_DOC_ID,
};
