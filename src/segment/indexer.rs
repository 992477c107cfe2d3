//! In-memory indexer: accumulates postings and dumps segment triples
//!
//! The indexer owns the analyzer and the memory pool the inverters lease
//! from, plus the term -> posting table fed by `generate_posting`. A
//! batch becomes durable through `dump` (write the in-memory postings as
//! a segment) or `build_from_spill` (stream the k-way merge of spill
//! runs straight into a segment).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crc32fast::Hasher;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::config::{IndexerConfig, TokenizerConfig};
use crate::error::Result;
use crate::memory::MemoryPool;
use crate::tokenizer::Tokenizer;

use super::inverter::ColumnInverter;
use super::postings::PostingEncoder;
use super::spill::merge_spill_runs;
use super::term_dict::TermDictionaryWriter;
use super::types::{segment_file_names, DocId, OptionFlags, INVALID_DOC_ID};

/// One term's postings while the batch is in memory
///
/// Documents arrive in strictly increasing doc id order and positions in
/// strictly increasing order within a document; the inverter's sorted
/// scan guarantees both.
#[derive(Debug, Default)]
pub struct PostingBuilder {
    doc_ids: Vec<DocId>,
    tfs: Vec<u32>,
    pos_offsets: Vec<u32>,
    positions: Vec<u32>,
}

impl PostingBuilder {
    /// Open a new document in this posting
    pub fn begin_document(&mut self, doc_id: DocId) {
        debug_assert!(
            self.doc_ids.last().map_or(true, |&d| d < doc_id),
            "posting doc ids must be strictly increasing"
        );
        self.doc_ids.push(doc_id);
        self.tfs.push(0);
        self.pos_offsets.push(self.positions.len() as u32);
    }

    /// Record one occurrence in the current document
    pub fn add_position(&mut self, pos: u32) {
        debug_assert!(!self.doc_ids.is_empty(), "add_position before begin_document");
        self.positions.push(pos);
        *self.tfs.last_mut().unwrap() += 1;
    }

    pub fn doc_freq(&self) -> u32 {
        self.doc_ids.len() as u32
    }

    /// Iterate `(doc_id, tf, positions)` in doc order
    pub fn docs(&self) -> impl Iterator<Item = (DocId, u32, &[u32])> {
        (0..self.doc_ids.len()).map(move |i| {
            let start = self.pos_offsets[i] as usize;
            let end = self
                .pos_offsets
                .get(i + 1)
                .map(|&o| o as usize)
                .unwrap_or(self.positions.len());
            (self.doc_ids[i], self.tfs[i], &self.positions[start..end])
        })
    }
}

/// Memory indexer for one column
pub struct MemoryIndexer {
    flags: OptionFlags,
    config: IndexerConfig,
    analyzer: Tokenizer,
    pool: MemoryPool,
    postings: Mutex<HashMap<String, PostingBuilder>>,
}

impl MemoryIndexer {
    pub fn new(flags: OptionFlags, tokenizer_config: &TokenizerConfig) -> Self {
        Self::with_config(flags, tokenizer_config, IndexerConfig::default())
    }

    pub fn with_config(
        flags: OptionFlags,
        tokenizer_config: &TokenizerConfig,
        config: IndexerConfig,
    ) -> Self {
        let pool = MemoryPool::with_chunk_bytes(config.pool_chunk_bytes);
        Self {
            flags,
            config,
            analyzer: Tokenizer::new(tokenizer_config),
            pool,
            postings: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a batch has outgrown memory and should spill to disk
    pub fn should_spill(&self, inverter: &ColumnInverter<'_>) -> bool {
        inverter.estimate_size() >= self.config.spill_threshold_bytes
    }

    pub fn flags(&self) -> OptionFlags {
        self.flags
    }

    pub fn analyzer(&self) -> &Tokenizer {
        &self.analyzer
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    pub(crate) fn postings_mut(&self) -> MutexGuard<'_, HashMap<String, PostingBuilder>> {
        self.postings.lock()
    }

    /// Number of distinct terms accumulated
    pub fn term_count(&self) -> usize {
        self.postings.lock().len()
    }

    /// Snapshot of one term's `(doc_id, positions)` entries
    pub fn posting_docs(&self, term: &str) -> Option<Vec<(DocId, Vec<u32>)>> {
        let table = self.postings.lock();
        let builder = table.get(term)?;
        Some(
            builder
                .docs()
                .map(|(doc_id, _, positions)| (doc_id, positions.to_vec()))
                .collect(),
        )
    }

    /// Discard accumulated postings and retained pool capacity
    pub fn reset(&self) {
        self.postings.lock().clear();
        self.pool.release();
    }

    /// Write the accumulated postings as a segment triple and clear them
    pub fn dump(&self, dir: &Path, base_name: &str) -> Result<()> {
        let mut table = self.postings.lock();
        let mut terms: Vec<String> = table.keys().cloned().collect();
        terms.sort_unstable();

        std::fs::create_dir_all(dir)?;
        let cap = self.config.write_buffer_bytes;
        let (dict_name, pos_name, fst_name) = segment_file_names(base_name);
        let mut pos_writer = BufWriter::with_capacity(cap, File::create(dir.join(pos_name))?);
        let mut dict_writer = TermDictionaryWriter::new(
            BufWriter::with_capacity(cap, File::create(dir.join(dict_name))?),
            BufWriter::with_capacity(cap, File::create(dir.join(fst_name))?),
            self.flags,
        )?;

        let mut posting_offset = 0u64;
        for term in &terms {
            let builder = &table[term];
            let mut encoder = PostingEncoder::new(self.flags);
            for (doc_id, tf, positions) in builder.docs() {
                encoder.add_doc(doc_id, tf, positions)?;
            }
            let mut meta = encoder.finish(&mut pos_writer)?;
            meta.posting_offset = posting_offset;
            posting_offset += u64::from(meta.posting_length);
            dict_writer.insert(term.as_bytes(), &meta)?;
        }

        let dict_bytes = dict_writer.finish()?;
        pos_writer.flush()?;
        debug!(
            base_name,
            terms = terms.len(),
            dict_bytes,
            posting_bytes = posting_offset,
            "dumped segment"
        );

        table.clear();
        Ok(())
    }

    /// Stream the k-way merge of all spill runs into a segment triple
    ///
    /// Terms come off the merge in ascending order, so the dictionary and
    /// FST are written in one pass without materializing the batch.
    /// Returns the number of spill records consumed.
    pub fn build_from_spill(&self, spill_path: &Path, dir: &Path, base_name: &str) -> Result<u64> {
        let mut merge = merge_spill_runs(spill_path)?;

        std::fs::create_dir_all(dir)?;
        let cap = self.config.write_buffer_bytes;
        let (dict_name, pos_name, fst_name) = segment_file_names(base_name);
        let mut pos_writer = BufWriter::with_capacity(cap, File::create(dir.join(pos_name))?);
        let mut dict_writer = TermDictionaryWriter::new(
            BufWriter::with_capacity(cap, File::create(dir.join(dict_name))?),
            BufWriter::with_capacity(cap, File::create(dir.join(fst_name))?),
            self.flags,
        )?;

        let mut posting_offset = 0u64;
        let mut term_count = 0usize;
        let mut current_term: Option<Vec<u8>> = None;
        let mut encoder: Option<PostingEncoder> = None;
        let mut cur_doc: DocId = INVALID_DOC_ID;
        let mut cur_positions: Vec<u32> = Vec::new();
        let mut record_count = 0u64;

        while let Some(record) = merge.next_record()? {
            record_count += 1;
            let term_changed = current_term.as_deref() != Some(record.term.as_slice());
            let doc_changed = term_changed || record.doc_id != cur_doc;

            if doc_changed && cur_doc != INVALID_DOC_ID {
                let enc = encoder.as_mut().expect("open encoder for open doc");
                enc.add_doc(cur_doc, cur_positions.len() as u32, &cur_positions)?;
            }
            if term_changed {
                if let (Some(enc), Some(term)) = (encoder.take(), current_term.take()) {
                    let mut meta = enc.finish(&mut pos_writer)?;
                    meta.posting_offset = posting_offset;
                    posting_offset += u64::from(meta.posting_length);
                    dict_writer.insert(&term, &meta)?;
                    term_count += 1;
                }
                encoder = Some(PostingEncoder::new(self.flags));
                current_term = Some(record.term.clone());
                cur_doc = INVALID_DOC_ID;
            }
            if doc_changed {
                cur_doc = record.doc_id;
                cur_positions.clear();
            }
            // Equal consecutive positions are elided, as in the in-memory path
            if cur_positions.last() != Some(&record.term_pos) {
                cur_positions.push(record.term_pos);
            }
        }

        if cur_doc != INVALID_DOC_ID {
            let enc = encoder.as_mut().expect("open encoder for open doc");
            enc.add_doc(cur_doc, cur_positions.len() as u32, &cur_positions)?;
        }
        if let (Some(enc), Some(term)) = (encoder.take(), current_term.take()) {
            let mut meta = enc.finish(&mut pos_writer)?;
            meta.posting_offset = posting_offset;
            posting_offset += u64::from(meta.posting_length);
            dict_writer.insert(&term, &meta)?;
            term_count += 1;
        }

        dict_writer.finish()?;
        pos_writer.flush()?;
        debug!(
            base_name,
            terms = term_count,
            records = record_count,
            posting_bytes = posting_offset,
            "built segment from spill"
        );
        Ok(record_count)
    }

    /// CRC32 over the segment triple, for validation by the caller
    pub fn segment_checksum(dir: &Path, base_name: &str) -> Result<u64> {
        let (dict_name, pos_name, fst_name) = segment_file_names(base_name);
        let mut hasher = Hasher::new();
        for name in [pos_name, dict_name, fst_name] {
            hasher.update(&std::fs::read(dir.join(name))?);
        }
        Ok(u64::from(hasher.finalize()))
    }
}
