//! Column inverter: turns tokenized documents into sorted positions
//!
//! Batches are staged per document, then flattened into a packed term
//! arena plus a position table. Two radix sorts canonicalize the batch:
//! terms first (assigning dense term numbers), then positions by
//! `(term_num, doc_id)`. The sorted batch commits either into the
//! in-memory indexer's postings or as one sorted run in a spill file.
//!
//! Term arena layout, 4-byte aligned per entry:
//!
//! ```text
//! [4 scratch bytes][term bytes][NUL][zero padding]
//! ```
//!
//! A term ref is the byte offset of the term text divided by 4; the
//! scratch bytes in front receive the term's dense number during the term
//! sort, so number lookups need no side table.

use std::fs::File;

use crate::error::Result;
use crate::memory::PoolBuffer;
use crate::tokenizer::Token;

use super::indexer::MemoryIndexer;
use super::radix::radix_sort_by_key;
use super::spill::SpillWriter;
use super::types::{DocId, PosRecord, INVALID_DOC_ID};

/// Where a sorted batch goes on commit
pub enum CommitTarget<'a> {
    /// Feed the in-memory indexer's postings
    InMemory,
    /// Append one sorted run to a spill file
    Spill(&'a mut SpillWriter<File>),
}

/// Per-batch inverter bound to a memory pool and an indexer
pub struct ColumnInverter<'a> {
    indexer: &'a MemoryIndexer,
    terms: PoolBuffer<'a>,
    term_refs: Vec<u32>,
    positions: Vec<PosRecord>,
    terms_per_doc: Vec<(DocId, Vec<Token>)>,
    sorted: bool,
}

impl<'a> ColumnInverter<'a> {
    pub fn new(indexer: &'a MemoryIndexer) -> Self {
        Self {
            indexer,
            terms: indexer.pool().lease(),
            // index 0 is a sentinel; real refs start at 1
            term_refs: vec![0],
            positions: Vec::new(),
            terms_per_doc: Vec::new(),
            sorted: false,
        }
    }

    /// Analyze and stage a batch of rows with consecutive doc ids starting
    /// at `start_doc_id`
    pub fn invert_column<S: AsRef<str>>(&mut self, rows: &[S], start_doc_id: DocId) {
        for (i, row) in rows.iter().enumerate() {
            self.invert_row(start_doc_id + i as u32, row.as_ref());
        }
    }

    /// Analyze and stage a single row
    pub fn invert_row(&mut self, doc_id: DocId, text: &str) {
        debug_assert!(doc_id != INVALID_DOC_ID);
        debug_assert!(
            self.terms_per_doc.last().map_or(true, |(d, _)| *d < doc_id),
            "doc ids must be strictly increasing within an inverter"
        );

        let mut tokens = self.indexer.analyzer().analyze(text);
        // Tokens the arena cannot represent are dropped
        tokens.retain(|t| !t.text.is_empty() && !t.text.as_bytes().contains(&0));
        self.terms_per_doc.push((doc_id, tokens));
    }

    /// Number of staged and flattened occurrences
    pub fn len(&self) -> usize {
        self.positions.len() + self.terms_per_doc.iter().map(|(_, t)| t.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rough memory footprint, used for spill threshold decisions
    pub fn estimate_size(&self) -> usize {
        self.terms.len()
            + self.positions.len() * std::mem::size_of::<PosRecord>()
            + self
                .terms_per_doc
                .iter()
                .map(|(_, t)| t.iter().map(|tok| tok.text.len() + 16).sum::<usize>())
                .sum::<usize>()
    }

    /// Append a term to the arena; returns its term ref
    fn add_term(&mut self, term: &[u8]) -> u32 {
        let terms_size = self.terms.len() as u32;
        let unpadded_size = terms_size + 4 + term.len() as u32 + 1;
        let fully_padded_size = (unpadded_size + 3) & !3;

        self.terms.extend_from_slice(&[0u8; 4]);
        self.terms.extend_from_slice(term);
        self.terms
            .resize(fully_padded_size as usize, 0);

        let term_ref = (terms_size + 4) >> 2;
        self.term_refs.push(term_ref);
        term_ref
    }

    /// Flatten staged documents into the arena and position table
    fn flush_staged(&mut self) {
        let staged = std::mem::take(&mut self.terms_per_doc);
        for (doc_id, tokens) in staged {
            for token in &tokens {
                let term_ref = self.add_term(token.text.as_bytes());
                self.positions
                    .push(PosRecord::new(term_ref, doc_id, token.word_offset));
            }
        }
    }

    /// Fold another inverter's staged batch into this one
    ///
    /// Not symmetric: `other` is drained and must not be committed
    /// afterwards. On the first merge this inverter lazily flattens its
    /// own staging first, so occurrences land in arrival order.
    pub fn merge(&mut self, other: &mut ColumnInverter<'_>) {
        debug_assert!(
            other.positions.is_empty(),
            "merge source must still be in staging state"
        );
        if self.positions.is_empty() {
            self.flush_staged();
        }
        let staged = std::mem::take(&mut other.terms_per_doc);
        for (doc_id, tokens) in staged {
            for token in &tokens {
                let term_ref = self.add_term(token.text.as_bytes());
                self.positions
                    .push(PosRecord::new(term_ref, doc_id, token.word_offset));
            }
        }
    }

    /// Sort term refs lexicographically, assign dense term numbers and
    /// rewrite position records from refs to numbers
    fn sort_terms(&mut self) {
        let n = self.term_refs.len();
        if n <= 1 {
            return;
        }

        // Pack each ref with the big-endian 4-byte prefix of its term so
        // lexicographic order equals unsigned integer order over the
        // prefix; the comparator settles the rest of the term bytes.
        let mut keyed: Vec<u64> = Vec::with_capacity(n - 1);
        {
            let terms: &[u8] = &self.terms;
            for &r in &self.term_refs[1..] {
                let prefix = u64::from(read_prefix(terms, r));
                keyed.push((prefix << 32) | u64::from(r));
            }
            radix_sort_by_key(
                &mut keyed,
                &|k: &u64| *k,
                &|a: &u64, b: &u64| {
                    term_bytes(terms, (*a & 0xFFFF_FFFF) as u32)
                        .cmp(term_bytes(terms, (*b & 0xFFFF_FFFF) as u32))
                },
                24,
            );
        }

        // Dense numbering on strict-greater transitions; the first sorted
        // ref of each distinct term becomes its representative.
        let mut nums: Vec<u32> = Vec::with_capacity(n - 1);
        let mut term_num: u32 = 0;
        {
            let terms: &[u8] = &self.terms;
            let mut last_ref: Option<u32> = None;
            for k in &keyed {
                let r = (*k & 0xFFFF_FFFF) as u32;
                let is_new = match last_ref {
                    None => true,
                    Some(l) => term_bytes(terms, l) < term_bytes(terms, r),
                };
                if is_new {
                    term_num += 1;
                    self.term_refs[term_num as usize] = r;
                    last_ref = Some(r);
                }
                nums.push(term_num);
            }
        }
        self.term_refs.truncate(term_num as usize + 1);

        // Write each occurrence's number into its arena scratch bytes
        for (k, num) in keyed.iter().zip(&nums) {
            let r = (*k & 0xFFFF_FFFF) as u32;
            write_term_num(&mut self.terms, r, *num);
        }

        // Positions still hold term refs; swap in the term numbers
        let terms: &[u8] = &self.terms;
        for p in &mut self.positions {
            p.term_num = read_term_num(terms, p.term_num);
        }
    }

    /// Flatten, sort terms, then sort positions by `(term_num, doc_id)`
    pub fn sort(&mut self) {
        if self.positions.is_empty() {
            self.flush_staged();
        }
        self.sort_terms();
        radix_sort_by_key(
            &mut self.positions,
            &|p: &PosRecord| p.sort_key(),
            &|a: &PosRecord, b: &PosRecord| a.cmp(b),
            56,
        );
        self.sorted = true;
    }

    /// Commit the sorted batch, then reset for reuse. Returns the number
    /// of occurrences committed.
    pub fn commit(&mut self, target: CommitTarget<'_>) -> Result<u64> {
        self.sort();
        let count = self.positions.len() as u64;
        match target {
            CommitTarget::InMemory => self.generate_posting()?,
            CommitTarget::Spill(writer) => {
                self.spill_sort_results(writer)?;
            }
        }
        self.reset();
        Ok(count)
    }

    /// Feed the sorted positions into the indexer's postings
    ///
    /// Requires `sort` to have run. Consecutive duplicate positions are
    /// elided, so postings end up strictly increasing all the way down.
    pub fn generate_posting(&mut self) -> Result<()> {
        debug_assert!(self.sorted, "generate_posting before sort");

        let mut postings = self.indexer.postings_mut();
        let mut i = 0;
        while i < self.positions.len() {
            let term_num = self.positions[i].term_num;
            let mut j = i + 1;
            while j < self.positions.len() && self.positions[j].term_num == term_num {
                j += 1;
            }

            let term = term_bytes(&self.terms, self.term_refs[term_num as usize]);
            let term = std::str::from_utf8(term)
                .expect("arena terms are UTF-8 tokens")
                .to_string();
            let builder = postings.entry(term).or_default();

            let mut last_doc_id = INVALID_DOC_ID;
            let mut last_term_pos = u32::MAX;
            for p in &self.positions[i..j] {
                if p.doc_id != last_doc_id {
                    builder.begin_document(p.doc_id);
                    last_doc_id = p.doc_id;
                    last_term_pos = u32::MAX;
                }
                if p.term_pos != last_term_pos {
                    builder.add_position(p.term_pos);
                    last_term_pos = p.term_pos;
                }
            }

            i = j;
        }
        Ok(())
    }

    /// Append the sorted batch as one run to the spill file
    ///
    /// Requires `sort` to have run. Returns the number of records in the
    /// run; the writer accumulates the total tuple count.
    pub fn spill_sort_results(&mut self, writer: &mut SpillWriter<File>) -> Result<u64> {
        debug_assert!(self.sorted, "spill_sort_results before sort");

        writer.begin_run(self.positions.len() as u32)?;
        let mut last_term_num = 0u32;
        let mut term: &[u8] = &[];
        for p in &self.positions {
            if p.term_num != last_term_num {
                last_term_num = p.term_num;
                term = term_bytes(&self.terms, self.term_refs[p.term_num as usize]);
            }
            writer.push_record(term, p.doc_id, p.term_pos)?;
        }
        writer.end_run()?;
        Ok(self.positions.len() as u64)
    }

    /// Clear all batch state, keeping leased capacity for the next batch
    pub fn reset(&mut self) {
        self.terms.clear();
        self.term_refs.clear();
        self.term_refs.push(0);
        self.positions.clear();
        self.terms_per_doc.clear();
        self.sorted = false;
    }

    #[cfg(test)]
    fn sorted_term_list(&self) -> Vec<String> {
        self.term_refs[1..]
            .iter()
            .map(|&r| String::from_utf8(term_bytes(&self.terms, r).to_vec()).unwrap())
            .collect()
    }

    #[cfg(test)]
    fn position_records(&self) -> &[PosRecord] {
        &self.positions
    }
}

/// Term text of a ref, up to its NUL terminator
fn term_bytes(terms: &[u8], term_ref: u32) -> &[u8] {
    let start = (term_ref as usize) * 4;
    let len = terms[start..]
        .iter()
        .position(|&b| b == 0)
        .expect("arena terms are NUL-terminated");
    &terms[start..start + len]
}

/// Big-endian read of the first four bytes at the term text; short terms
/// are zero-extended by their NUL terminator and padding
fn read_prefix(terms: &[u8], term_ref: u32) -> u32 {
    let start = (term_ref as usize) * 4;
    u32::from_be_bytes(terms[start..start + 4].try_into().unwrap())
}

/// Term number scratch lives in the 4 bytes before the term text
fn read_term_num(terms: &[u8], term_ref: u32) -> u32 {
    let start = (term_ref as usize) * 4 - 4;
    u32::from_ne_bytes(terms[start..start + 4].try_into().unwrap())
}

fn write_term_num(terms: &mut [u8], term_ref: u32, term_num: u32) {
    let start = (term_ref as usize) * 4 - 4;
    terms[start..start + 4].copy_from_slice(&term_num.to_ne_bytes());
}
