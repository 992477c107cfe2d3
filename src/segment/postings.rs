//! Posting codec with block-based compression
//!
//! A term's postings are stored in fixed-size blocks of 128 documents:
//! - doc id deltas: bitpacked
//! - term frequencies: bitpacked (when `HAS_TF`)
//! - positions: per-doc delta-encoded vbyte substream (when `HAS_POSITION`)
//! - skip section ahead of the blocks (when `HAS_BLOCK_SKIP`) recording
//!   each block's last doc id and encoded length, enabling block skipping
//!   during `seek`
//!
//! Layout of one term's posting data:
//!
//! ```text
//! vbyte block_count
//! skip section (iff HAS_BLOCK_SKIP):
//!     per block: vbyte last_doc (delta from previous block's last doc)
//!                vbyte block_byte_length
//! blocks:
//!     vbyte doc_count
//!     bitpacked doc id deltas
//!     bitpacked term frequencies        (iff HAS_TF)
//!     per doc: vbyte positions          (iff HAS_POSITION; count = tf,
//!                                        first absolute, rest deltas)
//! ```

use std::io::{self, Write};

use crate::error::{MantixError, Result};

use super::types::{DocId, OptionFlags, TermMeta, BLOCK_SIZE};

/// Variable-byte encoding for integers (high bit marks the last byte)
pub fn encode_vbyte(value: u32, output: &mut Vec<u8>) {
    let mut v = value;
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            output.push(byte | 0x80);
            break;
        } else {
            output.push(byte);
        }
    }
}

/// Decode a variable-byte encoded integer
pub fn decode_vbyte(input: &[u8], pos: &mut usize) -> io::Result<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;

    loop {
        if *pos >= input.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected end of vbyte",
            ));
        }

        let byte = input[*pos];
        *pos += 1;

        result |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 != 0 {
            return Ok(result);
        }

        shift += 7;
        if shift > 28 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "vbyte value too large",
            ));
        }
    }
}

/// Bitpack a block of integers using the width of the largest value
pub fn bitpack_encode(values: &[u32], output: &mut Vec<u8>) {
    if values.is_empty() {
        output.push(0);
        return;
    }

    let max_val = *values.iter().max().unwrap();
    let bits_needed = if max_val == 0 {
        1
    } else {
        32 - max_val.leading_zeros()
    } as u8;

    output.push(bits_needed);

    let mut current: u64 = 0;
    let mut bits_in_current = 0u32;

    for &value in values {
        current |= (value as u64) << bits_in_current;
        bits_in_current += bits_needed as u32;

        while bits_in_current >= 8 {
            output.push(current as u8);
            current >>= 8;
            bits_in_current -= 8;
        }
    }

    if bits_in_current > 0 {
        output.push(current as u8);
    }
}

/// Decode `count` bitpacked integers into `out`
pub fn bitpack_decode(
    input: &[u8],
    pos: &mut usize,
    count: usize,
    out: &mut Vec<u32>,
) -> io::Result<()> {
    out.clear();
    if *pos >= input.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "unexpected end of bitpack",
        ));
    }

    let bits_needed = input[*pos] as u32;
    *pos += 1;

    if bits_needed == 0 {
        out.resize(count, 0);
        return Ok(());
    }
    if bits_needed > 32 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "bitpack width too large",
        ));
    }

    let total_bits = count as u64 * bits_needed as u64;
    let bytes_needed = total_bits.div_ceil(8) as usize;
    if *pos + bytes_needed > input.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough bytes for bitpack",
        ));
    }

    let mut current: u64 = 0;
    let mut bits_available = 0u32;
    let mask = (1u64 << bits_needed) - 1;

    out.reserve(count);
    for _ in 0..count {
        while bits_available < bits_needed {
            if *pos < input.len() {
                current |= (input[*pos] as u64) << bits_available;
                *pos += 1;
            }
            bits_available += 8;
        }

        out.push((current & mask) as u32);
        current >>= bits_needed;
        bits_available -= bits_needed;
    }

    Ok(())
}

/// Encoder for one term's postings
///
/// Documents are fed in strictly increasing doc id order; full blocks are
/// flushed as they fill and `finish` writes the skip section plus all
/// blocks, returning a [`TermMeta`] with `posting_offset` left at zero for
/// the caller to fill.
pub struct PostingEncoder {
    flags: OptionFlags,
    doc_ids: Vec<u32>,
    tfs: Vec<u32>,
    pos_data: Vec<u8>,
    blocks: Vec<u8>,
    skips: Vec<(DocId, u32)>,
    prev_block_last: DocId,
    last_doc_id: Option<DocId>,
    doc_freq: u32,
    total_tf: u64,
}

impl PostingEncoder {
    pub fn new(flags: OptionFlags) -> Self {
        Self {
            flags,
            doc_ids: Vec::with_capacity(BLOCK_SIZE),
            tfs: Vec::with_capacity(BLOCK_SIZE),
            pos_data: Vec::new(),
            blocks: Vec::new(),
            skips: Vec::new(),
            prev_block_last: 0,
            last_doc_id: None,
            doc_freq: 0,
            total_tf: 0,
        }
    }

    pub fn flags(&self) -> OptionFlags {
        self.flags
    }

    pub fn doc_freq(&self) -> u32 {
        self.doc_freq
    }

    /// Add one document's posting. Positions must be strictly increasing;
    /// `positions.len()` is the term frequency when positions are stored.
    pub fn add_doc(&mut self, doc_id: DocId, tf: u32, positions: &[u32]) -> Result<()> {
        if let Some(last) = self.last_doc_id {
            if doc_id <= last {
                return Err(MantixError::Corrupt(format!(
                    "doc id {doc_id} out of order after {last}"
                )));
            }
        }
        self.last_doc_id = Some(doc_id);

        let tf = if self.flags.has_position() {
            positions.len() as u32
        } else {
            tf.max(1)
        };

        self.doc_ids.push(doc_id);
        if self.flags.has_tf() {
            self.tfs.push(tf);
            self.total_tf += u64::from(tf);
        }
        if self.flags.has_position() {
            let mut prev = 0u32;
            for (i, &pos) in positions.iter().enumerate() {
                if i == 0 {
                    encode_vbyte(pos, &mut self.pos_data);
                } else {
                    encode_vbyte(pos - prev, &mut self.pos_data);
                }
                prev = pos;
            }
        }

        self.doc_freq += 1;
        if self.doc_ids.len() == BLOCK_SIZE {
            self.flush_block();
        }
        Ok(())
    }

    fn flush_block(&mut self) {
        if self.doc_ids.is_empty() {
            return;
        }

        let block_start = self.blocks.len();
        let last_doc = *self.doc_ids.last().unwrap();

        encode_vbyte(self.doc_ids.len() as u32, &mut self.blocks);

        let mut deltas = Vec::with_capacity(self.doc_ids.len());
        let mut prev = self.prev_block_last;
        for &doc_id in &self.doc_ids {
            deltas.push(doc_id - prev);
            prev = doc_id;
        }
        bitpack_encode(&deltas, &mut self.blocks);

        if self.flags.has_tf() {
            bitpack_encode(&self.tfs, &mut self.blocks);
        }
        if self.flags.has_position() {
            self.blocks.extend_from_slice(&self.pos_data);
        }

        let block_len = (self.blocks.len() - block_start) as u32;
        self.skips.push((last_doc, block_len));
        self.prev_block_last = last_doc;

        self.doc_ids.clear();
        self.tfs.clear();
        self.pos_data.clear();
    }

    /// Flush the final block and write this term's posting data; returns
    /// its [`TermMeta`] with `posting_offset` unset.
    pub fn finish<W: Write>(mut self, writer: &mut W) -> Result<TermMeta> {
        self.flush_block();

        let mut header = Vec::new();
        encode_vbyte(self.skips.len() as u32, &mut header);
        if self.flags.has_block_skip() {
            let mut prev_last = 0u32;
            for &(last_doc, block_len) in &self.skips {
                encode_vbyte(last_doc - prev_last, &mut header);
                encode_vbyte(block_len, &mut header);
                prev_last = last_doc;
            }
        }

        writer.write_all(&header)?;
        writer.write_all(&self.blocks)?;

        Ok(TermMeta {
            doc_freq: self.doc_freq,
            total_tf: self.total_tf,
            posting_offset: 0,
            posting_length: (header.len() + self.blocks.len()) as u32,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct SkipEntry {
    last_doc: DocId,
    offset: u32,
}

/// Decoding cursor over one term's posting data within a single segment
///
/// The caller holds the raw posting bytes and passes them to each call, so
/// the cursor itself stays free of borrows and can be stored alongside the
/// buffer it decodes.
pub struct SegmentPostingCursor {
    flags: OptionFlags,
    doc_freq: u32,
    block_count: usize,
    skips: Vec<SkipEntry>,
    blocks_start: usize,
    pos: usize,
    next_block: usize,
    prev_doc: DocId,
    doc_ids: Vec<u32>,
    tfs: Vec<u32>,
    pos_offsets: Vec<u32>,
    positions: Vec<u32>,
    in_block: usize,
    started: bool,
    pos_cursor: usize,
}

impl SegmentPostingCursor {
    pub fn new(data: &[u8], doc_freq: u32, flags: OptionFlags) -> Result<Self> {
        let mut pos = 0;
        let block_count = decode_vbyte(data, &mut pos)? as usize;

        let mut skips = Vec::new();
        if flags.has_block_skip() {
            skips.reserve(block_count);
            let mut offset = 0u32;
            let mut last_doc = 0u32;
            for _ in 0..block_count {
                last_doc += decode_vbyte(data, &mut pos)?;
                let block_len = decode_vbyte(data, &mut pos)?;
                skips.push(SkipEntry { last_doc, offset });
                offset += block_len;
            }
        }

        Ok(Self {
            flags,
            doc_freq,
            block_count,
            skips,
            blocks_start: pos,
            pos,
            next_block: 0,
            prev_doc: 0,
            doc_ids: Vec::new(),
            tfs: Vec::new(),
            pos_offsets: Vec::new(),
            positions: Vec::new(),
            in_block: 0,
            started: false,
            pos_cursor: 0,
        })
    }

    /// Advance to the next document; `None` once exhausted
    pub fn advance(&mut self, data: &[u8]) -> Result<Option<DocId>> {
        if self.started {
            self.in_block += 1;
        } else {
            self.started = true;
        }

        if self.in_block >= self.doc_ids.len() && !self.load_next_block(data)? {
            return Ok(None);
        }

        self.pos_cursor = 0;
        Ok(Some(self.doc_ids[self.in_block]))
    }

    /// Advance to the first document with id >= `target`
    ///
    /// Targets must be non-decreasing across calls. With a skip section,
    /// whole blocks whose last doc id is below the target are skipped
    /// without decoding.
    pub fn seek(&mut self, data: &[u8], target: DocId) -> Result<Option<DocId>> {
        if self.started && self.in_block < self.doc_ids.len() && self.doc_ids[self.in_block] >= target
        {
            return Ok(Some(self.doc_ids[self.in_block]));
        }

        // Jump over blocks that cannot contain the target
        if !self.skips.is_empty() {
            let current_block_last = if self.next_block > 0 {
                self.skips[self.next_block - 1].last_doc
            } else {
                0
            };
            if self.next_block == 0 || target > current_block_last {
                let mut jump_to = self.next_block;
                while jump_to < self.block_count && self.skips[jump_to].last_doc < target {
                    jump_to += 1;
                }
                if jump_to >= self.block_count {
                    self.next_block = self.block_count;
                    self.doc_ids.clear();
                    self.in_block = 0;
                    self.started = true;
                    return Ok(None);
                }
                if jump_to > self.next_block || self.next_block == 0 {
                    self.pos = self.blocks_start + self.skips[jump_to].offset as usize;
                    self.prev_doc = if jump_to > 0 {
                        self.skips[jump_to - 1].last_doc
                    } else {
                        0
                    };
                    self.next_block = jump_to;
                    self.doc_ids.clear();
                    self.in_block = 0;
                    self.started = false;
                }
            }
        }

        while let Some(doc) = self.advance(data)? {
            if doc >= target {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    /// Current doc id; only valid after `advance`/`seek` returned `Some`
    pub fn doc(&self) -> DocId {
        self.doc_ids[self.in_block]
    }

    /// Term frequency of the current document
    pub fn term_freq(&self) -> u32 {
        if self.flags.has_tf() {
            self.tfs[self.in_block]
        } else {
            1
        }
    }

    /// Positions of the current document (empty unless `HAS_POSITION`)
    pub fn positions(&self) -> &[u32] {
        if !self.flags.has_position() {
            return &[];
        }
        let start = self.pos_offsets[self.in_block] as usize;
        let end = self.pos_offsets[self.in_block + 1] as usize;
        &self.positions[start..end]
    }

    /// Next position of the current document; `None` when exhausted
    pub fn next_position(&mut self) -> Option<u32> {
        let positions = if self.flags.has_position() {
            let start = self.pos_offsets[self.in_block] as usize;
            let end = self.pos_offsets[self.in_block + 1] as usize;
            &self.positions[start..end]
        } else {
            return None;
        };
        let next = positions.get(self.pos_cursor).copied();
        if next.is_some() {
            self.pos_cursor += 1;
        }
        next
    }

    fn load_next_block(&mut self, data: &[u8]) -> Result<bool> {
        if self.next_block >= self.block_count {
            return Ok(false);
        }

        let mut pos = self.pos;
        let count = decode_vbyte(data, &mut pos)? as usize;
        if count == 0 || count > BLOCK_SIZE {
            return Err(MantixError::Corrupt(format!(
                "posting block with invalid doc count {count}"
            )));
        }

        let mut deltas = std::mem::take(&mut self.doc_ids);
        bitpack_decode(data, &mut pos, count, &mut deltas)?;
        let mut doc = self.prev_doc;
        for delta in deltas.iter_mut() {
            doc += *delta;
            *delta = doc;
        }
        self.doc_ids = deltas;
        self.prev_doc = doc;

        if self.flags.has_tf() {
            let mut tfs = std::mem::take(&mut self.tfs);
            bitpack_decode(data, &mut pos, count, &mut tfs)?;
            self.tfs = tfs;
        }

        if self.flags.has_position() {
            self.positions.clear();
            self.pos_offsets.clear();
            self.pos_offsets.push(0);
            for i in 0..count {
                let tf = self.tfs[i] as usize;
                let mut value = 0u32;
                for j in 0..tf {
                    let delta = decode_vbyte(data, &mut pos)?;
                    value = if j == 0 { delta } else { value + delta };
                    self.positions.push(value);
                }
                self.pos_offsets.push(self.positions.len() as u32);
            }
        }

        self.pos = pos;
        self.next_block += 1;
        self.in_block = 0;
        Ok(true)
    }

    /// Total number of documents in this posting
    pub fn doc_freq(&self) -> u32 {
        self.doc_freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_docs(flags: OptionFlags, docs: &[(u32, Vec<u32>)]) -> (Vec<u8>, TermMeta) {
        let mut encoder = PostingEncoder::new(flags);
        for (doc_id, positions) in docs {
            encoder
                .add_doc(*doc_id, positions.len() as u32, positions)
                .unwrap();
        }
        let mut out = Vec::new();
        let meta = encoder.finish(&mut out).unwrap();
        assert_eq!(meta.posting_length as usize, out.len());
        (out, meta)
    }

    #[test]
    fn test_vbyte_roundtrip() {
        let mut output = Vec::new();
        for v in [0, 1, 127, 128, 16383, 16384, 1_000_000, u32::MAX] {
            encode_vbyte(v, &mut output);
        }

        let mut pos = 0;
        for v in [0, 1, 127, 128, 16383, 16384, 1_000_000, u32::MAX] {
            assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), v);
        }
        assert_eq!(pos, output.len());
    }

    #[test]
    fn test_bitpack_roundtrip() {
        for values in [
            vec![0, 1, 2, 3, 4, 5, 6, 7],
            vec![1000, 2000, 3000, 4000],
            vec![0, 0, 0],
            vec![u32::MAX, 0, 1],
        ] {
            let mut output = Vec::new();
            bitpack_encode(&values, &mut output);

            let mut pos = 0;
            let mut decoded = Vec::new();
            bitpack_decode(&output, &mut pos, values.len(), &mut decoded).unwrap();
            assert_eq!(decoded, values);
            assert_eq!(pos, output.len());
        }
    }

    #[test]
    fn test_encode_decode_with_positions() {
        let flags = OptionFlags::full();
        let docs: Vec<(u32, Vec<u32>)> = vec![
            (0, vec![0, 3, 7]),
            (5, vec![2]),
            (9, vec![1, 2]),
        ];
        let (data, meta) = encode_docs(flags, &docs);
        assert_eq!(meta.doc_freq, 3);
        assert_eq!(meta.total_tf, 6);

        let mut cursor = SegmentPostingCursor::new(&data, meta.doc_freq, flags).unwrap();
        for (doc_id, positions) in &docs {
            assert_eq!(cursor.advance(&data).unwrap(), Some(*doc_id));
            assert_eq!(cursor.term_freq(), positions.len() as u32);
            assert_eq!(cursor.positions(), positions.as_slice());
            for &p in positions {
                assert_eq!(cursor.next_position(), Some(p));
            }
            assert_eq!(cursor.next_position(), None);
        }
        assert_eq!(cursor.advance(&data).unwrap(), None);
    }

    #[test]
    fn test_encode_decode_doc_only() {
        let flags = OptionFlags::doc_only();
        let docs: Vec<(u32, Vec<u32>)> = (0..10).map(|i| (i * 7, vec![])).collect();
        let (data, meta) = encode_docs(flags, &docs);

        let mut cursor = SegmentPostingCursor::new(&data, meta.doc_freq, flags).unwrap();
        for (doc_id, _) in &docs {
            assert_eq!(cursor.advance(&data).unwrap(), Some(*doc_id));
            assert_eq!(cursor.term_freq(), 1);
            assert!(cursor.positions().is_empty());
        }
        assert_eq!(cursor.advance(&data).unwrap(), None);
    }

    #[test]
    fn test_multi_block_seek() {
        let flags = OptionFlags::full();
        let docs: Vec<(u32, Vec<u32>)> = (0..500).map(|i| (i * 2, vec![i])).collect();
        let (data, meta) = encode_docs(flags, &docs);

        let mut cursor = SegmentPostingCursor::new(&data, meta.doc_freq, flags).unwrap();
        assert_eq!(cursor.seek(&data, 400).unwrap(), Some(400));
        assert_eq!(cursor.term_freq(), 1);
        assert_eq!(cursor.positions(), &[200]);

        // Seek within the same block
        assert_eq!(cursor.seek(&data, 401).unwrap(), Some(402));
        // Seek across several blocks
        assert_eq!(cursor.seek(&data, 900).unwrap(), Some(900));
        // Past the end
        assert_eq!(cursor.seek(&data, 10_000).unwrap(), None);
    }

    #[test]
    fn test_seek_without_skip_section() {
        let flags = OptionFlags::from_bits(OptionFlags::HAS_TF | OptionFlags::HAS_POSITION);
        assert!(!flags.has_block_skip());
        let docs: Vec<(u32, Vec<u32>)> = (0..300).map(|i| (i * 3, vec![0])).collect();
        let (data, meta) = encode_docs(flags, &docs);

        let mut cursor = SegmentPostingCursor::new(&data, meta.doc_freq, flags).unwrap();
        assert_eq!(cursor.seek(&data, 601).unwrap(), Some(603));
        assert_eq!(cursor.seek(&data, 897).unwrap(), Some(897));
        assert_eq!(cursor.seek(&data, 898).unwrap(), None);
    }

    #[test]
    fn test_out_of_order_doc_rejected() {
        let mut encoder = PostingEncoder::new(OptionFlags::full());
        encoder.add_doc(5, 1, &[0]).unwrap();
        assert!(encoder.add_doc(5, 1, &[0]).is_err());
        assert!(encoder.add_doc(3, 1, &[0]).is_err());
    }

    #[test]
    fn test_truncated_block_detected() {
        let flags = OptionFlags::full();
        let docs: Vec<(u32, Vec<u32>)> = (0..200).map(|i| (i, vec![i])).collect();
        let (data, meta) = encode_docs(flags, &docs);

        let truncated = &data[..data.len() / 2];
        let mut cursor = SegmentPostingCursor::new(truncated, meta.doc_freq, flags).unwrap();
        let mut result = Ok(Some(0));
        while let Ok(Some(_)) = result {
            result = cursor.advance(truncated);
        }
        assert!(result.is_err());
    }
}
