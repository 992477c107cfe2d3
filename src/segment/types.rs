//! Core types for the segment-based index

use std::fmt;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

/// Document identifier, global across segments
pub type DocId = u32;

/// Sentinel doc id, never assigned to a document
pub const INVALID_DOC_ID: DocId = u32::MAX;

/// Number of documents per posting block
pub const BLOCK_SIZE: usize = 128;

/// File suffixes of the segment triple
pub const DICT_SUFFIX: &str = ".dict";
pub const POSTING_SUFFIX: &str = ".pos";
pub const FST_SUFFIX: &str = ".dict.fst";

/// Full file names of the segment triple for a base name:
/// `(dict, postings, fst)`
pub fn segment_file_names(base_name: &str) -> (String, String, String) {
    (
        format!("{base_name}{DICT_SUFFIX}"),
        format!("{base_name}{POSTING_SUFFIX}"),
        format!("{base_name}{FST_SUFFIX}"),
    )
}

/// Posting format option flags
///
/// Controls which streams a posting block carries. Segments participating
/// in a merge must agree on flags exactly.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionFlags(u32);

impl OptionFlags {
    /// Per-document term frequencies are stored
    pub const HAS_TF: u32 = 1;
    /// Per-document position lists are stored (implies `HAS_TF`)
    pub const HAS_POSITION: u32 = 1 << 1;
    /// A per-block skip section is stored ahead of the blocks
    pub const HAS_BLOCK_SKIP: u32 = 1 << 2;

    /// Doc ids only
    pub fn doc_only() -> Self {
        Self(0)
    }

    /// Doc ids, term frequencies, positions and block skips
    pub fn full() -> Self {
        Self(Self::HAS_TF | Self::HAS_POSITION | Self::HAS_BLOCK_SKIP)
    }

    pub fn from_bits(bits: u32) -> Self {
        let mut bits = bits;
        // Positions are meaningless without frequencies
        if bits & Self::HAS_POSITION != 0 {
            bits |= Self::HAS_TF;
        }
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn has_tf(self) -> bool {
        self.0 & Self::HAS_TF != 0
    }

    pub fn has_position(self) -> bool {
        self.0 & Self::HAS_POSITION != 0
    }

    pub fn has_block_skip(self) -> bool {
        self.0 & Self::HAS_BLOCK_SKIP != 0
    }
}

impl fmt::Debug for OptionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.has_tf() {
            parts.push("tf");
        }
        if self.has_position() {
            parts.push("position");
        }
        if self.has_block_skip() {
            parts.push("block_skip");
        }
        if parts.is_empty() {
            parts.push("doc_only");
        }
        write!(f, "OptionFlags({})", parts.join("|"))
    }
}

/// Metadata for one term in a segment, stored as a `.dict` record
///
/// `total_tf` is only present on disk when the option flags carry term
/// frequencies. Layout is native-endian; index files are regenerable and
/// not expected to move across architectures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TermMeta {
    /// Number of documents containing the term
    pub doc_freq: u32,
    /// Total term frequency across all documents
    pub total_tf: u64,
    /// Offset of the term's posting block in the `.pos` file
    pub posting_offset: u64,
    /// Length in bytes of the term's posting block
    pub posting_length: u32,
}

impl TermMeta {
    /// Size of one dumped record under the given flags
    pub fn dumped_len(flags: OptionFlags) -> usize {
        if flags.has_tf() {
            4 + 8 + 8 + 4
        } else {
            4 + 8 + 4
        }
    }

    /// Write the record; returns the number of bytes written
    pub fn dump<W: Write>(&self, writer: &mut W, flags: OptionFlags) -> io::Result<usize> {
        writer.write_all(&self.doc_freq.to_ne_bytes())?;
        if flags.has_tf() {
            writer.write_all(&self.total_tf.to_ne_bytes())?;
        }
        writer.write_all(&self.posting_offset.to_ne_bytes())?;
        writer.write_all(&self.posting_length.to_ne_bytes())?;
        Ok(Self::dumped_len(flags))
    }

    /// Read one record from `data` starting at `*pos`, advancing `*pos`
    pub fn load(data: &[u8], pos: &mut usize, flags: OptionFlags) -> io::Result<TermMeta> {
        let len = Self::dumped_len(flags);
        if *pos + len > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "term meta record truncated",
            ));
        }

        let mut at = *pos;
        let doc_freq = u32::from_ne_bytes(data[at..at + 4].try_into().unwrap());
        at += 4;
        let total_tf = if flags.has_tf() {
            let v = u64::from_ne_bytes(data[at..at + 8].try_into().unwrap());
            at += 8;
            v
        } else {
            0
        };
        let posting_offset = u64::from_ne_bytes(data[at..at + 8].try_into().unwrap());
        at += 8;
        let posting_length = u32::from_ne_bytes(data[at..at + 4].try_into().unwrap());
        at += 4;

        *pos = at;
        Ok(TermMeta {
            doc_freq,
            total_tf,
            posting_offset,
            posting_length,
        })
    }
}

/// One term occurrence during inversion
///
/// `term_num` holds a term ref (arena offset / 4) until the term sort
/// assigns dense term numbers, after which it holds the term number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PosRecord {
    pub term_num: u32,
    pub doc_id: DocId,
    pub term_pos: u32,
}

impl PosRecord {
    pub fn new(term_num: u32, doc_id: DocId, term_pos: u32) -> Self {
        Self {
            term_num,
            doc_id,
            term_pos,
        }
    }

    /// Packed sort key: term number in the high half, doc id in the low
    pub fn sort_key(&self) -> u64 {
        (u64::from(self.term_num) << 32) | u64::from(self.doc_id)
    }
}

impl Ord for PosRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.term_num, self.doc_id, self.term_pos).cmp(&(
            other.term_num,
            other.doc_id,
            other.term_pos,
        ))
    }
}

impl PartialOrd for PosRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_flags() {
        let flags = OptionFlags::full();
        assert!(flags.has_tf());
        assert!(flags.has_position());
        assert!(flags.has_block_skip());

        let flags = OptionFlags::doc_only();
        assert!(!flags.has_tf());
        assert_eq!(format!("{flags:?}"), "OptionFlags(doc_only)");

        // Positions imply frequencies
        let flags = OptionFlags::from_bits(OptionFlags::HAS_POSITION);
        assert!(flags.has_tf());
    }

    #[test]
    fn test_term_meta_roundtrip() {
        let meta = TermMeta {
            doc_freq: 100,
            total_tf: 250,
            posting_offset: 4096,
            posting_length: 512,
        };

        for flags in [OptionFlags::full(), OptionFlags::doc_only()] {
            let mut buf = Vec::new();
            let written = meta.dump(&mut buf, flags).unwrap();
            assert_eq!(written, buf.len());
            assert_eq!(written, TermMeta::dumped_len(flags));

            let mut pos = 0;
            let loaded = TermMeta::load(&buf, &mut pos, flags).unwrap();
            assert_eq!(pos, written);
            assert_eq!(loaded.doc_freq, 100);
            assert_eq!(loaded.posting_offset, 4096);
            assert_eq!(loaded.posting_length, 512);
            if flags.has_tf() {
                assert_eq!(loaded.total_tf, 250);
            } else {
                assert_eq!(loaded.total_tf, 0);
            }
        }
    }

    #[test]
    fn test_term_meta_truncated() {
        let meta = TermMeta::default();
        let mut buf = Vec::new();
        meta.dump(&mut buf, OptionFlags::full()).unwrap();
        buf.truncate(buf.len() - 1);

        let mut pos = 0;
        assert!(TermMeta::load(&buf, &mut pos, OptionFlags::full()).is_err());
    }

    #[test]
    fn test_pos_record_ordering() {
        let a = PosRecord::new(1, 5, 0);
        let b = PosRecord::new(1, 5, 3);
        let c = PosRecord::new(2, 0, 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.sort_key(), (1u64 << 32) | 5);
    }

    #[test]
    fn test_segment_file_names() {
        let (dict, pos, fst) = segment_file_names("seg_3");
        assert_eq!(dict, "seg_3.dict");
        assert_eq!(pos, "seg_3.pos");
        assert_eq!(fst, "seg_3.dict.fst");
    }
}
