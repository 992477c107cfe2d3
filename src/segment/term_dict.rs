//! Term dictionary: FST term index over `.dict` metadata records
//!
//! The `.dict` file opens with a 4-byte option-flags word, followed by a
//! packed sequence of [`TermMeta`] records in term-sorted order; term
//! bytes live only in the companion `.dict.fst`, an FST mapping each term
//! to the byte offset of its record. The FST gives O(|term|) point
//! lookups and ordered streaming for merges. The flags word is what lets
//! merges reject segments written under a different posting format.

use std::io::Write;
use std::path::Path;

use fst::{IntoStreamer, Map, MapBuilder, Streamer};

use crate::error::{MantixError, Result};

use super::types::{OptionFlags, TermMeta};

/// Streaming writer for a segment's term dictionary
///
/// Terms must be inserted in strictly ascending byte order; the FST
/// builder rejects anything else.
pub struct TermDictionaryWriter<W: Write, F: Write> {
    dict: W,
    fst_builder: MapBuilder<F>,
    flags: OptionFlags,
    dict_offset: u64,
}

impl<W: Write, F: Write> TermDictionaryWriter<W, F> {
    pub fn new(mut dict: W, fst_writer: F, flags: OptionFlags) -> Result<Self> {
        dict.write_all(&flags.bits().to_ne_bytes())?;
        Ok(Self {
            dict,
            fst_builder: MapBuilder::new(fst_writer)?,
            flags,
            dict_offset: 4,
        })
    }

    /// Append one term's metadata record and index it in the FST
    pub fn insert(&mut self, term: &[u8], meta: &TermMeta) -> Result<()> {
        self.fst_builder.insert(term, self.dict_offset)?;
        let written = meta.dump(&mut self.dict, self.flags)?;
        self.dict_offset += written as u64;
        Ok(())
    }

    /// Finish both files; returns the total `.dict` bytes written
    pub fn finish(mut self) -> Result<u64> {
        self.dict.flush()?;
        let mut fst_writer = self.fst_builder.into_inner()?;
        fst_writer.flush()?;
        Ok(self.dict_offset)
    }
}

/// Read-side term dictionary for one segment
#[derive(Debug)]
pub struct TermDictionary {
    fst: Map<Vec<u8>>,
    dict: Vec<u8>,
    flags: OptionFlags,
}

impl TermDictionary {
    /// Build from raw file contents, rejecting a flags header that does
    /// not match what the caller expects
    pub fn new(fst_data: Vec<u8>, dict: Vec<u8>, flags: OptionFlags) -> Result<Self> {
        if dict.len() < 4 {
            return Err(MantixError::Corrupt(
                "dictionary too short for flags header".to_string(),
            ));
        }
        let stored = OptionFlags::from_bits(u32::from_ne_bytes(dict[0..4].try_into().unwrap()));
        if stored != flags {
            return Err(MantixError::FlagMismatch {
                expected: flags,
                actual: stored,
            });
        }

        let fst = Map::new(fst_data)?;
        Ok(Self { fst, dict, flags })
    }

    /// Open from the `.dict` / `.dict.fst` pair on disk
    pub fn open(dict_path: &Path, fst_path: &Path, flags: OptionFlags) -> Result<Self> {
        let dict = std::fs::read(dict_path)?;
        let fst_data = std::fs::read(fst_path)?;
        Self::new(fst_data, dict, flags)
    }

    /// Look up a term's metadata
    pub fn get(&self, term: &[u8]) -> Result<Option<TermMeta>> {
        match self.fst.get(term) {
            Some(offset) => Ok(Some(self.load_at(offset)?)),
            None => Ok(None),
        }
    }

    /// The `.dict` offset a term's record lives at, if present
    pub fn get_offset(&self, term: &[u8]) -> Option<u64> {
        self.fst.get(term)
    }

    /// Load the record at a known `.dict` offset
    pub fn load_at(&self, offset: u64) -> Result<TermMeta> {
        let mut pos = offset as usize;
        if pos > self.dict.len() {
            return Err(MantixError::Corrupt(format!(
                "dict offset {offset} past end of dictionary ({} bytes)",
                self.dict.len()
            )));
        }
        Ok(TermMeta::load(&self.dict, &mut pos, self.flags)?)
    }

    /// Number of terms in the dictionary
    pub fn len(&self) -> usize {
        self.fst.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fst.is_empty()
    }

    /// First term strictly greater than `prev` (or the smallest term when
    /// `prev` is `None`), with its metadata
    ///
    /// This resumes the FST stream by range query on each call, so a
    /// sequential scan never materializes the whole dictionary.
    pub fn next_term_after(&self, prev: Option<&[u8]>) -> Result<Option<(Vec<u8>, TermMeta)>> {
        let mut stream = match prev {
            Some(bound) => self.fst.range().gt(bound).into_stream(),
            None => self.fst.range().into_stream(),
        };
        match stream.next() {
            Some((term, offset)) => {
                let meta = self.load_at(offset)?;
                Ok(Some((term.to_vec(), meta)))
            }
            None => Ok(None),
        }
    }

    /// Collect all `(term, meta)` pairs in sorted order
    pub fn iter_terms(&self) -> Result<Vec<(Vec<u8>, TermMeta)>> {
        let mut out = Vec::with_capacity(self.fst.len());
        let mut stream = self.fst.stream();
        while let Some((term, offset)) = stream.next() {
            out.push((term.to_vec(), self.load_at(offset)?));
        }
        Ok(out)
    }
}
