use serde::{Deserialize, Serialize};

/// Tokenizer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenizerConfig {
    pub lowercase: bool,
    pub remove_stopwords: bool,
    pub stem: bool,
    pub min_token_length: usize,
    pub max_token_length: usize,
    pub language: String,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            remove_stopwords: false,
            stem: false,
            min_token_length: 1,
            max_token_length: 100,
            language: "english".to_string(),
        }
    }
}

/// Indexer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Spill to disk once an inverter batch exceeds this many bytes
    pub spill_threshold_bytes: usize,
    /// Write buffer size for segment file writers
    pub write_buffer_bytes: usize,
    /// Initial chunk size handed out by the memory pool
    pub pool_chunk_bytes: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            // 256MB
            spill_threshold_bytes: 256 * 1024 * 1024,
            // 1MB buffered writers, matches typical segment block sizes
            write_buffer_bytes: 1024 * 1024,
            // 64KB
            pool_chunk_bytes: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = IndexerConfig::default();
        assert!(cfg.spill_threshold_bytes > cfg.write_buffer_bytes);
        assert!(cfg.pool_chunk_bytes > 0);

        let tok = TokenizerConfig::default();
        assert!(tok.lowercase);
        assert_eq!(tok.min_token_length, 1);
    }
}
