pub mod config;
pub mod error;
pub mod memory;
pub mod segment;
pub mod tokenizer;

pub use config::{IndexerConfig, TokenizerConfig};
pub use error::{MantixError, Result};
pub use memory::{MemoryPool, RecyclePool};
pub use segment::{
    ColumnIndexMerger, ColumnIndexReader, ColumnInverter, MemoryIndexer, OptionFlags,
};
pub use tokenizer::Tokenizer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
