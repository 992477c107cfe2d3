use thiserror::Error;

use crate::segment::OptionFlags;

/// Main error type for Mantix operations
#[derive(Error, Debug)]
pub enum MantixError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FST error: {0}")]
    Fst(#[from] fst::Error),

    #[error("Option flag mismatch: expected {expected:?}, got {actual:?}")]
    FlagMismatch {
        expected: OptionFlags,
        actual: OptionFlags,
    },

    #[error("Doc id ranges overlap: segment '{base_name}' starts at {base_doc_id} but a previous segment reaches {previous_end}")]
    DocIdOverlap {
        base_name: String,
        base_doc_id: u32,
        previous_end: u32,
    },

    #[error("Corrupt index data: {0}")]
    Corrupt(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for Mantix operations
pub type Result<T> = std::result::Result<T, MantixError>;

impl MantixError {
    /// Check if this error indicates unreadable on-disk state,
    /// meaning the segment files should be discarded and rebuilt
    pub fn is_corruption(&self) -> bool {
        matches!(self, MantixError::Corrupt(_) | MantixError::Fst(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MantixError::Corrupt("dict entry past posting file".to_string());
        assert_eq!(
            err.to_string(),
            "Corrupt index data: dict entry past posting file"
        );
    }

    #[test]
    fn test_corruption_classification() {
        assert!(MantixError::Corrupt("x".to_string()).is_corruption());
        assert!(!MantixError::InvalidRequest("x".to_string()).is_corruption());
    }
}
