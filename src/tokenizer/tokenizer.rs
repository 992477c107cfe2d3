use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use stop_words::{get, LANGUAGE};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::TokenizerConfig;

/// A single token produced by the analyzer
///
/// `word_offset` is the positional index of the token within the analyzed
/// text, 0-based, counted over the tokens that survive filtering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub word_offset: u32,
}

/// Text tokenizer with stemming and stopword removal
pub struct Tokenizer {
    config: TokenizerConfig,
    stemmer: Option<Stemmer>,
    stopwords: HashSet<String>,
}

impl Tokenizer {
    /// Create a new tokenizer from configuration
    pub fn new(config: &TokenizerConfig) -> Self {
        let stemmer = if config.stem {
            Some(Stemmer::create(Algorithm::English))
        } else {
            None
        };

        let stopwords = if config.remove_stopwords {
            get(LANGUAGE::English)
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect()
        } else {
            HashSet::new()
        };

        Self {
            config: config.clone(),
            stemmer,
            stopwords,
        }
    }

    /// Analyze text into positioned tokens
    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut word_offset = 0u32;

        for word in text.unicode_words() {
            let mut token = word.to_string();

            if self.config.lowercase {
                token = token.to_lowercase();
            }

            if token.len() < self.config.min_token_length
                || token.len() > self.config.max_token_length
                || self.stopwords.contains(&token)
            {
                continue;
            }

            if let Some(stemmer) = &self.stemmer {
                token = stemmer.stem(&token).to_string();
            }

            tokens.push(Token {
                text: token,
                word_offset,
            });
            word_offset += 1;
        }

        tokens
    }

    /// Tokenize text into a plain vector of terms
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.analyze(text).into_iter().map(|t| t.text).collect()
    }

    /// Get unique terms from text
    pub fn unique_terms(&self, text: &str) -> HashSet<String> {
        self.tokenize(text).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokenization() {
        let config = TokenizerConfig::default();
        let tokenizer = Tokenizer::new(&config);
        let tokens = tokenizer.analyze("Hello World! This is a test.");

        assert_eq!(tokens[0].text, "hello");
        assert_eq!(tokens[0].word_offset, 0);
        assert_eq!(tokens[1].text, "world");
        assert_eq!(tokens[1].word_offset, 1);
        assert_eq!(tokens.last().unwrap().text, "test");
        assert_eq!(tokens.last().unwrap().word_offset, 5);
    }

    #[test]
    fn test_stopword_removal_compacts_offsets() {
        let config = TokenizerConfig {
            remove_stopwords: true,
            min_token_length: 2,
            ..TokenizerConfig::default()
        };

        let tokenizer = Tokenizer::new(&config);
        let tokens = tokenizer.analyze("the quick brown fox");

        // "the" is a stopword; surviving tokens are re-numbered from 0
        assert!(tokens.iter().all(|t| t.text != "the"));
        assert_eq!(tokens[0].word_offset, 0);
    }

    #[test]
    fn test_stemming() {
        let config = TokenizerConfig {
            stem: true,
            ..TokenizerConfig::default()
        };

        let tokenizer = Tokenizer::new(&config);
        let tokens = tokenizer.tokenize("running runs runner");
        assert!(tokens.iter().all(|t| t.starts_with("run")));
    }

    #[test]
    fn test_min_max_token_length() {
        let config = TokenizerConfig {
            min_token_length: 3,
            max_token_length: 5,
            ..TokenizerConfig::default()
        };

        let tokenizer = Tokenizer::new(&config);
        let tokens = tokenizer.tokenize("a ab abc abcd abcde abcdef");

        assert_eq!(tokens, vec!["abc", "abcd", "abcde"]);
    }

    #[test]
    fn test_repeated_terms_keep_distinct_offsets() {
        let tokenizer = Tokenizer::new(&TokenizerConfig::default());
        let tokens = tokenizer.analyze("a a b");

        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0], Token { text: "a".to_string(), word_offset: 0 });
        assert_eq!(tokens[1], Token { text: "a".to_string(), word_offset: 1 });
        assert_eq!(tokens[2], Token { text: "b".to_string(), word_offset: 2 });
    }
}
