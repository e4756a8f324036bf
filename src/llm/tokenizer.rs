//! Token counting for usage accounting and embedding cost tracking.

use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Counts tokens with a tiktoken BPE when available, falling back to
/// whitespace splitting when the encoding cannot be loaded.
pub struct Tokenizer {
    bpe: Option<CoreBPE>,
}

impl Tokenizer {
    /// cl100k_base, the encoding shared by the GPT-4 family.
    pub fn cl100k() -> Self {
        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Self { bpe: Some(bpe) },
            Err(e) => {
                warn!("Failed to load cl100k_base, falling back to whitespace counting: {}", e);
                Self { bpe: None }
            }
        }
    }

    /// Number of tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.split_whitespace().count(),
        }
    }

    /// Total token count across a set of texts.
    pub fn count_all<'a>(&self, texts: impl IntoIterator<Item = &'a str>) -> usize {
        texts.into_iter().map(|t| self.count(t)).sum()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::cl100k()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_empty() {
        let tokenizer = Tokenizer::default();
        assert_eq!(tokenizer.count(""), 0);
    }

    #[test]
    fn test_count_is_consistent() {
        let tokenizer = Tokenizer::default();
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(tokenizer.count(text), tokenizer.count(text));
        assert!(tokenizer.count(text) > 0);
    }

    #[test]
    fn test_count_all_sums_parts() {
        let tokenizer = Tokenizer::default();
        let a = "Hello, world!";
        let b = "Goodbye.";
        assert_eq!(
            tokenizer.count_all([a, b]),
            tokenizer.count(a) + tokenizer.count(b)
        );
    }

    #[test]
    fn test_whitespace_fallback() {
        let tokenizer = Tokenizer { bpe: None };
        assert_eq!(tokenizer.count("three plain words"), 3);
        assert_eq!(tokenizer.count(""), 0);
    }
}
