use unicode_segmentation::UnicodeSegmentation;

use crate::core::types::{Offset, MAX_TOKEN_LENGTH};

/// One token as handed to the index: the term bytes, its address, the byte
/// position in the source text, and whether the token may serve as a
/// landmark in the address-to-byte side table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub term: String,
    pub posting: Offset,
    pub byte_offset: usize,
    pub can_be_landmark: bool,
}

/// Minimal XML-ish tokenizer: angle-bracketed tags ("<doc>", "</doc>",
/// "<docno>", ...) come through verbatim, everything between them is split
/// into lowercased words. Postings are assigned consecutively starting at
/// `first_posting`. Production front-ends supply richer filters through
/// the same record shape.
pub struct Tokenizer;

impl Tokenizer {
    pub fn tokenize(text: &str, first_posting: Offset) -> Vec<TokenRecord> {
        let mut tokens = Vec::new();
        let mut posting = first_posting;
        let mut position = 0;
        let bytes = text.as_bytes();

        while position < bytes.len() {
            if bytes[position] == b'<' {
                if let Some(close) = text[position..].find('>') {
                    let tag = &text[position..position + close + 1];
                    if tag.len() <= MAX_TOKEN_LENGTH + 2 {
                        tokens.push(TokenRecord {
                            term: tag.to_ascii_lowercase(),
                            posting,
                            byte_offset: position,
                            can_be_landmark: true,
                        });
                        posting += 1;
                    }
                    position += close + 1;
                    continue;
                }
            }
            let stretch_end = text[position..]
                .find('<')
                .map(|i| position + i)
                .unwrap_or(bytes.len());
            for (offset, word) in text[position..stretch_end].unicode_word_indices() {
                if word.len() > MAX_TOKEN_LENGTH {
                    continue;
                }
                tokens.push(TokenRecord {
                    term: word.to_lowercase(),
                    posting,
                    byte_offset: position + offset,
                    can_be_landmark: false,
                });
                posting += 1;
            }
            position = stretch_end;
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_and_postings() {
        let tokens = Tokenizer::tokenize("The cat sat on the mat", 1);
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["the", "cat", "sat", "on", "the", "mat"]);
        let postings: Vec<u64> = tokens.iter().map(|t| t.posting).collect();
        assert_eq!(postings, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_tags_pass_through() {
        let tokens = Tokenizer::tokenize("<doc>a b</doc>", 10);
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["<doc>", "a", "b", "</doc>"]);
        assert!(tokens[0].can_be_landmark);
        assert!(!tokens[1].can_be_landmark);
    }

    #[test]
    fn test_oversize_token_skipped() {
        let text = "short aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa tail";
        let terms: Vec<String> = Tokenizer::tokenize(text, 1)
            .into_iter()
            .map(|t| t.term)
            .collect();
        assert_eq!(terms, vec!["short", "tail"]);
    }
}
