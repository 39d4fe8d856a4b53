use crate::analysis::tokenizer::Tokenizer;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Offset, DOC_LEVEL_PREFIX, MAX_OFFSET};
use crate::gcl::list::ExtentList;
use crate::gcl::operators::{
    AndList, BigramList, ContainmentList, FromToList, OneElementList, OrList, RangeList,
    SequenceList,
};
use crate::gcl::simplifier::simplify;

/// Where the parser gets its leaf lists from. Implemented by the index
/// facade; unknown terms yield the empty list, never an error.
pub trait PostingSource {
    fn get_postings(&self, term: &str) -> Result<ExtentList>;
    fn bigram_enabled(&self) -> bool {
        false
    }
    /// Largest address in use, bounding synthetic range lists.
    fn biggest_offset(&self) -> Offset;
}

/// Recursive-descent parser for the GCL query language:
///
///   "term"            posting list
///   "a b c"           phrase (adjacency sequence)
///   A + B, A or B     union
///   A ^ B, A and B    combination
///   A .. B            from-to span
///   A > B, A /> B     (not) containing
///   A < B, A /< B     (not) contained in
///   [n]               every n-token window
///   42                a bare index address
///   ( ... )           grouping
///
/// Malformed input is a syntax error; it never aborts query processing.
pub struct GclParser<'a> {
    source: &'a dyn PostingSource,
}

impl<'a> GclParser<'a> {
    pub fn new(source: &'a dyn PostingSource) -> Self {
        GclParser { source }
    }

    pub fn parse(&self, query: &str) -> Result<ExtentList> {
        let query = query.trim();
        if query.is_empty() {
            return Err(syntax_error("empty query"));
        }
        let (list, rest) = self.parse_expression(query)?;
        if !rest.trim().is_empty() {
            return Err(syntax_error(&format!("trailing input {:?}", rest)));
        }
        Ok(simplify(list))
    }

    fn parse_expression<'q>(&self, input: &'q str) -> Result<(ExtentList, &'q str)> {
        let (first, rest) = self.parse_primary(input)?;
        let rest = rest.trim_start();
        if rest.is_empty() || rest.starts_with(')') {
            return Ok((first, rest));
        }

        // Binary operators are right-associative, matching the original
        // one-pass grammar.
        let (operator, rest) = take_operator(rest)?;
        let (second, rest) = self.parse_expression(rest)?;
        let combined = match operator {
            Operator::Or => ExtentList::Or(OrList {
                children: vec![first, second],
            }),
            Operator::And => ExtentList::And(AndList {
                children: vec![first, second],
            }),
            Operator::FromTo => ExtentList::FromTo(FromToList {
                from: Box::new(first),
                to: Box::new(second),
            }),
            Operator::Contains => ExtentList::Containment(ContainmentList {
                container: Box::new(first),
                containee: Box::new(second),
                return_container: true,
                inverted: false,
            }),
            Operator::ContainedIn => ExtentList::Containment(ContainmentList {
                container: Box::new(second),
                containee: Box::new(first),
                return_container: false,
                inverted: false,
            }),
            Operator::NotContains => ExtentList::Containment(ContainmentList {
                container: Box::new(first),
                containee: Box::new(second),
                return_container: true,
                inverted: true,
            }),
            Operator::NotContainedIn => ExtentList::Containment(ContainmentList {
                container: Box::new(second),
                containee: Box::new(first),
                return_container: false,
                inverted: true,
            }),
        };
        Ok((combined, rest))
    }

    fn parse_primary<'q>(&self, input: &'q str) -> Result<(ExtentList, &'q str)> {
        let input = input.trim_start();
        let mut chars = input.chars();
        match chars.next() {
            Some('(') => {
                let close = matching_paren(input)?;
                let (list, inner_rest) = self.parse_expression(&input[1..close])?;
                if !inner_rest.trim().is_empty() {
                    return Err(syntax_error("garbage before closing bracket"));
                }
                Ok((list, &input[close + 1..]))
            }
            Some('[') => {
                let close = input
                    .find(']')
                    .ok_or_else(|| syntax_error("unterminated range bracket"))?;
                let width: u64 = input[1..close]
                    .trim()
                    .parse()
                    .map_err(|_| syntax_error("range width must be a number"))?;
                if width == 0 {
                    return Err(syntax_error("range width must be positive"));
                }
                Ok((
                    ExtentList::Range(RangeList::new(width, self.source.biggest_offset())),
                    &input[close + 1..],
                ))
            }
            Some('"') => {
                let close = input[1..]
                    .find('"')
                    .map(|i| i + 1)
                    .ok_or_else(|| syntax_error("unterminated quote"))?;
                let list = self.term_sequence(&input[1..close])?;
                Ok((list, &input[close + 1..]))
            }
            Some(c) if c.is_ascii_digit() => {
                let end = input
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(input.len());
                let value: u64 = input[..end]
                    .parse()
                    .map_err(|_| syntax_error("address out of range"))?;
                if value > MAX_OFFSET {
                    return Err(syntax_error("address out of range"));
                }
                Ok((
                    ExtentList::OneElement(OneElementList::new(value, value)),
                    &input[end..],
                ))
            }
            _ => Err(syntax_error(&format!("unexpected input {:?}", input))),
        }
    }

    /// Quoted content: a single term, a tag, a stemmed-form or
    /// document-level reference, or a phrase.
    fn term_sequence(&self, content: &str) -> Result<ExtentList> {
        let content = content.trim();
        if content.is_empty() {
            return Err(syntax_error("empty quotes"));
        }
        // Document-level and stemmed-form references bypass tokenization.
        if content.starts_with(DOC_LEVEL_PREFIX) || content.starts_with('$') {
            return self.source.get_postings(&content.to_ascii_lowercase());
        }
        let terms: Vec<String> = Tokenizer::tokenize(content, 1)
            .into_iter()
            .map(|t| t.term)
            .collect();
        match terms.len() {
            0 => Err(syntax_error("quotes contain no indexable token")),
            1 => self.source.get_postings(&terms[0]),
            _ => {
                let children = if self.source.bigram_enabled() {
                    self.phrase_with_bigrams(&terms)?
                } else {
                    terms
                        .iter()
                        .map(|t| self.source.get_postings(t))
                        .collect::<Result<Vec<_>>>()?
                };
                Ok(ExtentList::Sequence(SequenceList { children }))
            }
        }
    }

    /// Pairs up adjacent phrase tokens into bigram lists, falling back to
    /// a single-term leaf for an odd trailing token.
    fn phrase_with_bigrams(&self, terms: &[String]) -> Result<Vec<ExtentList>> {
        let mut children = Vec::with_capacity(terms.len() / 2 + 1);
        let mut index = 0;
        while index < terms.len() {
            if index + 1 < terms.len() {
                let fused = format!("{}_{}", terms[index], terms[index + 1]);
                children.push(ExtentList::Bigram(BigramList {
                    inner: Box::new(self.source.get_postings(&fused)?),
                }));
                index += 2;
            } else {
                children.push(self.source.get_postings(&terms[index])?);
                index += 1;
            }
        }
        Ok(children)
    }
}

enum Operator {
    Or,
    And,
    FromTo,
    Contains,
    ContainedIn,
    NotContains,
    NotContainedIn,
}

fn take_operator(input: &str) -> Result<(Operator, &str)> {
    let lowered = input.to_ascii_lowercase();
    let (operator, len) = if input.starts_with('+') {
        (Operator::Or, 1)
    } else if lowered.starts_with("or") {
        (Operator::Or, 2)
    } else if input.starts_with('^') {
        (Operator::And, 1)
    } else if lowered.starts_with("and") {
        (Operator::And, 3)
    } else if input.starts_with("..") {
        (Operator::FromTo, 2)
    } else if input.starts_with("/>") {
        (Operator::NotContains, 2)
    } else if input.starts_with("/<") {
        (Operator::NotContainedIn, 2)
    } else if input.starts_with('>') {
        (Operator::Contains, 1)
    } else if input.starts_with('<') {
        (Operator::ContainedIn, 1)
    } else {
        return Err(syntax_error(&format!("unknown operator at {:?}", input)));
    };
    Ok((operator, &input[len..]))
}

/// Index of the ')' matching the '(' at position 0, quote-aware.
fn matching_paren(input: &str) -> Result<usize> {
    let mut depth = 0;
    let mut in_quotes = false;
    for (index, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => {
                depth -= 1;
                if depth == 0 {
                    return Ok(index);
                }
            }
            _ => {}
        }
    }
    Err(syntax_error("unbalanced brackets"))
}

fn syntax_error(message: &str) -> Error {
    Error::new(ErrorKind::InvalidInput, format!("GCL syntax: {}", message))
}
