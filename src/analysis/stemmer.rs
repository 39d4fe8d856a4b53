use rust_stemmers::{Algorithm, Stemmer};

/// Stemming is a pure function from term to reduced form. Terms that are
/// not plain lowercase words (tags, numbers, mixed scripts) have no
/// stemmable form and return None.
pub fn stem(term: &str) -> Option<String> {
    if term.is_empty() || !term.bytes().all(|b| b.is_ascii_lowercase()) {
        return None;
    }
    let stemmer = Stemmer::create(Algorithm::English);
    let stemmed = stemmer.stem(term);
    if stemmed.is_empty() {
        None
    } else {
        Some(stemmed.into_owned())
    }
}
