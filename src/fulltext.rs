//! Boolean keyword matching over indexed text.
//!
//! Query grammar: whitespace-separated terms are ANDed, `-term` excludes,
//! `term*` matches a token prefix, `"a phrase"` matches consecutive tokens and
//! `OR` separates alternative groups. A group needs at least one positive term;
//! a query with no positive term matches nothing.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static LEXEME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"-?"[^"]*"?|\S+"#).unwrap());

/// NFKC-normalize, lowercase and split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized: String = text.nfkc().collect::<String>().to_lowercase();
    normalized.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(str::to_string).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Term {
    words: Vec<String>,
    prefix_last: bool,
}

impl Term {
    fn matches(&self, tokens: &[String]) -> bool {
        let n = self.words.len();
        if n == 0 || tokens.len() < n { return false; }
        tokens.windows(n).any(|w| {
            w.iter().zip(&self.words).enumerate().all(|(i, (tok, word))| {
                if self.prefix_last && i == n - 1 { tok.starts_with(word.as_str()) } else { tok == word }
            })
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Group {
    positive: Vec<Term>,
    negative: Vec<Term>,
}

impl Group {
    fn matches(&self, tokens: &[String]) -> bool {
        !self.positive.is_empty()
            && self.positive.iter().all(|t| t.matches(tokens))
            && !self.negative.iter().any(|t| t.matches(tokens))
    }
}

/// Parsed query, reusable across many documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FulltextQuery {
    groups: Vec<Group>,
}

impl FulltextQuery {
    pub fn parse(query: &str) -> Self {
        let mut groups = vec![Group::default()];
        for m in LEXEME.find_iter(query) {
            let lex = m.as_str();
            if lex == "OR" { groups.push(Group::default()); continue; }
            let (negative, body) = match lex.strip_prefix('-') { Some(rest) if !rest.is_empty() => (true, rest), _ => (false, lex) };
            let term = if let Some(quoted) = body.strip_prefix('"') {
                Term { words: tokenize(quoted.trim_end_matches('"')), prefix_last: false }
            } else {
                let prefix_last = body.ends_with('*');
                Term { words: tokenize(body.trim_end_matches('*')), prefix_last }
            };
            if term.words.is_empty() { continue; }
            let Some(g) = groups.last_mut() else { continue; };
            if negative { g.negative.push(term) } else { g.positive.push(term) }
        }
        Self { groups }
    }

    /// True when no document can match.
    pub fn is_empty(&self) -> bool { self.groups.iter().all(|g| g.positive.is_empty()) }

    pub fn matches_tokens(&self, tokens: &[String]) -> bool { self.groups.iter().any(|g| g.matches(tokens)) }

    pub fn matches(&self, indexed_text: &str) -> bool {
        if self.is_empty() { return false; }
        self.matches_tokens(&tokenize(indexed_text))
    }
}

/// One-shot match of `query` against `indexed_text`.
pub fn matches(indexed_text: &str, query: &str) -> bool { FulltextQuery::parse(query).matches(indexed_text) }

#[cfg(test)]
#[path = "fulltext_tests.rs"]
mod fulltext_tests;
