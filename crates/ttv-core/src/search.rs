//! Sample search queries.
//!
//! A query is whitespace-separated terms, all of which must match:
//! `label:N`, `pred:N`, `idx:A-B` (inclusive) or `idx:N`, and free text.
//! Free text is a case-insensitive regex over the sample text; a pattern
//! that fails to compile is matched as a literal substring instead.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::sample::Sample;

static FIELD_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(label|pred|idx):(.+)$").unwrap());
static INDEX_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:-(\d+))?$").unwrap());

#[derive(Clone, Debug)]
pub enum QueryTerm {
    Label(i64),
    Predicted(i64),
    IndexRange(usize, usize),
    Text(Regex),
    /// Lowercased literal, for text that is not a valid pattern.
    Literal(String),
}

impl QueryTerm {
    pub fn matches(&self, sample: &Sample) -> bool {
        match self {
            QueryTerm::Label(l) => sample.label == *l,
            QueryTerm::Predicted(p) => sample.predicted_label == *p,
            QueryTerm::IndexRange(lo, hi) => (*lo..=*hi).contains(&sample.id),
            QueryTerm::Text(re) => re.is_match(&sample.text),
            QueryTerm::Literal(needle) => sample.text.to_lowercase().contains(needle.as_str()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SampleQuery {
    source: String,
    terms: Vec<QueryTerm>,
}

fn text_term(raw: &str) -> QueryTerm {
    match RegexBuilder::new(raw).case_insensitive(true).build() {
        Ok(re) => QueryTerm::Text(re),
        Err(_) => QueryTerm::Literal(raw.to_lowercase()),
    }
}

fn field_term(field: &str, value: &str) -> Option<QueryTerm> {
    match field {
        "label" => value.parse().ok().map(QueryTerm::Label),
        "pred" => value.parse().ok().map(QueryTerm::Predicted),
        "idx" => {
            let caps = INDEX_RANGE.captures(value)?;
            let lo: usize = caps[1].parse().ok()?;
            let hi: usize = match caps.get(2) {
                Some(m) => m.as_str().parse().ok()?,
                None => lo,
            };
            Some(QueryTerm::IndexRange(lo.min(hi), lo.max(hi)))
        }
        _ => None,
    }
}

impl SampleQuery {
    /// Parse a query. Never fails: unparseable field terms become text terms.
    pub fn parse(query: &str) -> Self {
        let terms = query
            .split_whitespace()
            .map(|token| {
                FIELD_TERM
                    .captures(token)
                    .and_then(|caps| field_term(&caps[1], &caps[2]))
                    .unwrap_or_else(|| text_term(token))
            })
            .collect();
        Self {
            source: query.trim().to_string(),
            terms,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    /// An empty query matches everything.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, sample: &Sample) -> bool {
        self.terms.iter().all(|t| t.matches(sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Sample> {
        let rows = [
            (0, 1, "The cat sat"),
            (1, 1, "a dog barked"),
            (2, 2, "CAT nap"),
            (3, 3, "bird (small)"),
        ];
        rows.iter()
            .enumerate()
            .map(|(i, (label, pred, text))| Sample {
                id: i,
                x: 0.0,
                y: 0.0,
                label: *label,
                predicted_label: *pred,
                confidence: 1.0,
                text: text.to_string(),
            })
            .collect()
    }

    fn ids(q: &str) -> Vec<usize> {
        let s = samples();
        let query = SampleQuery::parse(q);
        s.iter().filter(|x| query.matches(x)).map(|x| x.id).collect()
    }

    #[test]
    fn test_field_terms() {
        assert_eq!(ids("label:1"), vec![1]);
        assert_eq!(ids("pred:1"), vec![0, 1]);
        assert_eq!(ids("idx:1-2"), vec![1, 2]);
        assert_eq!(ids("idx:3"), vec![3]);
        assert_eq!(ids("idx:2-1"), vec![1, 2]);
    }

    #[test]
    fn test_free_text_is_case_insensitive_regex() {
        assert_eq!(ids("cat"), vec![0, 2]);
        assert_eq!(ids("^a\\s"), vec![1]);
    }

    #[test]
    fn test_terms_combine_with_and() {
        assert_eq!(ids("cat pred:2"), vec![2]);
        assert_eq!(ids("cat label:3"), Vec::<usize>::new());
    }

    #[test]
    fn test_invalid_regex_falls_back_to_literal() {
        let q = SampleQuery::parse("(SMALL");
        assert!(matches!(q.terms()[0], QueryTerm::Literal(_)));
        assert_eq!(ids("(SMALL"), vec![3]);
    }

    #[test]
    fn test_bad_field_value_is_text() {
        let q = SampleQuery::parse("label:cat");
        assert!(matches!(q.terms()[0], QueryTerm::Text(_)));
        assert!(ids("label:cat").is_empty());
    }

    #[test]
    fn test_empty_query_matches_all() {
        let q = SampleQuery::parse("   ");
        assert!(q.is_empty());
        assert_eq!(ids(""), vec![0, 1, 2, 3]);
    }
}
