//! Locating supporting evidence for a value in the source text.

use super::Evidence;
use crate::extractor::{Candidate, CandidateType};
use crate::text::{edit_distance, squash, strip_leading_zeros};

/// Minimum share of value tokens found in the text for a fuzzy match.
pub(crate) const FUZZY_THRESHOLD: f64 = 0.6;

/// Squashed values shorter than this are only matched exactly or via candidates.
const MIN_SQUASHED_LEN: usize = 3;

const MAX_EVIDENCE: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MatchQuality {
    Exact,
    Normalized,
    Fuzzy { score: f64, ambiguous: bool },
    None,
}

#[derive(Debug, Clone)]
pub(crate) struct Found {
    pub quality: MatchQuality,
    pub evidence: Vec<Evidence>,
}

struct Token {
    text: String,
    start: usize,
    end: usize,
}

fn tokenize(s: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current: Option<(usize, String)> = None;
    for (i, c) in s.char_indices() {
        if c.is_alphanumeric() {
            match current.as_mut() {
                Some((_, t)) => t.extend(c.to_lowercase()),
                None => current = Some((i, c.to_lowercase().collect())),
            }
        } else if let Some((start, t)) = current.take() {
            tokens.push(Token {
                text: t,
                start,
                end: i,
            });
        }
    }
    if let Some((start, t)) = current {
        tokens.push(Token {
            text: t,
            start,
            end: s.len(),
        });
    }
    tokens
}

fn tokens_match(a: &str, b: &str) -> bool {
    a == b || (a.chars().count() >= 4 && b.chars().count() >= 4 && edit_distance(a, b) <= 1)
}

/// Share of `value` tokens that appear (possibly misspelled) in `other`.
fn token_overlap(value: &[Token], other: &[Token]) -> f64 {
    if value.is_empty() {
        return 0.0;
    }
    let hits = value
        .iter()
        .filter(|v| other.iter().any(|o| tokens_match(&v.text, &o.text)))
        .count();
    hits as f64 / value.len() as f64
}

/// Candidate values a field may be compared against.
fn candidate_variants(c: &Candidate) -> Vec<String> {
    let mut variants = vec![c.value.clone()];
    match c.candidate_type {
        CandidateType::Datetime => {
            if let Some((date, time)) = c.value.split_once('T') {
                variants.push(date.to_string());
                variants.push(time.to_string());
            }
        }
        CandidateType::Weight | CandidateType::Pieces | CandidateType::Temperature => {
            if let Some(first) = c.value.split_whitespace().next() {
                variants.push(first.to_string());
            }
        }
        _ => {}
    }
    variants
}

fn comparable(value: &str) -> String {
    let squashed = squash(value);
    strip_leading_zeros(&squashed).to_string()
}

/// Precomputed views of the source text used for evidence lookups.
pub(crate) struct EvidenceIndex<'a> {
    text: &'a str,
    candidates: &'a [Candidate],
    squashed: String,
    /// Original byte range of each byte of `squashed`.
    origin: Vec<(usize, usize)>,
    tokens: Vec<Token>,
}

impl<'a> EvidenceIndex<'a> {
    pub(crate) fn new(text: &'a str, candidates: &'a [Candidate]) -> Self {
        let mut squashed = String::with_capacity(text.len());
        let mut origin = Vec::with_capacity(text.len());
        for (i, c) in text.char_indices() {
            if !c.is_alphanumeric() {
                continue;
            }
            let end = i + c.len_utf8();
            for lc in c.to_lowercase() {
                squashed.push(lc);
                origin.extend(std::iter::repeat((i, end)).take(lc.len_utf8()));
            }
        }
        Self {
            text,
            candidates,
            squashed,
            origin,
            tokens: tokenize(text),
        }
    }

    pub(crate) fn text(&self) -> &'a str {
        self.text
    }

    fn evidence_for(&self, start: usize, end: usize) -> Evidence {
        let candidate_index = self
            .candidates
            .iter()
            .position(|c| c.position.start < end && start < c.position.end);
        Evidence {
            match_text: self.text[start..end].to_string(),
            char_start: start,
            char_end: end,
            label: candidate_index.and_then(|i| self.candidates[i].label_hint.clone()),
            candidate_index,
        }
    }

    fn candidate_evidence(&self, index: usize) -> Evidence {
        let c = &self.candidates[index];
        Evidence {
            match_text: c.raw_match.clone(),
            char_start: c.position.start,
            char_end: c.position.end,
            label: c.label_hint.clone(),
            candidate_index: Some(index),
        }
    }

    /// Exact occurrences of `value` not embedded in a longer alphanumeric run.
    pub(crate) fn exact_occurrences(&self, value: &str) -> Vec<(usize, usize)> {
        if value.is_empty() {
            return Vec::new();
        }
        self.text
            .match_indices(value)
            .map(|(start, m)| (start, start + m.len()))
            .filter(|&(start, end)| {
                let before = self.text[..start].chars().next_back();
                let after = self.text[end..].chars().next();
                let first = value.chars().next();
                let last = value.chars().next_back();
                let edge_ok = |edge: Option<char>, inner: Option<char>| match (edge, inner) {
                    (Some(e), Some(i)) => !(e.is_alphanumeric() && i.is_alphanumeric()),
                    _ => true,
                };
                edge_ok(before, first) && edge_ok(after, last)
            })
            .collect()
    }

    /// Occurrences ignoring case, punctuation and spacing.
    pub(crate) fn normalized_occurrences(&self, value: &str) -> Vec<(usize, usize)> {
        let needle = squash(value);
        if needle.len() < MIN_SQUASHED_LEN {
            return Vec::new();
        }
        self.squashed
            .match_indices(needle.as_str())
            .map(|(k, m)| (self.origin[k].0, self.origin[k + m.len() - 1].1))
            .collect()
    }

    /// All places `value` occurs, exact first, then normalized.
    pub(crate) fn occurrences(&self, value: &str) -> Vec<(usize, usize)> {
        let exact = self.exact_occurrences(value);
        if !exact.is_empty() {
            return exact;
        }
        self.normalized_occurrences(value)
    }

    /// Best available evidence for `value` among `types` of candidates.
    pub(crate) fn find(&self, value: &str, types: &[CandidateType]) -> Found {
        let value = value.trim();
        if value.is_empty() {
            return Found {
                quality: MatchQuality::None,
                evidence: Vec::new(),
            };
        }

        let exact = self.exact_occurrences(value);
        if !exact.is_empty() {
            return Found {
                quality: MatchQuality::Exact,
                evidence: exact
                    .iter()
                    .take(MAX_EVIDENCE)
                    .map(|&(s, e)| self.evidence_for(s, e))
                    .collect(),
            };
        }

        let target = comparable(value);
        let by_candidate: Vec<usize> = self
            .candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| types.contains(&c.candidate_type))
            .filter(|(_, c)| {
                candidate_variants(c)
                    .iter()
                    .any(|v| !target.is_empty() && comparable(v) == target)
            })
            .map(|(i, _)| i)
            .collect();
        if !by_candidate.is_empty() {
            return Found {
                quality: MatchQuality::Normalized,
                evidence: by_candidate
                    .iter()
                    .take(MAX_EVIDENCE)
                    .map(|&i| self.candidate_evidence(i))
                    .collect(),
            };
        }

        let normalized = self.normalized_occurrences(value);
        if !normalized.is_empty() {
            return Found {
                quality: MatchQuality::Normalized,
                evidence: normalized
                    .iter()
                    .take(MAX_EVIDENCE)
                    .map(|&(s, e)| self.evidence_for(s, e))
                    .collect(),
            };
        }

        self.fuzzy(value, types)
    }

    fn fuzzy(&self, value: &str, types: &[CandidateType]) -> Found {
        let value_tokens = tokenize(value);
        let score = token_overlap(&value_tokens, &self.tokens);
        if score < FUZZY_THRESHOLD {
            return Found {
                quality: MatchQuality::None,
                evidence: Vec::new(),
            };
        }

        let evidence = self
            .tokens
            .iter()
            .filter(|t| value_tokens.iter().any(|v| tokens_match(&v.text, &t.text)))
            .take(MAX_EVIDENCE)
            .map(|t| self.evidence_for(t.start, t.end))
            .collect();

        // Two candidates with different values fitting equally well is ambiguous.
        let mut scored: Vec<(f64, String)> = self
            .candidates
            .iter()
            .filter(|c| types.contains(&c.candidate_type))
            .map(|c| (token_overlap(&value_tokens, &tokenize(&c.value)), comparable(&c.value)))
            .filter(|(s, _)| *s >= FUZZY_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        let ambiguous = match scored.as_slice() {
            [(best, first), rest @ ..] => rest
                .iter()
                .any(|(s, v)| s.total_cmp(best).is_eq() && v != first),
            [] => false,
        };

        Found {
            quality: MatchQuality::Fuzzy { score, ambiguous },
            evidence,
        }
    }
}
