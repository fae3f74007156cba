//! Place-label quality gate.
//!
//! [`PlaceClassifier::classify`] is a pure function of the label and the
//! compiled [`ClassifierRules`]; it keeps no state between calls.

use serde::{Deserialize, Serialize};

use super::rules::ClassifierRules;
use crate::models::slugify;

/// Longest sub-sequence considered when salvaging a place from a noisy label
const MAX_SALVAGE_TOKENS: usize = 3;

/// Why a label or a place's source was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    Empty,
    FailedQualityGate,
    NotArraySource,
    NoUsableRows,
    NoIdentifiers,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Empty => "empty",
            RejectReason::FailedQualityGate => "failed-quality-gate",
            RejectReason::NotArraySource => "not-array-source",
            RejectReason::NoUsableRows => "no-usable-rows",
            RejectReason::NoIdentifiers => "no-identifiers",
        }
    }
}

/// How an accepted label was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptBasis {
    /// Seed list, curated override or hard-include allowlist
    Trusted,
    /// Passed the gate as written
    Clean,
    /// Passed after stripping directional prefixes/suffixes
    Stripped,
    /// A sub-sequence matched a known place
    Salvaged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub name: String,
    pub slug: String,
    pub basis: AcceptBasis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(Acceptance),
    Rejected(RejectReason),
}

impl Verdict {
    pub fn accepted(&self) -> Option<&Acceptance> {
        match self {
            Verdict::Accepted(a) => Some(a),
            Verdict::Rejected(_) => None,
        }
    }
}

pub struct PlaceClassifier {
    rules: ClassifierRules,
}

impl PlaceClassifier {
    pub fn new(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut ClassifierRules {
        &mut self.rules
    }

    /// Decide whether `label` names a real place, salvaging one if possible.
    pub fn classify(&self, label: &str) -> Verdict {
        let cleaned = label.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.is_empty() {
            return Verdict::Rejected(RejectReason::Empty);
        }
        if let Some(acceptance) = self.accept_as_written(&cleaned) {
            return Verdict::Accepted(acceptance);
        }
        match self.salvage(&cleaned) {
            Some((name, basis)) => accept(&name, basis),
            None => Verdict::Rejected(RejectReason::FailedQualityGate),
        }
    }

    /// Trusted, clean or stripped acceptance only. Never consults the known
    /// places, so the answer does not depend on what else has been accepted.
    pub fn classify_direct(&self, label: &str) -> Option<Acceptance> {
        let cleaned = label.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.is_empty() {
            return None;
        }
        self.accept_as_written(&cleaned)
    }

    fn accept_as_written(&self, cleaned: &str) -> Option<Acceptance> {
        let full: Vec<&str> = cleaned.split(' ').collect();
        let stripped = self.strip_directionals(&full);
        let mut forms = vec![(full.clone(), AcceptBasis::Clean)];
        if !stripped.is_empty() && stripped != full {
            forms.push((stripped, AcceptBasis::Stripped));
        }

        // Trusted names win over every rejection rule
        for (tokens, _) in &forms {
            let slug = slugify(&tokens.join(" "));
            if let Some(name) = self.rules.trusted_name(&slug) {
                return Some(acceptance(name, AcceptBasis::Trusted));
            }
        }

        forms.iter().find_map(|(tokens, basis)| {
            let text = tokens.join(" ");
            self.passes_gate(&text)
                .then(|| acceptance(&display_case(&text), *basis))
        })
    }

    /// Collapse a noisy multi-token slug onto a known two- or one-token suffix
    pub fn canonical_slug(&self, slug: &str) -> String {
        if self.rules.trusted_name(slug).is_some() || self.rules.known_name(slug).is_some() {
            return slug.to_string();
        }
        let tokens: Vec<&str> = slug.split('-').filter(|t| !t.is_empty()).collect();
        for n in [2, 1] {
            if tokens.len() > n {
                let suffix = tokens[tokens.len() - n..].join("-");
                if let Some(name) = self
                    .rules
                    .trusted_name(&suffix)
                    .or_else(|| self.rules.known_name(&suffix))
                {
                    return slugify(name);
                }
            }
        }
        slug.to_string()
    }

    /// Length, token count, character set, fragment patterns, repeated runs
    /// and blocked tokens.
    pub fn passes_gate(&self, text: &str) -> bool {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty()
            || text.chars().count() > self.rules.max_len
            || tokens.len() > self.rules.max_tokens
        {
            return false;
        }
        if !text
            .chars()
            .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'')
        {
            return false;
        }
        if self.rules.matches_fragment(text) || has_repeated_run(&tokens) {
            return false;
        }
        !tokens.iter().any(|t| self.rules.is_blocked(t))
    }

    fn strip_directionals<'a>(&self, tokens: &[&'a str]) -> Vec<&'a str> {
        let mut start = 0;
        let mut end = tokens.len();
        while start < end && self.rules.is_directional(tokens[start]) {
            start += 1;
        }
        while end > start && self.rules.is_directional(tokens[end - 1]) {
            end -= 1;
        }
        tokens[start..end].to_vec()
    }

    /// Best suffix/prefix sub-sequence (up to three tokens) that is a trusted
    /// or known place. Ranked by trust, fewest blocked tokens, fewest tokens,
    /// then lexical order.
    fn salvage(&self, cleaned: &str) -> Option<(String, AcceptBasis)> {
        let tokens: Vec<&str> = cleaned
            .split(' ')
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty())
            .collect();

        let mut best: Option<(u8, usize, usize, String)> = None;
        for n in 1..=MAX_SALVAGE_TOKENS.min(tokens.len()) {
            for window in [&tokens[tokens.len() - n..], &tokens[..n]] {
                if has_repeated_run(window) {
                    continue;
                }
                let slug = slugify(&window.join(" "));
                let (tier, name) = match (self.rules.trusted_name(&slug), self.rules.known_name(&slug)) {
                    (Some(name), _) => (0u8, name),
                    (None, Some(name)) => (1u8, name),
                    (None, None) => continue,
                };
                let blocked = window.iter().filter(|t| self.rules.is_blocked(t)).count();
                let candidate = (tier, blocked, n, name.to_string());
                if best.as_ref().map_or(true, |b| candidate < *b) {
                    best = Some(candidate);
                }
            }
        }

        best.map(|(tier, _, _, name)| {
            let basis = if tier == 0 {
                AcceptBasis::Trusted
            } else {
                AcceptBasis::Salvaged
            };
            (name, basis)
        })
    }
}

fn acceptance(name: &str, basis: AcceptBasis) -> Acceptance {
    Acceptance {
        name: name.to_string(),
        slug: slugify(name),
        basis,
    }
}

fn accept(name: &str, basis: AcceptBasis) -> Verdict {
    Verdict::Accepted(acceptance(name, basis))
}

/// The same token twice in a row ("Dalhart Dalhart")
fn has_repeated_run(tokens: &[&str]) -> bool {
    tokens
        .windows(2)
        .any(|w| w[0].eq_ignore_ascii_case(w[1]))
}

/// Title-case labels written in a single case; leave mixed case alone.
fn display_case(text: &str) -> String {
    let has_lower = text.chars().any(|c| c.is_lowercase());
    let has_upper = text.chars().any(|c| c.is_uppercase());
    if has_lower && has_upper {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        at_word_start = c == ' ' || c == '-';
    }
    out
}
