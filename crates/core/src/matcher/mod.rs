//! Resolution of free-text manifest descriptions to catalog devices.
//!
//! The alias index is consulted first; a hit is always `high` confidence.
//! Everything else falls through to token-overlap scoring against the
//! candidate labels, with configurable thresholds splitting the score range
//! into `medium`, `low` and `manual`.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::alias::AliasIndex;
use crate::domain::bulk_quote::MatchConfidence;
use crate::domain::device::{Device, DeviceId};
use crate::errors::DomainError;

const STORAGE_UNITS: [&str; 3] = ["gb", "tb", "mb"];

/// Canonical form used both as the alias key and as scoring input.
///
/// Lowercases, turns every non-alphanumeric character into a space, collapses
/// runs of whitespace and glues a bare storage quantity to its unit so that
/// `256 GB` and `256GB` normalize identically.
pub fn normalize(raw: &str) -> String {
    let spaced: String = raw
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();

    let mut tokens: Vec<String> = Vec::new();
    for token in spaced.split_whitespace() {
        let glue = STORAGE_UNITS.contains(&token)
            && tokens.last().is_some_and(|previous| previous.chars().all(|ch| ch.is_ascii_digit()));
        match tokens.last_mut() {
            Some(previous) if glue => previous.push_str(token),
            _ => tokens.push(token.to_string()),
        }
    }
    tokens.join(" ")
}

/// Splits already-normalized text into tokens, preserving order and repeats.
pub fn tokenize(normalized: &str) -> Vec<&str> {
    normalized.split_whitespace().collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchThresholds {
    pub medium: f64,
    pub low: f64,
}

impl MatchThresholds {
    pub fn new(medium: f64, low: f64) -> Result<Self, DomainError> {
        if !(0.0..=1.0).contains(&medium) || !(0.0..=1.0).contains(&low) {
            return Err(DomainError::validation("matching", "thresholds must be within 0.0..=1.0"));
        }
        if low <= 0.0 {
            return Err(DomainError::validation("matching.low_threshold", "must be above 0.0"));
        }
        if low > medium {
            return Err(DomainError::validation(
                "matching.low_threshold",
                format!("low threshold {low} exceeds medium threshold {medium}"),
            ));
        }
        Ok(Self { medium, low })
    }
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self { medium: 0.75, low: 0.5 }
    }
}

/// A catalog device with its label pre-tokenized for scoring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchCandidate {
    pub device_id: DeviceId,
    pub label: String,
    tokens: BTreeSet<String>,
}

impl MatchCandidate {
    pub fn new(device_id: DeviceId, label: impl Into<String>) -> Self {
        let label = label.into();
        let tokens = tokenize(&normalize(&label)).into_iter().map(str::to_string).collect();
        Self { device_id, label, tokens }
    }

    pub fn from_device(device: &Device) -> Self {
        Self::new(device.id, device.label())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub device_id: Option<DeviceId>,
    pub confidence: MatchConfidence,
    /// Fraction of distinct query tokens found in the chosen label; `1.0` for
    /// alias hits and `0.0` when nothing was scored.
    pub score: f64,
    /// Normalized query text, i.e. the key an accepted match is stored under.
    pub normalized: String,
}

impl MatchOutcome {
    fn unresolved(confidence: MatchConfidence, score: f64, normalized: String) -> Self {
        Self { device_id: None, confidence, score, normalized }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceMatcher {
    thresholds: MatchThresholds,
}

struct Scored<'a> {
    candidate: &'a MatchCandidate,
    score: f64,
    overlap: usize,
}

impl DeviceMatcher {
    pub fn new(thresholds: MatchThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> MatchThresholds {
        self.thresholds
    }

    pub fn match_text(
        &self,
        raw_text: &str,
        candidates: &[MatchCandidate],
        aliases: &AliasIndex,
    ) -> MatchOutcome {
        let normalized = normalize(raw_text);
        if normalized.is_empty() {
            return MatchOutcome::unresolved(MatchConfidence::Unmatched, 0.0, normalized);
        }

        if let Some(alias) = aliases.lookup(&normalized) {
            return MatchOutcome {
                device_id: Some(alias.device_id),
                confidence: MatchConfidence::High,
                score: 1.0,
                normalized,
            };
        }

        let query = tokenize(&normalized);
        let distinct: BTreeSet<&str> = query.iter().copied().collect();

        let mut scored: Vec<Scored<'_>> = candidates
            .iter()
            .filter_map(|candidate| {
                let hits =
                    distinct.iter().filter(|token| candidate.tokens.contains(**token)).count();
                if hits == 0 {
                    return None;
                }
                let overlap =
                    query.iter().filter(|token| candidate.tokens.contains(**token)).count();
                Some(Scored { candidate, score: hits as f64 / distinct.len() as f64, overlap })
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .score
                .partial_cmp(&left.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| right.overlap.cmp(&left.overlap))
                .then_with(|| left.candidate.label.cmp(&right.candidate.label))
        });

        let Some(best) = scored.first() else {
            return MatchOutcome::unresolved(MatchConfidence::Manual, 0.0, normalized);
        };
        if best.score < self.thresholds.low {
            return MatchOutcome::unresolved(MatchConfidence::Manual, best.score, normalized);
        }

        let tied = scored.get(1).is_some_and(|runner_up| runner_up.score >= best.score);
        let confidence = if best.score >= self.thresholds.medium && !tied {
            MatchConfidence::Medium
        } else {
            MatchConfidence::Low
        };

        MatchOutcome {
            device_id: Some(best.candidate.device_id),
            confidence,
            score: best.score,
            normalized,
        }
    }
}
