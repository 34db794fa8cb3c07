use serde::Serialize;

use crate::{gallery::GalleryEntry, Embedding};

/// Default decision threshold on cosine similarity.
pub const DEFAULT_THRESHOLD: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Same,
    Different,
    NoFace,
    EmptyGallery,
    DecodeFailed,
}

/// Strictly above the threshold is a match; equal is not.
pub fn decide(similarity: f32, threshold: f32) -> Decision {
    if similarity > threshold {
        Decision::Same
    } else {
        Decision::Different
    }
}

pub fn match_embedding(a: &Embedding, b: &Embedding) -> f32 {
    votegate_vision::cosine_similarity(a, b)
}

/// Highest-scoring gallery entry for a query embedding.
#[derive(Debug, Clone, Copy)]
pub struct BestMatch<'g> {
    pub entry: &'g GalleryEntry,
    pub similarity: f32,
}

/// Exhaustive scan. Ties keep the earliest entry, `None` on an empty slice.
pub fn best_match<'g>(entries: &'g [GalleryEntry], query: &Embedding) -> Option<BestMatch<'g>> {
    entries
        .iter()
        .map(|entry| BestMatch {
            entry,
            similarity: match_embedding(entry.embedding(), query),
        })
        .fold(None, |acc, candidate| match acc {
            Some(best) if best.similarity >= candidate.similarity => Some(best),
            _ => Some(candidate),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched_identity: Option<String>,
    pub similarity: Option<f32>,
    pub decision: Decision,
}

impl MatchResult {
    /// A scored comparison, decided against `threshold`.
    pub fn scored(identity: Option<String>, similarity: f32, threshold: f32) -> Self {
        Self {
            matched_identity: identity,
            similarity: Some(similarity),
            decision: decide(similarity, threshold),
        }
    }

    pub fn no_face() -> Self {
        Self::unscored(Decision::NoFace)
    }

    pub fn empty_gallery() -> Self {
        Self::unscored(Decision::EmptyGallery)
    }

    pub fn decode_failed() -> Self {
        Self::unscored(Decision::DecodeFailed)
    }

    fn unscored(decision: Decision) -> Self {
        Self {
            matched_identity: None,
            similarity: None,
            decision,
        }
    }

    pub fn is_same(&self) -> bool {
        self.decision == Decision::Same
    }

    /// Human-readable outcome shown to the voter.
    pub fn message(&self) -> String {
        let sim = self.similarity.unwrap_or_default();
        match (self.decision, &self.matched_identity) {
            (Decision::Same, Some(identity)) => {
                format!("Same person (similarity={sim:.3}, identity {identity})")
            }
            (Decision::Same, None) => format!("Same person (similarity={sim:.3})"),
            (Decision::Different, _) => format!("Different people (similarity={sim:.3})"),
            (Decision::NoFace, _) => "No face detected in the uploaded image.".to_string(),
            (Decision::EmptyGallery, _) => {
                "No reference images in the gallery to compare against.".to_string()
            }
            (Decision::DecodeFailed, _) => "Could not read the uploaded image.".to_string(),
        }
    }
}
