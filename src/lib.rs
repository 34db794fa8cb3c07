pub mod config;
pub mod gallery;
pub mod matcher;
pub mod thumbnail;
pub mod verifier;

// Re-export vision types for convenience
pub use votegate_vision::{
    face, pipeline, DetectionOptions, Embedding, EmbeddingExtractor, ModelPaths, Pipeline,
};

pub use gallery::{Gallery, GalleryEntry, LoadError, LoadReport};
pub use matcher::{decide, Decision, MatchResult};
pub use verifier::{GateError, MatchOutcome, SectionMarker, Verifier};
