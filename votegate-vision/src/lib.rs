pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use face::{cosine_similarity, Detection, Embedding};
pub use model::ModelPaths;
pub use pipeline::{DetectionOptions, EmbeddingExtractor, Pipeline};
