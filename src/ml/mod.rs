pub mod backend;
pub mod evaluation;
pub mod inference;
pub mod ml_model;
pub mod training;

pub use evaluation::{evaluate_model, EvaluationMetrics};
pub use inference::{InferenceEngine, PredictionResult};
pub use ml_model::{load_and_normalize_image_bytes, Architecture, Backbone, ImageClassifier, ModelConfig};
pub use training::{train_model, EpochProgress, TrainingReport, TrainingRequest};
