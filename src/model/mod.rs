pub mod config;
pub mod model_metadata;
pub mod model_storage;
pub mod schema;

pub use config::{AppConfig, DeviceType, PathSettings, TrainingSettings};
pub use model_metadata::{ModelMetadata, ARTIFACT_FORMAT_VERSION};
pub use model_storage::{load_metadata, load_model_with_metadata, print_metadata_info, save_model_with_metadata};
pub use schema::ArtifactSchema;
