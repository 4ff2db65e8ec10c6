pub mod manifest;
pub mod split;

pub use manifest::{load_manifest, scan_class_folders, write_manifest, LabeledSample};
pub use split::{train_test_split, TrainTestSplit};
