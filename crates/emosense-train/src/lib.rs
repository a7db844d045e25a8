//! Offline training for the Emosense emotion network.

pub mod augment;
pub mod dataset;
pub mod trainer;

pub use augment::{augment, AugmentConfig};
pub use dataset::{load_split, DatasetError, LabeledSet};
pub use trainer::{train, Metrics, TrainConfig, TrainError, TrainReport};
