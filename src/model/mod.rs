pub mod model_metadata;
pub mod model_storage;
pub mod config;

pub use model_metadata::CheckpointMetadata;
pub use model_storage::{checkpoint_name, format_loss, load_checkpoint, load_metadata, save_checkpoint};
pub use config::{AppConfig, ConfigError, DeviceType, LabelSettings, ModelSettings, OutputSettings, TrainingSettings};
