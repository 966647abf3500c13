pub mod ml_model;
pub mod dataset;
pub mod pretrained;
pub mod training;
pub mod inference;
pub mod evaluation;
pub mod report;

pub use ml_model::{
    load_and_normalize_image, normalize_image, PreprocessError, ViTConfig, ViTForImageClassification, ViTModel,
    ViTModelRecord, IMAGE_MEAN, IMAGE_STD, PRETRAINED_MODEL_ID,
};
#[cfg(test)]
pub(crate) use ml_model::tiny_test_config;
pub use dataset::{split_dataset_with_balancing, SpamBatch, SpamBatcher, SpamDataset, SpamItem, Split, SplitError};
pub use pretrained::{build_model, fetch_pretrained_weights, load_pretrained_backbone, ModelInit};
pub use training::{optimizer_config, train_model, LossTracker, TrainingOutcome};
pub use inference::InferenceEngine;
pub use evaluation::{evaluate_model, EvaluationOutcome};
pub use report::{ClassificationReport, ReportError};
