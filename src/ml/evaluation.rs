//! 評価
//!
//! 評価用分割に対して推論を行い、分類レポートを `report_path` に書き出します。

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    tensor::backend::Backend,
};
use indicatif::ProgressBar;
use std::fs;
use std::path::{Path, PathBuf};

use crate::labels::LabelMap;
use crate::ml::{ClassificationReport, InferenceEngine, SpamBatcher, SpamDataset, Split};
use crate::model::config::AppConfig;

/// 評価結果
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub report: ClassificationReport,
    pub report_path: PathBuf,
}

/// チェックポイントを評価してレポートを書き出す
///
/// ラベル値のオフセットと入力サイズはチェックポイントのメタデータに従います。
/// クラス名が設定と異なる場合はエラーになります。
pub fn evaluate_model<B: Backend>(
    config: &AppConfig,
    labels: &LabelMap,
    checkpoint: &Path,
    device: &B::Device,
) -> Result<EvaluationOutcome> {
    let engine = InferenceEngine::<B>::load(checkpoint, device)?;
    config.ensure_classes_match(engine.class_names())?;
    let metadata = engine.metadata();

    let dataset = SpamDataset::new(
        labels,
        Split::Test,
        config.training.train_ratio,
        metadata.label_offset,
    )?;
    dataset.validate_labels(metadata.num_labels())?;
    let num_samples = dataset.len();
    tracing::info!("評価データ: {} 件", num_samples);

    let batcher = SpamBatcher::<B>::new(device.clone(), engine.image_size());
    let loader = DataLoaderBuilder::new(batcher)
        .batch_size(config.training.batch_size)
        .shuffle(config.training.seed)
        .num_workers(config.training.num_workers.max(1))
        .build(dataset);

    let bar = ProgressBar::new(num_samples as u64);
    let mut y_true = Vec::with_capacity(num_samples);
    let mut y_pred = Vec::with_capacity(num_samples);

    for batch in loader.iter() {
        let batch = batch?;
        let predictions = engine.predict_batch(batch.images)?;
        bar.inc(predictions.len() as u64);

        y_true.extend(batch.targets.into_data().iter::<i64>().map(|t| t as usize));
        y_pred.extend(predictions);
    }
    bar.finish_and_clear();

    let report = ClassificationReport::from_labels(&y_true, &y_pred, engine.class_names())?;

    let report_path = PathBuf::from(&config.output.report_path);
    fs::write(&report_path, report.to_string())
        .with_context(|| format!("Failed to write report: {}", report_path.display()))?;
    tracing::info!(
        "正解率 {:.4} ({} 件) -> {}",
        report.accuracy,
        report.total_support,
        report_path.display()
    );

    Ok(EvaluationOutcome { report, report_path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::tiny_test_config;
    use crate::ml::training::tests::{test_config, write_fixture};
    use crate::model::{save_checkpoint, CheckpointMetadata};
    use burn::backend::NdArray;
    use tempfile::tempdir;

    fn write_checkpoint(dir: &Path, class_names: Vec<String>) -> PathBuf {
        let num_labels = class_names.len();
        let config = tiny_test_config(num_labels);
        let model = config.init::<NdArray>(&Default::default());
        let metadata = CheckpointMetadata::new(class_names, 0, config, None, 4, 0.25);
        save_checkpoint(dir, &model, &metadata).unwrap()
    }

    #[test]
    fn test_evaluate_writes_report() {
        let dir = tempdir().unwrap();
        let labels = write_fixture(dir.path(), 4, 2);
        let config = test_config(&dir, 2, 1);
        let checkpoint = write_checkpoint(dir.path(), config.labels.class_names.clone());

        // 既存のレポートは上書きされる
        fs::write(&config.output.report_path, "stale").unwrap();

        let outcome = evaluate_model::<NdArray>(&config, &labels, &checkpoint, &Default::default()).unwrap();

        // 各クラス4件のうち半分が評価用
        assert_eq!(outcome.report.total_support, 4);
        assert_eq!(outcome.report.classes.len(), 2);
        assert!(outcome.report.classes.iter().all(|c| c.support == 2));

        let written = fs::read_to_string(&outcome.report_path).unwrap();
        assert_eq!(written, outcome.report.to_string());
        assert!(written.contains("class_0"));
        assert!(written.contains("weighted avg"));
    }

    #[test]
    fn test_class_name_mismatch() {
        let dir = tempdir().unwrap();
        let labels = write_fixture(dir.path(), 2, 2);
        let config = test_config(&dir, 2, 1);
        let checkpoint = write_checkpoint(dir.path(), vec!["x".into(), "y".into()]);

        let result = evaluate_model::<NdArray>(&config, &labels, &checkpoint, &Default::default());
        assert!(result.is_err());
        assert!(!Path::new(&config.output.report_path).exists());
    }

    #[test]
    fn test_empty_test_split() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, 2, 1);
        let checkpoint = write_checkpoint(dir.path(), config.labels.class_names.clone());

        let outcome =
            evaluate_model::<NdArray>(&config, &LabelMap::new(), &checkpoint, &Default::default()).unwrap();
        assert_eq!(outcome.report.total_support, 0);
        assert!(outcome.report_path.exists());
    }
}
