//! モデル学習
//!
//! 学習用分割に対してエポックを回し、各エポック終了時にチェックポイントを保存します。

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    data::dataset::Dataset,
    grad_clipping::GradientClippingConfig,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use crate::labels::LabelMap;
use crate::ml::{build_model, ModelInit, SpamBatcher, SpamDataset, Split, ViTConfig};
use crate::model::config::{AppConfig, TrainingSettings};
use crate::model::{save_checkpoint, CheckpointMetadata};

/// 小数第3位で丸める
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// エポック内の損失の移動平均
///
/// 各バッチの損失は丸めてから記録し、平均も再度丸めます。
#[derive(Debug, Clone, Default)]
pub struct LossTracker {
    losses: Vec<f64>,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, loss: f64) {
        self.losses.push(round3(loss));
    }

    pub fn len(&self) -> usize {
        self.losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    /// 丸め済みの平均損失（バッチがなければ 0.0）
    pub fn mean(&self) -> f64 {
        if self.losses.is_empty() {
            return 0.0;
        }
        round3(self.losses.iter().sum::<f64>() / self.losses.len() as f64)
    }
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// 最終エポックのチェックポイント
    pub final_checkpoint: PathBuf,
    /// エポックごとの平均損失
    pub epoch_losses: Vec<f64>,
}

fn progress_bar(num_batches: usize) -> Result<ProgressBar> {
    let bar = ProgressBar::new(num_batches as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} [{elapsed_precise}]")
            .context("Invalid progress bar template")?
            .progress_chars("=> "),
    );
    Ok(bar)
}

/// AdamW設定（weight decay 0、epsilon 1e-6、勾配ノルムのクリッピングは任意）
pub fn optimizer_config(training: &TrainingSettings) -> AdamWConfig {
    let optim_config = AdamWConfig::new().with_weight_decay(0.0).with_epsilon(1e-6);
    match training.grad_clip_norm {
        Some(norm) => optim_config.with_grad_clipping(Some(GradientClippingConfig::Norm(norm as f32))),
        None => optim_config,
    }
}

/// モデル学習を実行
///
/// # 引数
/// - `config`: アプリケーション設定（ラベル体系・学習パラメータ・出力先）
/// - `model_config`: モデル構成（`config.vit_config()` が通常値）
/// - `labels`: 画像パス → ラベル値
/// - `init`: 事前学習済み重みを使うかどうか
///
/// # 戻り値
/// 最終エポックのチェックポイントとエポックごとの平均損失
pub fn train_model<B: AutodiffBackend>(
    config: &AppConfig,
    model_config: &ViTConfig,
    labels: &LabelMap,
    init: &ModelInit,
    device: &B::Device,
) -> Result<TrainingOutcome> {
    config.validate()?;
    let training = &config.training;

    let dataset = SpamDataset::new(
        labels,
        Split::Train,
        training.train_ratio,
        config.labels.label_offset,
    )?;
    dataset.validate_labels(model_config.num_labels)?;

    let num_samples = dataset.len();
    let num_batches = num_samples.div_ceil(training.batch_size);
    tracing::info!("学習データ: {} 件 ({} バッチ/エポック)", num_samples, num_batches);
    for (label, count) in dataset.label_counts() {
        tracing::debug!("  クラス {}: {} 件", label, count);
    }
    if num_samples == 0 {
        tracing::warn!("学習データが0件です。損失 0.0 としてチェックポイントを保存します");
    }

    let mut model = build_model::<B>(model_config, init, device)?;

    let mut optim = optimizer_config(training).init();

    let batcher = SpamBatcher::<B>::new(device.clone(), model_config.image_size);
    let loader = DataLoaderBuilder::new(batcher)
        .batch_size(training.batch_size)
        .shuffle(training.seed)
        .num_workers(training.num_workers.max(1))
        .build(dataset);

    let checkpoint_dir = Path::new(&config.output.checkpoint_dir);
    let mut epoch_losses = Vec::with_capacity(training.num_epochs);
    let mut final_checkpoint = None;

    for epoch in 0..training.num_epochs {
        let bar = progress_bar(num_batches)?;
        bar.set_message(format!("Epoch : {}", epoch));
        let mut tracker = LossTracker::new();

        for batch in loader.iter() {
            let batch = batch?;
            let output = model.forward_classification(batch.images, batch.targets);
            let loss_value: f64 = output.loss.clone().into_scalar().elem();

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(training.learning_rate, model, grads);

            tracker.push(loss_value);
            bar.set_message(format!("Epoch : {} loss={}", epoch, tracker.mean()));
            bar.inc(1);
        }
        bar.finish();

        let mean_loss = tracker.mean();
        let metadata = CheckpointMetadata::new(
            config.labels.class_names.clone(),
            config.labels.label_offset,
            model_config.clone(),
            init.model_id().map(str::to_string),
            epoch,
            mean_loss,
        );
        let path = save_checkpoint(checkpoint_dir, &model, &metadata)
            .with_context(|| format!("エポック {} のチェックポイント保存に失敗しました", epoch))?;
        tracing::info!(
            "エポック {}: 平均損失 {} ({} バッチ) -> {}",
            epoch,
            mean_loss,
            tracker.len(),
            path.display()
        );

        epoch_losses.push(mean_loss);
        final_checkpoint = Some(path);
    }

    let final_checkpoint = final_checkpoint.context("num_epochs must be at least 1")?;
    Ok(TrainingOutcome {
        final_checkpoint,
        epoch_losses,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ml::tiny_test_config;
    use burn::backend::{Autodiff, NdArray};
    use image::RgbImage;
    use rand::Rng;
    use tempfile::{tempdir, TempDir};

    type TestBackend = Autodiff<NdArray>;

    /// ランダムな16x16画像とラベル表を作成
    pub(crate) fn write_fixture(dir: &Path, per_class: usize, num_classes: usize) -> LabelMap {
        let mut rng = rand::thread_rng();
        let mut labels = LabelMap::new();
        for class in 0..num_classes {
            for i in 0..per_class {
                let img = RgbImage::from_fn(16, 16, |_, _| image::Rgb([rng.gen(), rng.gen(), rng.gen()]));
                let path = dir.join(format!("img_{}_{}.png", class, i));
                img.save(&path).unwrap();
                labels.insert(path.to_string_lossy().to_string(), class as i64);
            }
        }
        labels
    }

    pub(crate) fn test_config(dir: &TempDir, num_classes: usize, num_epochs: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.labels.num_labels = num_classes;
        config.labels.class_names = (0..num_classes).map(|i| format!("class_{}", i)).collect();
        config.training.num_epochs = num_epochs;
        config.training.batch_size = 2;
        config.training.num_workers = 1;
        config.training.train_ratio = 0.5;
        config.training.learning_rate = 1e-3;
        config.model.image_size = 16;
        config.output.checkpoint_dir = dir.path().to_string_lossy().to_string();
        config.output.report_path = dir.path().join("report.txt").to_string_lossy().to_string();
        config
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.41234), 0.412);
        assert_eq!(round3(0.4126), 0.413);
        assert_eq!(round3(2.0), 2.0);
    }

    #[test]
    fn test_loss_tracker_rounds_twice() {
        let mut tracker = LossTracker::new();
        assert_eq!(tracker.mean(), 0.0);

        tracker.push(0.1234);
        tracker.push(0.2);
        tracker.push(0.3004);
        // (0.123 + 0.2 + 0.3) / 3 = 0.20766.. -> 0.208
        assert_eq!(tracker.mean(), 0.208);
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_train_writes_checkpoint_per_epoch() {
        let dir = tempdir().unwrap();
        let labels = write_fixture(dir.path(), 4, 2);
        let config = test_config(&dir, 2, 2);

        let outcome = train_model::<TestBackend>(
            &config,
            &tiny_test_config(2),
            &labels,
            &ModelInit::Scratch,
            &Default::default(),
        )
        .unwrap();

        assert_eq!(outcome.epoch_losses.len(), 2);
        assert!(outcome.epoch_losses.iter().all(|l| l.is_finite() && *l > 0.0));

        let name = outcome.final_checkpoint.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("vit_epochs_1_loss_"), "{name}");
        assert!(outcome.final_checkpoint.join("model.mpk").exists());

        let first = crate::model::checkpoint_name(0, outcome.epoch_losses[0]);
        assert!(dir.path().join(first).join("metadata.json").exists());
    }

    #[test]
    fn test_optimizer_config() {
        let mut settings = TrainingSettings::default();
        let json: serde_json::Value = serde_json::from_str(&optimizer_config(&settings).to_string()).unwrap();
        assert_eq!(json["weight_decay"].as_f64(), Some(0.0));
        assert!((json["epsilon"].as_f64().unwrap() - 1e-6).abs() < 1e-9);
        assert!(json["grad_clipping"].is_null());

        settings.grad_clip_norm = Some(5.0);
        let json: serde_json::Value = serde_json::from_str(&optimizer_config(&settings).to_string()).unwrap();
        assert_eq!(json["grad_clipping"]["Norm"].as_f64(), Some(5.0));
    }

    #[test]
    fn test_train_with_grad_clipping() {
        let dir = tempdir().unwrap();
        let labels = write_fixture(dir.path(), 4, 2);
        let mut config = test_config(&dir, 2, 2);
        config.training.grad_clip_norm = Some(5.0);

        let outcome = train_model::<TestBackend>(
            &config,
            &tiny_test_config(2),
            &labels,
            &ModelInit::Scratch,
            &Default::default(),
        )
        .unwrap();

        assert_eq!(outcome.epoch_losses.len(), 2);
        assert!(outcome.epoch_losses.iter().all(|l| l.is_finite() && *l > 0.0));
        for (epoch, loss) in outcome.epoch_losses.iter().enumerate() {
            let checkpoint = dir.path().join(crate::model::checkpoint_name(epoch, *loss));
            assert!(checkpoint.join("model.mpk").exists());
            assert!(checkpoint.join("metadata.json").exists());
        }
    }

    #[test]
    fn test_empty_training_split() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, 2, 1);

        let outcome = train_model::<TestBackend>(
            &config,
            &tiny_test_config(2),
            &LabelMap::new(),
            &ModelInit::Scratch,
            &Default::default(),
        )
        .unwrap();

        assert_eq!(outcome.epoch_losses, vec![0.0]);
        assert_eq!(outcome.final_checkpoint, dir.path().join("vit_epochs_0_loss_0.0.pt"));
    }

    #[test]
    fn test_missing_image_fails_run() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, 2, 1);
        let labels: LabelMap = [
            (dir.path().join("missing_a.png").to_string_lossy().to_string(), 0),
            (dir.path().join("missing_b.png").to_string_lossy().to_string(), 0),
        ]
        .into_iter()
        .collect();

        let result = train_model::<TestBackend>(
            &config,
            &tiny_test_config(2),
            &labels,
            &ModelInit::Scratch,
            &Default::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_label_out_of_range() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, 2, 1);
        let labels: LabelMap = [("a.png", 5), ("b.png", 5)].into_iter().collect();

        let result = train_model::<TestBackend>(
            &config,
            &tiny_test_config(2),
            &labels,
            &ModelInit::Scratch,
            &Default::default(),
        );
        assert!(result.is_err());
    }
}
