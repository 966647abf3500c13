//! 学習・評価パイプライン
//!
//! 設定のデバイス種別に応じてバックエンドを選び、学習と評価を実行します。

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use std::path::Path;

use crate::backend;
use crate::labels::{load_or_empty, JsonLabelFile, LabelMap};
use crate::ml::{evaluate_model, train_model, EvaluationOutcome, ModelInit, TrainingOutcome};
use crate::model::{AppConfig, DeviceType};

/// ラベルファイルを読み込む（存在しない場合は空）
pub fn load_labels(config: &AppConfig) -> Result<LabelMap> {
    let source = JsonLabelFile::new(&config.labels.label_path);
    let labels = load_or_empty(&source)
        .with_context(|| format!("ラベルファイルの読み込みに失敗しました: {}", config.labels.label_path))?;
    tracing::info!("ラベル: {} 件 ({})", labels.len(), config.labels.label_path);
    Ok(labels)
}

/// 事前学習済みモデルIDが空ならスクラッチ学習
pub fn model_init(config: &AppConfig) -> ModelInit {
    let id = config.model.pretrained_model.trim();
    if id.is_empty() {
        ModelInit::Scratch
    } else {
        ModelInit::Pretrained(id.to_string())
    }
}

fn train_on<B: AutodiffBackend>(config: &AppConfig, labels: &LabelMap, device: &B::Device) -> Result<TrainingOutcome> {
    train_model::<B>(config, &config.vit_config(), labels, &model_init(config), device)
}

/// 設定に従って学習を実行
pub fn run_train(config: &AppConfig, labels: &LabelMap) -> Result<TrainingOutcome> {
    config.validate()?;
    match backend::resolve_device_type(config.device_type) {
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => train_on::<backend::GpuTrainingBackend>(config, labels, &backend::gpu_device()),
        _ => train_on::<backend::CpuTrainingBackend>(config, labels, &backend::cpu_device()),
    }
}

/// 設定に従ってチェックポイントを評価
pub fn run_evaluate(config: &AppConfig, labels: &LabelMap, checkpoint: &Path) -> Result<EvaluationOutcome> {
    config.validate()?;
    match backend::resolve_device_type(config.device_type) {
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => evaluate_model::<backend::GpuBackend>(config, labels, checkpoint, &backend::gpu_device()),
        _ => evaluate_model::<backend::CpuBackend>(config, labels, checkpoint, &backend::cpu_device()),
    }
}

/// 学習後、最終チェックポイントを評価
pub fn run_all(config: &AppConfig) -> Result<(TrainingOutcome, EvaluationOutcome)> {
    let labels = load_labels(config)?;
    let training = run_train(config, &labels)?;
    let evaluation = run_evaluate(config, &labels, &training.final_checkpoint)?;
    Ok((training, evaluation))
}
