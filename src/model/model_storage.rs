//! チェックポイントの永続化
//!
//! 1エポックごとに以下の構成のディレクトリを作成します。
//!
//! ```text
//! vit_epochs_{epoch}_loss_{mean_loss}.pt/
//!   model.mpk       - モデルの重み（f32精度）
//!   metadata.json   - メタデータ（クラス名・モデル構成など）
//! ```

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{DefaultFileRecorder, FullPrecisionSettings},
    tensor::backend::Backend,
};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ml::ViTForImageClassification;
use crate::model::model_metadata::CheckpointMetadata;

/// 重みファイル名（拡張子 .mpk はレコーダーが付与）
pub const MODEL_FILE_STEM: &str = "model";
pub const METADATA_FILE: &str = "metadata.json";

/// 損失値の表記（Pythonの浮動小数点表記と同じく、整数値でも ".0" を付ける）
pub fn format_loss(loss: f64) -> String {
    if loss.is_nan() {
        return "nan".to_string();
    }
    if loss.is_infinite() {
        return if loss > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let text = format!("{loss}");
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

/// チェックポイント名 `vit_epochs_{epoch}_loss_{mean_loss}.pt`
pub fn checkpoint_name(epoch: usize, mean_loss: f64) -> String {
    format!("vit_epochs_{}_loss_{}.pt", epoch, format_loss(mean_loss))
}

/// モデルとメタデータを保存し、チェックポイントのパスを返す
pub fn save_checkpoint<B: Backend>(
    output_dir: &Path,
    model: &ViTForImageClassification<B>,
    metadata: &CheckpointMetadata,
) -> Result<PathBuf> {
    let checkpoint_dir = output_dir.join(checkpoint_name(metadata.epoch, metadata.mean_loss));
    fs::create_dir_all(&checkpoint_dir)
        .context(format!("Failed to create checkpoint directory: {:?}", checkpoint_dir))?;

    // DefaultFileRecorderを使用してf32精度で保存
    model
        .clone()
        .save_file(
            checkpoint_dir.join(MODEL_FILE_STEM),
            &DefaultFileRecorder::<FullPrecisionSettings>::new(),
        )
        .map_err(|e| anyhow::anyhow!("モデルの保存に失敗しました: {:?}", e))?;

    fs::write(checkpoint_dir.join(METADATA_FILE), metadata.to_json_string()?)
        .context(format!("Failed to write metadata: {:?}", checkpoint_dir))?;

    Ok(checkpoint_dir)
}

/// チェックポイントからメタデータを読み込む
pub fn load_metadata(checkpoint_dir: &Path) -> Result<CheckpointMetadata> {
    let path = checkpoint_dir.join(METADATA_FILE);
    let json = fs::read_to_string(&path).context(format!("Failed to read metadata: {:?}", path))?;
    let metadata = CheckpointMetadata::from_json_string(&json)?;
    metadata
        .validate()
        .with_context(|| format!("Inconsistent metadata: {:?}", path))?;
    Ok(metadata)
}

/// メタデータとモデルを共に読み込む
pub fn load_checkpoint<B: Backend>(
    checkpoint_dir: &Path,
    device: &B::Device,
) -> Result<(CheckpointMetadata, ViTForImageClassification<B>)> {
    let metadata = load_metadata(checkpoint_dir)?;

    let model = metadata
        .model
        .init::<B>(device)
        .load_file(
            checkpoint_dir.join(MODEL_FILE_STEM),
            &DefaultFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

    Ok((metadata, model))
}
