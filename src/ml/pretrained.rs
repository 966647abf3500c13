//! 事前学習済み重みの取得と読み込み
//!
//! Hugging Face Hub から `model.safetensors` を取得し、
//! パラメータ名をこのクレートのモジュール構造に合わせて読み込みます。
//! 分類ヘッドは常に新規に初期化されます。

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::safetensors::{AdapterType, LoadArgs, SafetensorsFileRecorder};
use std::path::{Path, PathBuf};

use crate::ml::{ViTConfig, ViTForImageClassification, ViTModel, ViTModelRecord};

const WEIGHTS_FILE: &str = "model.safetensors";

/// Hugging Face の `ViTModel` のパラメータ名 → バックボーンのフィールド名
///
/// 上から順に適用されます。
pub const VIT_KEY_REMAPS: [(&str, &str); 7] = [
    (r"^vit\.(.+)$", "$1"),
    (
        r"^encoder\.layer\.([0-9]+)\.attention\.attention\.(query|key|value)\.(.+)$",
        "encoder.layers.$1.mha.$2.$3",
    ),
    (
        r"^encoder\.layer\.([0-9]+)\.attention\.output\.dense\.(.+)$",
        "encoder.layers.$1.mha.output.$2",
    ),
    (
        r"^encoder\.layer\.([0-9]+)\.intermediate\.dense\.(.+)$",
        "encoder.layers.$1.pwff.linear_inner.$2",
    ),
    (
        r"^encoder\.layer\.([0-9]+)\.output\.dense\.(.+)$",
        "encoder.layers.$1.pwff.linear_outer.$2",
    ),
    (
        r"^encoder\.layer\.([0-9]+)\.layernorm_before\.(.+)$",
        "encoder.layers.$1.norm_1.$2",
    ),
    (
        r"^encoder\.layer\.([0-9]+)\.layernorm_after\.(.+)$",
        "encoder.layers.$1.norm_2.$2",
    ),
];

/// モデルの初期化方法
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelInit {
    /// Hub上のモデルIDからバックボーンを読み込む
    Pretrained(String),
    /// 全パラメータをランダム初期化
    Scratch,
}

impl ModelInit {
    /// 事前学習済みモデルのID（スクラッチの場合は None）
    pub fn model_id(&self) -> Option<&str> {
        match self {
            ModelInit::Pretrained(id) => Some(id),
            ModelInit::Scratch => None,
        }
    }
}

/// `model.safetensors` をダウンロード（キャッシュ済みならそのパスを返す）
pub fn fetch_pretrained_weights(model_id: &str) -> Result<PathBuf> {
    tracing::info!("事前学習済みモデルを取得しています: {}", model_id);

    let api = hf_hub::api::sync::Api::new().context("Failed to initialize Hugging Face Hub client")?;
    let path = api
        .model(model_id.to_string())
        .get(WEIGHTS_FILE)
        .with_context(|| format!("Failed to download {} from {}", WEIGHTS_FILE, model_id))?;

    tracing::debug!("重みファイル: {}", path.display());
    Ok(path)
}

/// safetensorsファイルからバックボーンを読み込む
pub fn load_pretrained_backbone<B: Backend>(
    config: &ViTConfig,
    weights: &Path,
    device: &B::Device,
) -> Result<ViTModel<B>> {
    let mut args = LoadArgs::new(weights.to_path_buf()).with_adapter_type(AdapterType::PyTorch);
    for (pattern, replacement) in VIT_KEY_REMAPS {
        args = args.with_key_remap(pattern, replacement);
    }

    let record: ViTModelRecord<B> = SafetensorsFileRecorder::<FullPrecisionSettings>::default()
        .load(args, device)
        .map_err(|e| anyhow::anyhow!("事前学習済み重みの読み込みエラー ({}): {:?}", weights.display(), e))?;

    Ok(config.init_backbone::<B>(device).load_record(record))
}

/// 初期化方法に従って分類モデルを構築
pub fn build_model<B: Backend>(
    config: &ViTConfig,
    init: &ModelInit,
    device: &B::Device,
) -> Result<ViTForImageClassification<B>> {
    match init {
        ModelInit::Pretrained(model_id) => {
            let weights = fetch_pretrained_weights(model_id)?;
            let backbone = load_pretrained_backbone::<B>(config, &weights, device)?;
            tracing::info!(
                "バックボーンを読み込みました。分類ヘッド ({} クラス) は新規に初期化します",
                config.num_labels
            );
            Ok(ViTForImageClassification::from_backbone(
                backbone,
                config.hidden_size,
                config.num_labels,
                device,
            ))
        }
        ModelInit::Scratch => {
            tracing::warn!("事前学習済み重みを使用せず、ランダム初期化で学習します");
            Ok(config.init::<B>(device))
        }
    }
}
