//! 機械学習モデルの共通定義
//!
//! スパム画像分類用のViT (Vision Transformer) と画像前処理を提供します。
//! エンコーダ本体はBurnの `TransformerEncoder` をそのまま使用し、
//! パラメータ名はHugging Faceの `ViTModel` と対応付けられる構成にしています。

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        transformer::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderInput},
        Dropout, DropoutConfig, Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig,
    },
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::{imageops::FilterType, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 事前学習済みモデルの識別子
pub const PRETRAINED_MODEL_ID: &str = "google/vit-base-patch16-224-in21k";

/// 特徴抽出器の正規化パラメータ（全チャネル共通）
pub const IMAGE_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const IMAGE_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// ViT設定
///
/// デフォルト値は `vit-base-patch16-224-in21k` と同一です。
#[derive(Config, Debug)]
pub struct ViTConfig {
    /// 分類クラス数（分類ヘッドの出力次元）
    pub num_labels: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
    #[config(default = 16)]
    pub patch_size: usize,
    #[config(default = 3)]
    pub num_channels: usize,
    #[config(default = 768)]
    pub hidden_size: usize,
    #[config(default = 12)]
    pub num_hidden_layers: usize,
    #[config(default = 12)]
    pub num_attention_heads: usize,
    #[config(default = 3072)]
    pub intermediate_size: usize,
    #[config(default = 0.0)]
    pub hidden_dropout_prob: f64,
    /// 最終 `layernorm` のイプシロン
    ///
    /// エンコーダ各層の `norm_1` / `norm_2` には適用されず、
    /// `TransformerEncoder` の既定値 (1e-5) のままです。
    #[config(default = 1e-12)]
    pub layer_norm_eps: f64,
}

impl ViTConfig {
    /// パッチ数 (image_size / patch_size)^2
    pub fn num_patches(&self) -> usize {
        let per_side = self.image_size / self.patch_size;
        per_side * per_side
    }

    /// モデルを初期化（分類ヘッド込み）
    pub fn init<B: Backend>(&self, device: &B::Device) -> ViTForImageClassification<B> {
        ViTForImageClassification {
            vit: self.init_backbone(device),
            classifier: LinearConfig::new(self.hidden_size, self.num_labels).init(device),
        }
    }

    /// バックボーンのみ初期化
    ///
    /// 事前学習済み重みはこの構造に対して読み込みます。
    pub fn init_backbone<B: Backend>(&self, device: &B::Device) -> ViTModel<B> {
        assert!(
            self.patch_size > 0 && self.image_size % self.patch_size == 0,
            "image_size ({}) must be a multiple of patch_size ({})",
            self.image_size,
            self.patch_size
        );

        let initializer = Initializer::Normal { mean: 0.0, std: 0.02 };
        let num_positions = self.num_patches() + 1;

        tracing::debug!(
            "[Model] 入力: {}x{}, パッチ: {}x{} ({}個), hidden: {}, layers: {}, heads: {}",
            self.image_size,
            self.image_size,
            self.patch_size,
            self.patch_size,
            self.num_patches(),
            self.hidden_size,
            self.num_hidden_layers,
            self.num_attention_heads
        );

        ViTModel {
            embeddings: ViTEmbeddings {
                cls_token: initializer.init([1, 1, self.hidden_size], device),
                position_embeddings: initializer.init([1, num_positions, self.hidden_size], device),
                patch_embeddings: PatchEmbeddings {
                    projection: Conv2dConfig::new(
                        [self.num_channels, self.hidden_size],
                        [self.patch_size, self.patch_size],
                    )
                    .with_stride([self.patch_size, self.patch_size])
                    .init(device),
                },
                dropout: DropoutConfig::new(self.hidden_dropout_prob).init(),
            },
            encoder: TransformerEncoderConfig::new(
                self.hidden_size,
                self.intermediate_size,
                self.num_attention_heads,
                self.num_hidden_layers,
            )
            .with_dropout(self.hidden_dropout_prob)
            .with_norm_first(true)
            .init(device),
            layernorm: LayerNormConfig::new(self.hidden_size)
                .with_epsilon(self.layer_norm_eps)
                .init(device),
        }
    }
}

/// パッチ埋め込み（stride = kernel の畳み込み）
#[derive(Module, Debug)]
pub struct PatchEmbeddings<B: Backend> {
    projection: Conv2d<B>,
}

/// [CLS]トークン + パッチ埋め込み + 位置埋め込み
#[derive(Module, Debug)]
pub struct ViTEmbeddings<B: Backend> {
    cls_token: Param<Tensor<B, 3>>,
    position_embeddings: Param<Tensor<B, 3>>,
    patch_embeddings: PatchEmbeddings<B>,
    dropout: Dropout,
}

impl<B: Backend> ViTEmbeddings<B> {
    /// [batch, C, H, W] -> [batch, num_patches + 1, hidden]
    pub fn forward(&self, pixel_values: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch_size, _, _, _] = pixel_values.dims();

        // [batch, hidden, h', w'] -> [batch, h' * w', hidden]
        let patches = self.patch_embeddings.projection.forward(pixel_values);
        let patches = patches.flatten::<3>(2, 3).swap_dims(1, 2);

        let cls = self.cls_token.val().repeat_dim(0, batch_size);
        let x = Tensor::cat(vec![cls, patches], 1);
        let x = x + self.position_embeddings.val();

        self.dropout.forward(x)
    }
}

/// ViTバックボーン
#[derive(Module, Debug)]
pub struct ViTModel<B: Backend> {
    embeddings: ViTEmbeddings<B>,
    encoder: TransformerEncoder<B>,
    layernorm: LayerNorm<B>,
}

impl<B: Backend> ViTModel<B> {
    /// 最終層の隠れ状態 [batch, num_patches + 1, hidden]
    pub fn forward(&self, pixel_values: Tensor<B, 4>) -> Tensor<B, 3> {
        let x = self.embeddings.forward(pixel_values);
        let x = self.encoder.forward(TransformerEncoderInput::new(x));
        self.layernorm.forward(x)
    }
}

/// 画像分類用ViT
///
/// # アーキテクチャ
/// - パッチ埋め込み + [CLS] + 位置埋め込み
/// - Transformer Encoder (pre-norm) x num_hidden_layers
/// - LayerNorm
/// - [CLS]位置の出力 -> Linear -> num_labels
#[derive(Module, Debug)]
pub struct ViTForImageClassification<B: Backend> {
    vit: ViTModel<B>,
    classifier: Linear<B>,
}

impl<B: Backend> ViTForImageClassification<B> {
    /// 事前学習済みバックボーンに新しい分類ヘッドを付ける
    pub fn from_backbone(vit: ViTModel<B>, hidden_size: usize, num_labels: usize, device: &B::Device) -> Self {
        Self {
            vit,
            classifier: LinearConfig::new(hidden_size, num_labels).init(device),
        }
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_labels]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let hidden = self.vit.forward(images);
        let [batch_size, _, hidden_size] = hidden.dims();

        let cls = hidden
            .slice([0..batch_size, 0..1, 0..hidden_size])
            .reshape([batch_size, hidden_size]);

        self.classifier.forward(cls)
    }

    /// 予測クラスID [batch_size]
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 1, Int> {
        let [batch_size, _, _, _] = images.dims();
        self.forward(images).argmax(1).reshape([batch_size])
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// 画像の読み込み失敗
#[derive(Debug, Clone, Error)]
#[error("failed to load image {}: {message}", path.display())]
pub struct PreprocessError {
    pub path: PathBuf,
    pub message: String,
}

/// RGB画像をモデル入力に変換
///
/// `image_size` x `image_size` にバイリニア補間でリサイズし、
/// 1/255 でスケーリングした後 mean/std で正規化します。
///
/// # 戻り値
/// - 正規化されたRGB画像データ (C, H, W) の順で平坦化
pub fn normalize_image(img: &RgbImage, image_size: usize) -> Vec<f32> {
    let size = image_size as u32;
    let resized = if img.dimensions() == (size, size) {
        img.clone()
    } else {
        image::imageops::resize(img, size, size, FilterType::Triangle)
    };

    let mut data = Vec::with_capacity(3 * image_size * image_size);
    for channel in 0..3 {
        for y in 0..size {
            for x in 0..size {
                let value = resized.get_pixel(x, y)[channel] as f32 / 255.0;
                data.push((value - IMAGE_MEAN[channel]) / IMAGE_STD[channel]);
            }
        }
    }
    data
}

/// 画像を読み込んで正規化
pub fn load_and_normalize_image(path: &Path, image_size: usize) -> Result<Vec<f32>, PreprocessError> {
    let img = image::open(path).map_err(|e| PreprocessError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(normalize_image(&img.to_rgb8(), image_size))
}

/// テスト用の小さなViT (16x16入力, 8x8パッチ)
#[cfg(test)]
pub(crate) fn tiny_test_config(num_labels: usize) -> ViTConfig {
    ViTConfig::new(num_labels)
        .with_image_size(16)
        .with_patch_size(8)
        .with_hidden_size(8)
        .with_num_hidden_layers(1)
        .with_num_attention_heads(2)
        .with_intermediate_size(16)
}
