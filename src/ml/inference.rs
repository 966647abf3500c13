//! モデル推論機能

use anyhow::Result;
use burn::tensor::{backend::Backend, Tensor};
use std::path::Path;

use crate::ml::{load_and_normalize_image, ViTForImageClassification};
use crate::model::{load_checkpoint, CheckpointMetadata};

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: ViTForImageClassification<B>,
    metadata: CheckpointMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// チェックポイントを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(checkpoint_dir: P, device: &B::Device) -> Result<Self> {
        let (metadata, model) = load_checkpoint::<B>(checkpoint_dir.as_ref(), device)?;

        tracing::info!(
            "チェックポイントを読み込みました: {} (エポック {}, 損失 {})",
            checkpoint_dir.as_ref().display(),
            metadata.epoch,
            metadata.mean_loss
        );

        Ok(Self {
            model,
            metadata,
            device: device.clone(),
        })
    }

    pub fn metadata(&self) -> &CheckpointMetadata {
        &self.metadata
    }

    pub fn class_names(&self) -> &[String] {
        &self.metadata.class_names
    }

    /// 入力画像サイズ（正方形）
    pub fn image_size(&self) -> usize {
        self.metadata.model.image_size
    }

    /// 正規化済みバッチ [batch_size, 3, size, size] のクラスIDを予測
    pub fn predict_batch(&self, images: Tensor<B, 4>) -> Result<Vec<usize>> {
        let predicted = self.model.predict(images);
        Ok(predicted
            .into_data()
            .iter::<i64>()
            .map(|class_idx| class_idx as usize)
            .collect())
    }

    /// 単一画像を分類してクラス名を返す
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<String> {
        let size = self.image_size();
        let image_data = load_and_normalize_image(image_path.as_ref(), size)?;

        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device).reshape([1, 3, size, size]);

        let class_idx = self
            .predict_batch(tensor)?
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("推論結果が空です"))?;

        self.class_names()
            .get(class_idx)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", class_idx))
    }
}
