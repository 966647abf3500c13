//! アプリケーション設定管理モジュール
//!
//! 計算デバイス・ラベル体系・学習パラメータ・出力先をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ml::{ViTConfig, PRETRAINED_MODEL_ID};

/// 設定値の矛盾
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("class name count ({names}) does not match num_labels ({num_labels})")]
    ClassCountMismatch { names: usize, num_labels: usize },
    #[error("num_labels must be at least 1")]
    NoLabels,
    #[error("label_offset must be 0 or 1: {0}")]
    InvalidLabelOffset(i64),
    #[error("train_ratio must be within (0, 1): {0}")]
    InvalidTrainRatio(f64),
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,
    #[error("grad_clip_norm must be positive: {0}")]
    InvalidGradClipNorm(f64),
    #[error("image_size {image_size} is not a multiple of patch size {patch_size}")]
    ImageSizeNotDivisible { image_size: usize, patch_size: usize },
    #[error("checkpoint classes {checkpoint:?} differ from configured classes {configured:?}")]
    CheckpointClassMismatch {
        checkpoint: Vec<String>,
        configured: Vec<String>,
    },
}

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// ラベル体系
///
/// `label.json` のラベル値から `label_offset` を引いた値が `class_names` のインデックスになります。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LabelSettings {
    /// ラベルファイルのパス
    pub label_path: String,
    /// ラベル値の開始番号（0 または 1）
    pub label_offset: i64,
    /// 分類クラス数（分類ヘッドの出力次元）
    pub num_labels: usize,
    /// レポートに使用するクラス名
    pub class_names: Vec<String>,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            label_path: "label.json".to_string(),
            label_offset: 0,
            num_labels: 4,
            class_names: vec![
                "non-spam".to_string(),
                "advertisement".to_string(),
                "default_spam".to_string(),
                "misc".to_string(),
            ],
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// 事前学習済みモデルの識別子（Hugging Face Hub）
    pub pretrained_model: String,
    /// 入力画像サイズ（正方形、パッチサイズ16の倍数）
    pub image_size: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            pretrained_model: PRETRAINED_MODEL_ID.to_string(),
            image_size: 224,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// シャッフル用シード
    pub seed: u64,
    /// ラベルごとの学習データの割合
    pub train_ratio: f64,
    /// 勾配ノルムの上限（None でクリッピングなし）
    pub grad_clip_norm: Option<f64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 5,
            batch_size: 16,
            num_workers: 1,
            learning_rate: 2e-5,
            seed: 42,
            train_ratio: 0.7,
            grad_clip_norm: None,
        }
    }
}

/// 出力先設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    /// チェックポイントの保存先ディレクトリ
    pub checkpoint_dir: String,
    /// 評価レポートの出力先
    pub report_path: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            checkpoint_dir: ".".to_string(),
            report_path: "report.txt".to_string(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// ラベル体系
    pub labels: LabelSettings,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// 出力先設定
    pub output: OutputSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("spam_vit.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む。ファイルが存在しない場合はデフォルト設定を返す
    ///
    /// 内容が壊れている場合はエラーになります。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path).map_err(|e| {
                anyhow::anyhow!("設定ファイルの読み込みに失敗しました ({}): {}", path.display(), e)
            })?;
            tracing::info!("設定ファイルを読み込みました: {}", path.display());
            Ok(config)
        } else {
            tracing::info!(
                "設定ファイルが存在しません ({})。デフォルト設定を使用します",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定値の整合性を検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.labels.num_labels == 0 {
            return Err(ConfigError::NoLabels);
        }
        if self.labels.class_names.len() != self.labels.num_labels {
            return Err(ConfigError::ClassCountMismatch {
                names: self.labels.class_names.len(),
                num_labels: self.labels.num_labels,
            });
        }
        if !matches!(self.labels.label_offset, 0 | 1) {
            return Err(ConfigError::InvalidLabelOffset(self.labels.label_offset));
        }
        let ratio = self.training.train_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(ConfigError::InvalidTrainRatio(ratio));
        }
        if self.training.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if let Some(norm) = self.training.grad_clip_norm {
            if !(norm > 0.0) {
                return Err(ConfigError::InvalidGradClipNorm(norm));
            }
        }
        let patch_size = ViTConfig::new(self.labels.num_labels).patch_size;
        if self.model.image_size == 0 || self.model.image_size % patch_size != 0 {
            return Err(ConfigError::ImageSizeNotDivisible {
                image_size: self.model.image_size,
                patch_size,
            });
        }
        Ok(())
    }

    /// チェックポイントのクラス名が設定と一致するか検証
    pub fn ensure_classes_match(&self, checkpoint_classes: &[String]) -> Result<(), ConfigError> {
        if checkpoint_classes != self.labels.class_names.as_slice() {
            return Err(ConfigError::CheckpointClassMismatch {
                checkpoint: checkpoint_classes.to_vec(),
                configured: self.labels.class_names.clone(),
            });
        }
        Ok(())
    }

    /// 分類モデルの構成
    pub fn vit_config(&self) -> ViTConfig {
        ViTConfig::new(self.labels.num_labels).with_image_size(self.model.image_size)
    }

    /// 設定情報をログに出力
    pub fn log_summary(&self) {
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!(
            "ラベル: {} ({} クラス, offset={}) {}",
            self.labels.label_path,
            self.labels.num_labels,
            self.labels.label_offset,
            self.labels.class_names.join(", ")
        );
        tracing::info!(
            "モデル: {} (入力サイズ: {}x{})",
            self.model.pretrained_model,
            self.model.image_size,
            self.model.image_size
        );
        tracing::info!(
            "エポック数: {}, バッチサイズ: {}, 学習率: {}, 分割比: {}, 勾配クリップ: {:?}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.train_ratio,
            self.training.grad_clip_norm
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.labels.num_labels, 4);
        assert_eq!(config.labels.label_offset, 0);
        assert_eq!(config.training.num_epochs, 5);
        assert_eq!(config.training.batch_size, 16);
        assert_eq!(config.training.learning_rate, 2e-5);
        assert_eq!(config.training.grad_clip_norm, None);
        assert_eq!(config.model.pretrained_model, "google/vit-base-patch16-224-in21k");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "labels": { "label_offset": 1, "num_labels": 3, "class_names": ["a", "b", "c"] },
            "training": { "grad_clip_norm": 5.0 }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.labels.label_offset, 1);
        assert_eq!(config.labels.label_path, "label.json");
        assert_eq!(config.training.grad_clip_norm, Some(5.0));
        assert_eq!(config.training.num_epochs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_class_count_mismatch() {
        let mut config = AppConfig::default();
        config.labels.num_labels = 3;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ClassCountMismatch { names: 4, num_labels: 3 })
        );
    }

    #[test]
    fn test_invalid_values() {
        let mut config = AppConfig::default();
        config.training.train_ratio = 1.5;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTrainRatio(1.5)));

        let mut config = AppConfig::default();
        config.model.image_size = 500;
        assert!(matches!(config.validate(), Err(ConfigError::ImageSizeNotDivisible { .. })));

        let mut config = AppConfig::default();
        config.labels.label_offset = 2;
        assert_eq!(config.validate(), Err(ConfigError::InvalidLabelOffset(2)));

        let mut config = AppConfig::default();
        config.training.grad_clip_norm = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ensure_classes_match() {
        let config = AppConfig::default();
        assert!(config.ensure_classes_match(&config.labels.class_names).is_ok());
        assert!(config.ensure_classes_match(&["x".to_string()]).is_err());
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spam_vit.json");

        let config = AppConfig::load_or_default(&path).unwrap();
        assert_eq!(config, AppConfig::default());

        let mut custom = AppConfig::default();
        custom.device_type = DeviceType::Cpu;
        custom.save(&path).unwrap();
        assert_eq!(AppConfig::load_or_default(&path).unwrap().device_type, DeviceType::Cpu);

        fs::write(&path, "{ broken").unwrap();
        assert!(AppConfig::load_or_default(&path).is_err());
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
