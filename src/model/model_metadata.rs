//! チェックポイントのメタデータ定義
//!
//! チェックポイントディレクトリ内の `metadata.json` として保存され、
//! 評価時にモデル構成とクラス名を復元するために使用します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::ViTConfig;
use crate::model::config::ConfigError;

/// チェックポイントメタデータ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// クラス名（インデックス = クラスID）
    pub class_names: Vec<String>,

    /// 学習時に使用したラベル値の開始番号
    pub label_offset: i64,

    /// モデル構成（分類クラス数・入力サイズを含む）
    pub model: ViTConfig,

    /// 初期化に使用した事前学習済みモデル（スクラッチ学習の場合は None）
    #[serde(default)]
    pub pretrained_model: Option<String>,

    /// エポック番号（0始まり）
    pub epoch: usize,

    /// エポック平均損失（小数第3位で丸め済み）
    pub mean_loss: f64,

    /// 保存時刻（RFC3339形式）
    pub trained_at: String,
}

impl CheckpointMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_names: Vec<String>,
        label_offset: i64,
        model: ViTConfig,
        pretrained_model: Option<String>,
        epoch: usize,
        mean_loss: f64,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_names,
            label_offset,
            model,
            pretrained_model,
            epoch,
            mean_loss,
            trained_at,
        }
    }

    /// 分類ヘッドの出力次元
    pub fn num_labels(&self) -> usize {
        self.model.num_labels
    }

    /// クラス名の数と分類ヘッドの出力次元が一致するか検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.class_names.len() != self.num_labels() {
            return Err(ConfigError::ClassCountMismatch {
                names: self.class_names.len(),
                num_labels: self.num_labels(),
            });
        }
        Ok(())
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
