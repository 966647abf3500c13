//! ラベル別バランス分割とデータセット / バッチャー

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Int, Tensor},
};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::labels::LabelMap;
use crate::ml::{load_and_normalize_image, PreprocessError};

/// 学習用 / 評価用の区別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Test => write!(f, "test"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SplitError {
    #[error("train ratio must be within (0, 1): {0}")]
    InvalidRatio(f64),
    #[error("label {label} of '{path}' is below the label offset {offset}")]
    LabelBelowOffset { path: String, label: i64, offset: i64 },
    #[error("label {label} of '{}' is out of range for {num_labels} classes", path.display())]
    LabelOutOfRange {
        path: PathBuf,
        label: usize,
        num_labels: usize,
    },
}

/// データセットアイテム（画像パスとゼロ始まりのクラスID）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpamItem {
    pub path: PathBuf,
    pub label: usize,
}

/// ラベルごとに分割点を決めて学習用 / 評価用のアイテム列を作る
///
/// - ラベル表の走査順でラベルごとにグループ化（グループ内の順序は維持）
/// - 長さ L のグループは `floor(L * train_ratio)` を境に前半を学習用、後半を評価用とする
/// - クラスIDは `label - label_offset`
/// - 出力はグループの連結（初出順）。シャッフルはバッチ読み込み時に行う
pub fn split_dataset_with_balancing(
    labels: &LabelMap,
    split: Split,
    train_ratio: f64,
    label_offset: i64,
) -> Result<Vec<SpamItem>, SplitError> {
    if !(train_ratio > 0.0 && train_ratio < 1.0) {
        return Err(SplitError::InvalidRatio(train_ratio));
    }

    let mut groups: IndexMap<i64, Vec<&str>> = IndexMap::new();
    for (path, label) in labels.iter() {
        groups.entry(label).or_default().push(path);
    }

    let mut items = Vec::with_capacity(labels.len());
    for (&label, paths) in &groups {
        let class_id = label - label_offset;
        if class_id < 0 {
            return Err(SplitError::LabelBelowOffset {
                path: paths[0].to_string(),
                label,
                offset: label_offset,
            });
        }

        let split_index = (paths.len() as f64 * train_ratio) as usize;
        let selected = match split {
            Split::Train => &paths[..split_index],
            Split::Test => &paths[split_index..],
        };

        items.extend(selected.iter().map(|path| SpamItem {
            path: PathBuf::from(path),
            label: class_id as usize,
        }));
    }

    Ok(items)
}

/// スパム画像データセット（パスのリストのみ保持）
#[derive(Debug, Clone, Default)]
pub struct SpamDataset {
    items: Vec<SpamItem>,
}

impl SpamDataset {
    /// ラベル表から学習用または評価用のデータセットを作成
    pub fn new(
        labels: &LabelMap,
        split: Split,
        train_ratio: f64,
        label_offset: i64,
    ) -> Result<Self, SplitError> {
        let items = split_dataset_with_balancing(labels, split, train_ratio, label_offset)?;
        Ok(Self { items })
    }

    pub fn from_items(items: Vec<SpamItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[SpamItem] {
        &self.items
    }

    /// 全アイテムのクラスIDが分類ヘッドの出力範囲内か検証
    pub fn validate_labels(&self, num_labels: usize) -> Result<(), SplitError> {
        match self.items.iter().find(|item| item.label >= num_labels) {
            Some(item) => Err(SplitError::LabelOutOfRange {
                path: item.path.clone(),
                label: item.label,
                num_labels,
            }),
            None => Ok(()),
        }
    }

    /// クラスIDごとの件数
    pub fn label_counts(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.label).or_insert(0) += 1;
        }
        counts
    }
}

impl Dataset<SpamItem> for SpamDataset {
    fn get(&self, index: usize) -> Option<SpamItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct SpamBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// バッチャー
///
/// 画像はバッチ作成時にディスクから読み込みます。
/// 1枚でも読めなければバッチ全体がエラーになります。
#[derive(Clone)]
pub struct SpamBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> SpamBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

impl<B: Backend> Batcher<B, SpamItem, Result<SpamBatch<B>, PreprocessError>> for SpamBatcher<B> {
    fn batch(&self, items: Vec<SpamItem>, _device: &B::Device) -> Result<SpamBatch<B>, PreprocessError> {
        let batch_size = items.len();
        let image_size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * image_size * image_size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            let image_data = load_and_normalize_image(&item.path, image_size)?;
            all_pixels.extend_from_slice(&image_data);
            targets_vec.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, image_size, image_size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        Ok(SpamBatch { images, targets })
    }
}
