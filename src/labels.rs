//! ラベルマッピングの読み込み
//!
//! 画像パス -> ラベル値 の対応表を取得します。
//! `label.json` の値は整数・整数文字列のどちらでも受け付け、ファイル記載順を保持します。

use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// ラベルソースのエラー
///
/// ファイルが存在しない場合と、内容が壊れている場合を区別します。
#[derive(Debug, Error)]
pub enum LabelSourceError {
    #[error("label file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read label file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed label JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("label of '{path}' is not an integer: {value:?}")]
    InvalidLabel { path: String, value: String },
}

/// JSON上のラベル値（整数または整数文字列）
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Int(i64),
    Text(String),
}

/// 画像パス -> ラベル の対応表
///
/// 挿入順（= JSONの記載順）で走査されます。分割処理はこの順序に依存します。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    entries: IndexMap<String, i64>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON文字列からラベル表を生成
    pub fn from_json_str(json: &str) -> Result<Self, LabelSourceError> {
        let raw: IndexMap<String, RawLabel> = serde_json::from_str(json)?;
        let mut entries = IndexMap::with_capacity(raw.len());

        for (path, value) in raw {
            let label = match value {
                RawLabel::Int(label) => label,
                RawLabel::Text(text) => match text.trim().parse::<i64>() {
                    Ok(label) => label,
                    Err(_) => {
                        return Err(LabelSourceError::InvalidLabel { path, value: text });
                    }
                },
            };
            entries.insert(path, label);
        }

        Ok(Self { entries })
    }

    /// ラベルを登録（既存パスの場合は値のみ上書きし、順序は維持）
    pub fn insert(&mut self, path: impl Into<String>, label: i64) -> Option<i64> {
        self.entries.insert(path.into(), label)
    }

    pub fn get(&self, path: &str) -> Option<i64> {
        self.entries.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.entries.iter().map(|(path, label)| (path.as_str(), *label))
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for LabelMap {
    fn from_iter<T: IntoIterator<Item = (S, i64)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (path, label) in iter {
            map.insert(path, label);
        }
        map
    }
}

/// ラベル表の供給元
///
/// JSONファイル以外（外部の画像分類ステップなど）もこのトレイトを実装すれば差し替え可能です。
pub trait LabelSource {
    fn load(&self) -> Result<LabelMap, LabelSourceError>;
}

impl LabelSource for LabelMap {
    fn load(&self) -> Result<LabelMap, LabelSourceError> {
        Ok(self.clone())
    }
}

/// `label.json` 形式のラベルファイル
#[derive(Debug, Clone)]
pub struct JsonLabelFile {
    path: PathBuf,
}

impl JsonLabelFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LabelSource for JsonLabelFile {
    fn load(&self) -> Result<LabelMap, LabelSourceError> {
        let content = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LabelSourceError::NotFound(self.path.clone()),
            _ => LabelSourceError::Io {
                path: self.path.clone(),
                source: e,
            },
        })?;
        LabelMap::from_json_str(&content)
    }
}

/// ラベル表を読み込む。ファイルが存在しない場合のみ空の表として続行する
pub fn load_or_empty(source: &dyn LabelSource) -> Result<LabelMap, LabelSourceError> {
    match source.load() {
        Ok(map) => {
            tracing::info!("ラベルを読み込みました: {} 件", map.len());
            Ok(map)
        }
        Err(LabelSourceError::NotFound(path)) => {
            tracing::warn!(
                "ラベルファイルが存在しません ({})。空のラベル表で続行します",
                path.display()
            );
            Ok(LabelMap::new())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_string_and_int_labels() {
        let map = LabelMap::from_json_str(r#"{"a.png": "1", "b.png": 2, "c.png": " 3 "}"#).unwrap();
        assert_eq!(map.get("a.png"), Some(1));
        assert_eq!(map.get("b.png"), Some(2));
        assert_eq!(map.get("c.png"), Some(3));
    }

    #[test]
    fn test_preserves_file_order() {
        let map = LabelMap::from_json_str(r#"{"z.png": 0, "a.png": 1, "m.png": 0}"#).unwrap();
        let paths: Vec<&str> = map.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["z.png", "a.png", "m.png"]);
    }

    #[test]
    fn test_invalid_label_value() {
        let err = LabelMap::from_json_str(r#"{"a.png": "spam"}"#).unwrap_err();
        assert!(matches!(err, LabelSourceError::InvalidLabel { ref path, .. } if path == "a.png"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let source = JsonLabelFile::new(dir.path().join("label.json"));
        assert!(matches!(source.load(), Err(LabelSourceError::NotFound(_))));

        // 存在しない場合のみ空の表にフォールバック
        let map = load_or_empty(&source).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("label.json");
        fs::write(&path, "{ not json").unwrap();

        let source = JsonLabelFile::new(&path);
        assert!(matches!(source.load(), Err(LabelSourceError::Malformed(_))));
        assert!(load_or_empty(&source).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("label.json");
        fs::write(&path, r#"{"img/1.png": "0", "img/2.png": "3"}"#).unwrap();

        let map = JsonLabelFile::new(&path).load().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("img/2.png"), Some(3));
    }

    #[test]
    fn test_in_memory_source() {
        let map: LabelMap = vec![("a.png", 1), ("b.png", 2)].into_iter().collect();
        assert_eq!(map.load().unwrap(), map);
    }
}
