//! 分類レポート
//!
//! クラスごとの precision / recall / F1 / support と、accuracy・マクロ平均・加重平均を計算し、
//! 一般的なテキスト形式で出力します。

use std::fmt;
use thiserror::Error;

const HEADERS: [&str; 4] = ["precision", "recall", "f1-score", "support"];
const DIGITS: usize = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportError {
    #[error("true and predicted label counts differ: {true_len} vs {pred_len}")]
    LengthMismatch { true_len: usize, pred_len: usize },
    #[error("label {label} is out of range for {num_classes} class names")]
    LabelOutOfRange { label: usize, num_classes: usize },
    #[error("at least one class name is required")]
    NoClasses,
}

/// クラス単位の指標
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

impl ClassMetrics {
    fn average(&self) -> AverageMetrics {
        AverageMetrics {
            precision: self.precision,
            recall: self.recall,
            f1_score: self.f1_score,
        }
    }
}

/// 平均値（マクロ / 加重）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

/// 分類レポート
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
    pub total_support: usize,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ClassificationReport {
    /// 正解ラベルと予測ラベルからレポートを作成
    ///
    /// `class_names` の全クラス (0..n) を対象にします。出現しないクラスは support 0、指標 0 になります。
    pub fn from_labels(
        y_true: &[usize],
        y_pred: &[usize],
        class_names: &[String],
    ) -> Result<Self, ReportError> {
        if y_true.len() != y_pred.len() {
            return Err(ReportError::LengthMismatch {
                true_len: y_true.len(),
                pred_len: y_pred.len(),
            });
        }
        let num_classes = class_names.len();
        if num_classes == 0 {
            return Err(ReportError::NoClasses);
        }
        if let Some(&label) = y_true.iter().chain(y_pred).find(|&&l| l >= num_classes) {
            return Err(ReportError::LabelOutOfRange { label, num_classes });
        }

        let mut true_positives = vec![0usize; num_classes];
        let mut predicted = vec![0usize; num_classes];
        let mut support = vec![0usize; num_classes];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            support[t] += 1;
            predicted[p] += 1;
            if t == p {
                true_positives[t] += 1;
            }
        }

        let classes: Vec<ClassMetrics> = class_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let precision = ratio(true_positives[i], predicted[i]);
                let recall = ratio(true_positives[i], support[i]);
                let f1_score = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    name: name.clone(),
                    precision,
                    recall,
                    f1_score,
                    support: support[i],
                }
            })
            .collect();

        let total_support = y_true.len();
        let correct: usize = true_positives.iter().sum();

        let n = num_classes as f64;
        let macro_avg = AverageMetrics {
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1_score: classes.iter().map(|c| c.f1_score).sum::<f64>() / n,
        };

        let weighted_avg = if total_support == 0 {
            AverageMetrics::default()
        } else {
            let total = total_support as f64;
            let weighted = |f: fn(&ClassMetrics) -> f64| {
                classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total
            };
            AverageMetrics {
                precision: weighted(|c| c.precision),
                recall: weighted(|c| c.recall),
                f1_score: weighted(|c| c.f1_score),
            }
        };

        Ok(Self {
            classes,
            accuracy: ratio(correct, total_support),
            macro_avg,
            weighted_avg,
            total_support,
        })
    }

    fn label_width(&self) -> usize {
        self.classes
            .iter()
            .map(|c| c.name.chars().count())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(0)
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.label_width();

        write!(f, "{:>width$} ", "")?;
        for header in HEADERS {
            write!(f, " {header:>9}")?;
        }
        writeln!(f)?;
        writeln!(f)?;

        for class in &self.classes {
            write_row(f, width, &class.name, &class.average(), class.support)?;
        }
        writeln!(f)?;

        writeln!(
            f,
            "{:>width$}  {:>9} {:>9} {:>9.prec$} {:>9}",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.total_support,
            prec = DIGITS
        )?;
        write_row(f, width, "macro avg", &self.macro_avg, self.total_support)?;
        write_row(f, width, "weighted avg", &self.weighted_avg, self.total_support)
    }
}

fn write_row(
    f: &mut fmt::Formatter<'_>,
    width: usize,
    name: &str,
    metrics: &AverageMetrics,
    support: usize,
) -> fmt::Result {
    writeln!(
        f,
        "{name:>width$}  {:>9.prec$} {:>9.prec$} {:>9.prec$} {support:>9}",
        metrics.precision,
        metrics.recall,
        metrics.f1_score,
        prec = DIGITS
    )
}
