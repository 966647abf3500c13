//! コマンドラインインターフェース
//!
//! サブコマンドを解析してパイプラインへ振り分けるだけで、処理本体は持ちません。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::ml::{SpamDataset, Split};
use crate::model::AppConfig;
use crate::pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "spam-vit",
    version,
    about = "Fine-tune a ViT on spam images and write a classification report."
)]
pub struct Cli {
    /// 設定ファイル（存在しない場合はデフォルト設定）
    #[arg(long, global = true, default_value = "spam_vit.json")]
    pub config: PathBuf,

    /// 省略時は run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Train, then evaluate the last checkpoint
    Run,
    /// Train only, writing one checkpoint per epoch
    Train,
    /// Evaluate an existing checkpoint and write the report
    Evaluate {
        /// Checkpoint directory (vit_epochs_*_loss_*.pt)
        #[arg(long)]
        checkpoint: PathBuf,
    },
    /// Show the balanced train/test split
    Split {
        /// Show the test split instead of the train split
        #[arg(long)]
        show_test: bool,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = AppConfig::load_or_default(&self.config)?;
        config.validate()?;
        config.log_summary();

        match self.command.unwrap_or(Commands::Run) {
            Commands::Run => {
                let (training, evaluation) = pipeline::run_all(&config)?;
                println!("Final checkpoint: {}", training.final_checkpoint.display());
                println!("Report written to {}", evaluation.report_path.display());
                println!("\n{}", evaluation.report);
            }
            Commands::Train => {
                let labels = pipeline::load_labels(&config)?;
                let training = pipeline::run_train(&config, &labels)?;
                println!("Final checkpoint: {}", training.final_checkpoint.display());
            }
            Commands::Evaluate { checkpoint } => {
                let labels = pipeline::load_labels(&config)?;
                let evaluation = pipeline::run_evaluate(&config, &labels, &checkpoint)?;
                println!("Report written to {}", evaluation.report_path.display());
                println!("\n{}", evaluation.report);
            }
            Commands::Split { show_test } => {
                let labels = pipeline::load_labels(&config)?;
                let split = if show_test { Split::Test } else { Split::Train };
                let dataset = SpamDataset::new(
                    &labels,
                    split,
                    config.training.train_ratio,
                    config.labels.label_offset,
                )?;
                print_split(&config, split, &dataset);
            }
        }
        Ok(())
    }
}

fn print_split(config: &AppConfig, split: Split, dataset: &SpamDataset) {
    println!("{} split: {} images", split, dataset.items().len());
    for (label, count) in dataset.label_counts() {
        let name = config
            .labels
            .class_names
            .get(label)
            .map(String::as_str)
            .unwrap_or("?");
        println!("  {:>3} {:<16} {}", label, name, count);
    }
    for item in dataset.items() {
        println!("{}\t{}", item.label, item.path.display());
    }
}
