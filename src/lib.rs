//! ViTによるスパム画像分類の学習・評価
#![recursion_limit = "256"]

pub mod labels;
pub mod ml;
pub mod model;
pub mod backend;
pub mod pipeline;
pub mod cli;
