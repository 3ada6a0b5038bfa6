// 该文件是 Guanzhao （观照） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use clap::Args;
use tracing::info;
use url::Url;

use crate::transform::{Transform, TransformChain};

/// 推理流水线的公共参数
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
  /// 模型地址，如 yolo:///models/yolov8n.onnx?confidence=0.25&iou=0.45
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// - 图片: image:///path/to/image.jpg
  /// - 目录: folder:///path/to/images
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// - 图片: image:///path/to/result.png?thickness=2&font=/path/to/font.ttf
  /// - 目录: folder:///path/to/records?record&always
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 推理前依次应用的变换，可重复，如 --transform blur=1.5 --transform resize=640x480
  #[arg(long = "transform", value_name = "TRANSFORM")]
  pub transforms: Vec<Transform>,
}

impl PipelineArgs {
  pub fn log(&self) {
    info!("模型文件路径: {}", self.model);
    info!("输入来源: {}", self.input);
    info!("输出路径: {}", self.output);
    if !self.transforms.is_empty() {
      info!("图像变换: {:?}", self.transforms);
    }
  }

  pub fn transform_chain(&self) -> TransformChain {
    TransformChain::new(self.transforms.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser)]
  struct Cli {
    #[command(flatten)]
    pipeline: PipelineArgs,
  }

  #[test]
  fn parses_repeated_transforms() {
    let cli = Cli::try_parse_from([
      "test",
      "--model",
      "yolo:///m.onnx",
      "--input",
      "image:///in.png",
      "--output",
      "image:///out.png",
      "--transform",
      "blur=2",
      "--transform",
      "flip",
    ])
    .unwrap();
    assert_eq!(
      cli.pipeline.transforms,
      vec![Transform::Blur { sigma: 2.0 }, Transform::FlipHorizontal]
    );
    assert!(!cli.pipeline.transform_chain().is_empty());
  }

  #[test]
  fn rejects_bad_transform() {
    let parsed = Cli::try_parse_from([
      "test",
      "--model",
      "yolo:///m.onnx",
      "--input",
      "image:///in.png",
      "--output",
      "image:///out.png",
      "--transform",
      "warp=1",
    ]);
    assert!(parsed.is_err());
  }
}
