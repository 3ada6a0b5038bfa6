// 该文件是 Guanzhao （观照） 项目的一部分。
// src/bin/simple_transform.rs - 图像读取、变换与保存
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use guanzhao::{
  FromUrl,
  frame::ChannelOrder,
  input::InputWrapper,
  output::save_image,
  transform::{Transform, TransformChain},
};
use tracing::info;

/// 读取图像并依次应用变换，不运行模型
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出文件路径，格式由扩展名决定
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 依次应用的变换
  #[arg(long = "transform", value_name = "TRANSFORM")]
  pub transforms: Vec<Transform>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("输入来源: {}", args.input);
  info!("输出文件: {}", args.output.display());

  let frame = InputWrapper::from_url(&args.input)?
    .into_frames()
    .next()
    .context("没有输入帧")?;
  let (height, width, channels) = frame.shape();
  info!("输入图像: {}x{}x{}", height, width, channels);

  let frame = TransformChain::new(args.transforms).apply(frame)?;
  let (height, width, channels) = frame.shape();
  info!("变换后图像: {}x{}x{}", height, width, channels);
  if frame.order() == ChannelOrder::Bgr {
    info!("帧为 BGR 顺序，保存前转换为 RGB");
  }

  save_image(&frame.to_rgb_image(), &args.output)?;

  Ok(())
}
