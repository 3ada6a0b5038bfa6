// 该文件是 Guanzhao （观照） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续推理
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

use anyhow::Result;
use clap::Parser;

use guanzhao::{
  FromUrl,
  args::PipelineArgs,
  input::InputWrapper,
  model::{CocoLabel, Yolo, YoloBuilder},
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};

/// 依次处理输入中的全部帧，直到结束、达到帧数或收到 Ctrl-C
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub pipeline: PipelineArgs,

  /// 最多处理的帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  args.pipeline.log();

  let input = InputWrapper::from_url(&args.pipeline.input)?;
  let model: Yolo<CocoLabel> = YoloBuilder::from_url(&args.pipeline.model)?.build()?;
  let output = OutputWrapper::from_url(&args.pipeline.output)?;

  let frames = args.pipeline.transform_chain().apply_iter(input.into_frames());
  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(frames, model, output)?;

  Ok(())
}
