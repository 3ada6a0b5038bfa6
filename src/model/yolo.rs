// 该文件是 Guanzhao （观照） 项目的一部分。
// src/model/yolo.rs - 基于 ONNX Runtime 的 YOLO 检测模型
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

use std::{marker::PhantomData, path::PathBuf, str::FromStr, sync::Mutex};

use image::{Rgb, RgbImage, imageops};
use ndarray::{ArrayViewD, Axis, Ix3, s};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Value,
};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{BoundingBox, DetectItem, DetectResult, Model, WithLabel, non_max_suppression},
  url_file_path, url_query,
};

const LETTERBOX_FILL: Rgb<u8> = Rgb([114, 114, 114]);

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("参数错误: {0}")]
  InvalidParam(String),
  #[error("模型输出形状不符合预期: {0:?}")]
  OutputShape(Vec<usize>),
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
}

impl YoloError {
  fn runtime(e: impl std::fmt::Display) -> Self {
    YoloError::Runtime(e.to_string())
  }
}

/// 模型输出布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YoloLayout {
  /// [1, 4+nc, N] 或 [1, N, 4+nc]，无 objectness
  #[default]
  V8,
  /// [1, N, 5+nc]，第 5 列为 objectness
  V5,
}

impl FromStr for YoloLayout {
  type Err = YoloError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "v8" | "v11" => Ok(YoloLayout::V8),
      "v5" => Ok(YoloLayout::V5),
      other => Err(YoloError::InvalidParam(format!("未知的输出布局 '{other}'"))),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct YoloParams {
  pub input_size: u32,
  pub conf_threshold: f32,
  pub iou_threshold: f32,
  pub max_detections: usize,
  pub layout: YoloLayout,
  pub intra_threads: usize,
}

impl Default for YoloParams {
  fn default() -> Self {
    Self {
      input_size: 640,
      conf_threshold: 0.25,
      iou_threshold: 0.45,
      max_detections: 300,
      layout: YoloLayout::V8,
      intra_threads: 4,
    }
  }
}

impl YoloParams {
  fn validate(&self) -> Result<(), YoloError> {
    if !(0.0..=1.0).contains(&self.conf_threshold) {
      return Err(YoloError::InvalidParam(format!(
        "置信度阈值必须在 [0, 1] 内: {}",
        self.conf_threshold
      )));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(YoloError::InvalidParam(format!(
        "IoU 阈值必须在 [0, 1] 内: {}",
        self.iou_threshold
      )));
    }
    if self.input_size == 0 {
      return Err(YoloError::InvalidParam("输入尺寸必须大于 0".into()));
    }
    Ok(())
  }
}

/// 等比缩放并居中填充到正方形输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  size: u32,
  new_width: u32,
  new_height: u32,
}

impl Letterbox {
  pub fn fit(width: u32, height: u32, size: u32) -> Self {
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);
    Self {
      scale,
      pad_x: ((size - new_width) / 2) as f32,
      pad_y: ((size - new_height) / 2) as f32,
      size,
      new_width,
      new_height,
    }
  }

  pub fn apply(&self, frame: &Frame) -> Frame {
    let resized = imageops::resize(
      frame.buffer(),
      self.new_width,
      self.new_height,
      imageops::FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(self.size, self.size, LETTERBOX_FILL);
    imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
    frame.with_buffer(canvas)
  }

  /// 把模型输入坐标映射回原图坐标
  pub fn unmap(&self, bbox: &BoundingBox) -> BoundingBox {
    BoundingBox::new(
      (bbox.x_min - self.pad_x) / self.scale,
      (bbox.y_min - self.pad_y) / self.scale,
      (bbox.x_max - self.pad_x) / self.scale,
      (bbox.y_max - self.pad_y) / self.scale,
    )
  }
}

/// 解码原始输出张量，返回模型输入坐标系下、分数不低于 `confidence` 的候选框
pub fn decode_yolo_output<T: WithLabel>(
  output: ArrayViewD<'_, f32>,
  layout: YoloLayout,
  confidence: f32,
) -> Result<Vec<DetectItem<T>>, YoloError> {
  let shape = output.shape().to_vec();
  let output = output
    .into_dimensionality::<Ix3>()
    .map_err(|_| YoloError::OutputShape(shape.clone()))?;
  if output.len_of(Axis(0)) == 0 {
    return Err(YoloError::OutputShape(shape));
  }

  let batch = output.index_axis_move(Axis(0), 0);
  let preds = match layout {
    YoloLayout::V8 if batch.nrows() < batch.ncols() => batch.reversed_axes(),
    _ => batch,
  };

  let box_attrs = match layout {
    YoloLayout::V8 => 4,
    YoloLayout::V5 => 5,
  };
  if preds.ncols() <= box_attrs {
    error!("模型输出通道数不足: {:?}", shape);
    return Err(YoloError::OutputShape(shape));
  }

  let mut items = Vec::new();
  for row in preds.rows() {
    let (class_id, class_score) = row
      .slice(s![box_attrs..])
      .iter()
      .enumerate()
      .fold((0usize, f32::MIN), |best, (i, &score)| {
        if score > best.1 { (i, score) } else { best }
      });

    let score = match layout {
      YoloLayout::V8 => class_score,
      YoloLayout::V5 => row[4] * class_score,
    };
    if score < confidence {
      continue;
    }

    items.push(DetectItem {
      kind: T::from_label_id(class_id as u32),
      score,
      bbox: BoundingBox::from_center(row[0], row[1], row[2], row[3]),
    });
  }

  debug!("候选框数量: {}", items.len());
  Ok(items)
}

pub struct Yolo<T> {
  session: Mutex<Session>,
  input_name: String,
  params: YoloParams,
  _phantom: PhantomData<T>,
}

pub struct YoloBuilder {
  model_path: PathBuf,
  params: YoloParams,
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = "yolo";
}

fn query_param<T: FromStr>(url: &Url, key: &str, default: T) -> Result<T, YoloError> {
  match url_query::<T>(url, key) {
    None => Ok(default),
    Some(Ok(value)) => Ok(value),
    Some(Err(_)) => Err(YoloError::InvalidParam(format!("无法解析参数 '{key}'"))),
  }
}

impl FromUrl for YoloBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let default = YoloParams::default();
    let params = YoloParams {
      input_size: query_param(url, "size", default.input_size)?,
      conf_threshold: query_param(url, "confidence", default.conf_threshold)?,
      iou_threshold: query_param(url, "iou", default.iou_threshold)?,
      max_detections: query_param(url, "max", default.max_detections)?,
      layout: match url_query::<String>(url, "layout") {
        Some(Ok(layout)) => layout.parse()?,
        _ => default.layout,
      },
      intra_threads: query_param(url, "threads", default.intra_threads)?,
    };
    params.validate()?;

    Ok(YoloBuilder {
      model_path: url_file_path(url),
      params,
    })
  }
}

impl YoloBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      params: YoloParams::default(),
    }
  }

  pub fn params(&self) -> &YoloParams {
    &self.params
  }

  pub fn with_params(mut self, params: YoloParams) -> Self {
    self.params = params;
    self
  }

  pub fn build<T>(self) -> Result<Yolo<T>, YoloError> {
    self.params.validate()?;

    info!("加载模型文件: {}", self.model_path.display());
    let metadata = std::fs::metadata(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()
      .map_err(YoloError::runtime)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(YoloError::runtime)?
      .with_intra_threads(self.params.intra_threads)
      .map_err(YoloError::runtime)?
      .commit_from_file(&self.model_path)
      .map_err(YoloError::runtime)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or_else(|| YoloError::ModelInvalid("模型没有输入".into()))?;
    if session.outputs.is_empty() {
      return Err(YoloError::ModelInvalid("模型没有输出".into()));
    }
    debug!("模型输入: {}", input_name);
    info!("模型加载完成");

    Ok(Yolo {
      session: Mutex::new(session),
      input_name,
      params: self.params,
      _phantom: PhantomData,
    })
  }
}

impl<T> Yolo<T> {
  pub fn params(&self) -> &YoloParams {
    &self.params
  }
}

impl<T: WithLabel> Model for Yolo<T> {
  type Input = Frame;
  type Output = DetectResult<T>;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let letterbox = Letterbox::fit(input.width(), input.height(), self.params.input_size);
    let tensor = letterbox.apply(input).to_nchw_tensor();
    let value = Value::from_array(tensor).map_err(YoloError::runtime)?;

    let candidates = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| YoloError::SessionPoisoned)?;

      debug!("执行模型推理");
      let outputs = session
        .run(ort::inputs![&self.input_name => value])
        .map_err(YoloError::runtime)?;
      let output = outputs[0]
        .try_extract_array::<f32>()
        .map_err(YoloError::runtime)?;
      debug!("模型输出形状: {:?}", output.shape());

      decode_yolo_output::<T>(output.view(), self.params.layout, self.params.conf_threshold)?
    };

    let (width, height) = (input.width() as f32, input.height() as f32);
    let items = candidates
      .into_iter()
      .map(|item| DetectItem {
        bbox: letterbox.unmap(&item.bbox).clamp(width, height),
        ..item
      })
      .filter(|item| item.bbox.area() > 0.0)
      .collect();

    let items = non_max_suppression(items, self.params.iou_threshold, self.params.max_detections);
    debug!("检测到 {} 个物体", items.len());

    Ok(items.into())
  }
}
