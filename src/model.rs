// 该文件是 Guanzhao （观照） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;

mod label;
pub use self::label::{COCO_CLASSES, CocoLabel};

#[cfg(feature = "model_yolo")]
mod yolo;
#[cfg(feature = "model_yolo")]
pub use self::yolo::{
  Letterbox, Yolo, YoloBuilder, YoloError, YoloLayout, YoloParams, decode_yolo_output,
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 像素坐标下的边界框，(x_min, y_min) 为左上角，(x_max, y_max) 为右下角
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
  pub x_min: f32,
  pub y_min: f32,
  pub x_max: f32,
  pub y_max: f32,
}

impl BoundingBox {
  pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    Self {
      x_min,
      y_min,
      x_max,
      y_max,
    }
  }

  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
  }

  pub fn width(&self) -> f32 {
    (self.x_max - self.x_min).max(0.0)
  }

  pub fn height(&self) -> f32 {
    (self.y_max - self.y_min).max(0.0)
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn clamp(&self, width: f32, height: f32) -> Self {
    Self::new(
      self.x_min.clamp(0.0, width),
      self.y_min.clamp(0.0, height),
      self.x_max.clamp(0.0, width),
      self.y_max.clamp(0.0, height),
    )
  }

  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x1 = self.x_min.max(other.x_min);
    let y1 = self.y_min.max(other.y_min);
    let x2 = self.x_max.min(other.x_max);
    let y2 = self.y_max.min(other.y_max);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

#[derive(Debug, Clone)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: BoundingBox,
}

#[derive(Debug, Clone)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem<T>> {
    self.items.iter()
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// 按类别的贪心非极大值抑制，结果按分数降序，最多保留 `max_detections` 个
pub fn non_max_suppression<T: WithLabel>(
  mut items: Vec<DetectItem<T>>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<DetectItem<T>> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem<T>> = Vec::new();
  for item in items {
    if kept.len() >= max_detections {
      break;
    }
    let suppressed = kept.iter().any(|k| {
      k.kind.to_label_id() == item.kind.to_label_id() && k.bbox.iou(&item.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(class: u32, score: f32, bbox: BoundingBox) -> DetectItem<CocoLabel> {
    DetectItem {
      kind: CocoLabel::from_label_id(class),
      score,
      bbox,
    }
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_half_overlap() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
    assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
  }

  #[test]
  fn degenerate_boxes_have_zero_iou() {
    let a = BoundingBox::new(3.0, 3.0, 3.0, 3.0);
    assert_eq!(a.iou(&a), 0.0);
  }

  #[test]
  fn from_center_and_clamp() {
    let b = BoundingBox::from_center(5.0, 5.0, 20.0, 4.0).clamp(8.0, 8.0);
    assert_eq!(b, BoundingBox::new(0.0, 3.0, 8.0, 7.0));
    assert_eq!(b.width(), 8.0);
    assert_eq!(b.height(), 4.0);
  }

  #[test]
  fn nms_suppresses_overlaps_within_a_class_only() {
    let items = vec![
      item(0, 0.6, BoundingBox::new(1.0, 1.0, 11.0, 11.0)),
      item(0, 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
      item(2, 0.8, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
      item(0, 0.7, BoundingBox::new(50.0, 50.0, 60.0, 60.0)),
    ];
    let kept = non_max_suppression(items, 0.45, 10);
    let scores: Vec<f32> = kept.iter().map(|i| i.score).collect();
    assert_eq!(scores, vec![0.9, 0.8, 0.7]);
  }

  #[test]
  fn nms_respects_max_detections() {
    let items = (0..5)
      .map(|i| {
        let x = i as f32 * 100.0;
        item(0, 0.5 + i as f32 * 0.1, BoundingBox::new(x, 0.0, x + 10.0, 10.0))
      })
      .collect();
    assert_eq!(non_max_suppression(items, 0.5, 2).len(), 2);
  }

  #[test]
  fn detect_result_from_vec() {
    let result: DetectResult<CocoLabel> =
      vec![item(1, 0.5, BoundingBox::new(0.0, 0.0, 1.0, 1.0))].into();
    assert_eq!(result.len(), 1);
    assert!(!result.is_empty());
    assert_eq!(result.iter().next().unwrap().kind.to_label_str(), "bicycle");
  }
}
