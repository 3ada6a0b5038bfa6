// 该文件是 Guanzhao （观照） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  model::{BoundingBox, DetectResult, WithLabel},
  url_query,
};

const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_PADDING: u32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const DEFAULT_THICKNESS: u32 = 2;
const PALETTE_SIZE: usize = 80;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  FontIo(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
  #[error("绘制参数错误: {0}")]
  InvalidParam(String),
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  thickness: u32,
  palette: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    // 每个 COCO 类别一种颜色
    let palette = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      thickness: DEFAULT_THICKNESS,
      palette,
    }
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  /// 从输出 URL 的查询参数 `font`、`thickness` 构造
  pub fn from_url_query(url: &Url) -> Result<Self, DrawError> {
    let mut draw = Draw::default();
    if let Some(thickness) = url_query::<u32>(url, "thickness") {
      let thickness =
        thickness.map_err(|_| DrawError::InvalidParam("thickness 必须是正整数".into()))?;
      draw = draw.with_thickness(thickness)?;
    }
    if let Some(Ok(font)) = url_query::<String>(url, "font") {
      draw = draw.with_font_file(font)?;
    }
    Ok(draw)
  }

  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    self.font = Some(FontArc::try_from_vec(data)?);
    debug!("加载标签字体: {}", path.as_ref().display());
    Ok(self)
  }

  pub fn with_thickness(mut self, thickness: u32) -> Result<Self, DrawError> {
    if thickness == 0 {
      return Err(DrawError::InvalidParam("thickness 必须大于 0".into()));
    }
    self.thickness = thickness;
    Ok(self)
  }

  pub fn color_for(&self, class_id: u32) -> Rgb<u8> {
    self.palette[class_id as usize % self.palette.len()]
  }

  /// 在图像副本上绘制检测框，原图不变
  pub fn draw_detections<T: WithLabel>(
    &self,
    image: &RgbImage,
    result: &DetectResult<T>,
  ) -> RgbImage {
    let mut canvas = image.clone();
    self.draw_detections_mut(&mut canvas, result);
    canvas
  }

  pub fn draw_detections_mut<T: WithLabel>(&self, image: &mut RgbImage, result: &DetectResult<T>) {
    for item in result.iter() {
      let color = self.color_for(item.kind.to_label_id());
      let Some(rect) = pixel_rect(&item.bbox, image.width(), image.height()) else {
        continue;
      };
      self.draw_outline(image, rect, color);

      if let Some(font) = &self.font {
        let label = format!("{} {:.2}", item.kind.to_label_str(), item.score);
        let scale = PxScale::from(self.font_size);
        let (text_width, text_height) = text_size(scale, font, &label);
        let tag_height = text_height + 2 * LABEL_PADDING;
        let tag_y = (rect.top() - tag_height as i32).max(0);

        draw_filled_rect_mut(
          image,
          Rect::at(rect.left(), tag_y).of_size(text_width + 2 * LABEL_PADDING, tag_height),
          color,
        );
        draw_text_mut(
          image,
          LABEL_TEXT_COLOR,
          rect.left() + LABEL_PADDING as i32,
          tag_y + LABEL_PADDING as i32,
          scale,
          font,
          &label,
        );
      }
    }
  }

  fn draw_outline(&self, image: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    for t in 0..self.thickness {
      let (width, height) = (
        rect.width().saturating_sub(2 * t),
        rect.height().saturating_sub(2 * t),
      );
      if width == 0 || height == 0 {
        break;
      }
      let inner = Rect::at(rect.left() + t as i32, rect.top() + t as i32).of_size(width, height);
      draw_hollow_rect_mut(image, inner, color);
    }
  }
}

/// 把像素坐标框裁剪到图像内；裁剪后为空则返回 None
fn pixel_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
  if width == 0 || height == 0 {
    return None;
  }
  let clamped = bbox.clamp(width as f32, height as f32);
  if !(clamped.area() > 0.0) {
    return None;
  }

  let max_x = width as i32 - 1;
  let max_y = height as i32 - 1;

  let x_min = (clamped.x_min.floor() as i32).clamp(0, max_x);
  let y_min = (clamped.y_min.floor() as i32).clamp(0, max_y);
  // 非空框的 ceil(max) - 1 不小于 floor(min)，最窄为 1 像素
  let x_max = (clamped.x_max.ceil() as i32 - 1).clamp(x_min, max_x);
  let y_max = (clamped.y_max.ceil() as i32 - 1).clamp(y_min, max_y);

  Some(Rect::at(x_min, y_min).of_size((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32))
}

#[derive(Debug, Serialize)]
pub struct RecordEntry {
  pub label: String,
  pub class_id: u32,
  pub score: f32,
  pub bbox: BoundingBox,
}

/// 以 JSON 形式保存检测结果
pub struct Record;

impl Record {
  pub fn entries<T: WithLabel>(result: &DetectResult<T>) -> Vec<RecordEntry> {
    result
      .iter()
      .map(|item| RecordEntry {
        label: item.kind.to_label_str(),
        class_id: item.kind.to_label_id(),
        score: item.score,
        bbox: item.bbox,
      })
      .collect()
  }

  /// 写入与 `path` 同名的 `.json` 文件
  pub fn record<T: WithLabel>(
    &self,
    result: &DetectResult<T>,
    path: &Path,
  ) -> Result<(), std::io::Error> {
    let file = File::create(path.with_extension("json"))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &Self::entries(result))?;
    writer.flush()
  }
}
