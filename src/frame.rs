// 该文件是 Guanzhao （观照） 项目的一部分。
// src/frame.rs - HWC 帧定义
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

use image::RgbImage;
use ndarray::Array4;
use thiserror::Error;

const CHANNELS: usize = 3;

/// 通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ChannelOrder {
  pub fn swapped(self) -> Self {
    match self {
      ChannelOrder::Rgb => ChannelOrder::Bgr,
      ChannelOrder::Bgr => ChannelOrder::Rgb,
    }
  }
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
}

/// 高 × 宽 × 通道 排列的 8 位图像帧
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
  pixels: RgbImage,
  order: ChannelOrder,
}

impl Frame {
  pub fn from_rgb_image(image: RgbImage) -> Self {
    Self {
      pixels: image,
      order: ChannelOrder::Rgb,
    }
  }

  pub fn from_raw(
    width: u32,
    height: u32,
    data: Vec<u8>,
    order: ChannelOrder,
  ) -> Result<Self, FrameError> {
    let expected = CHANNELS * width as usize * height as usize;
    let actual = data.len();
    let pixels = RgbImage::from_raw(width, height, data)
      .filter(|_| actual == expected)
      .ok_or(FrameError::ShapeMismatch { expected, actual })?;
    Ok(Self { pixels, order })
  }

  pub fn width(&self) -> u32 {
    self.pixels.width()
  }

  pub fn height(&self) -> u32 {
    self.pixels.height()
  }

  pub fn channels(&self) -> usize {
    CHANNELS
  }

  /// (高, 宽, 通道)
  pub fn shape(&self) -> (usize, usize, usize) {
    (self.height() as usize, self.width() as usize, CHANNELS)
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }

  pub fn as_raw(&self) -> &[u8] {
    self.pixels.as_raw()
  }

  /// 按存储顺序访问像素缓冲，供变换使用
  pub(crate) fn buffer(&self) -> &RgbImage {
    &self.pixels
  }

  pub(crate) fn with_buffer(&self, pixels: RgbImage) -> Self {
    Self {
      pixels,
      order: self.order,
    }
  }

  /// 不改动数据，仅把帧重新解释为另一种通道顺序
  pub(crate) fn reinterpret(mut self, order: ChannelOrder) -> Self {
    self.order = order;
    self
  }

  pub fn to_order(&self, order: ChannelOrder) -> Frame {
    if order == self.order {
      return self.clone();
    }

    let mut pixels = self.pixels.clone();
    for pixel in pixels.pixels_mut() {
      pixel.0.swap(0, 2);
    }
    Frame { pixels, order }
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    match self.order {
      ChannelOrder::Rgb => self.pixels.clone(),
      ChannelOrder::Bgr => self.to_order(ChannelOrder::Rgb).pixels,
    }
  }

  /// 转为 [1, 3, H, W] 的 RGB 张量，取值归一化到 [0, 1]
  pub fn to_nchw_tensor(&self) -> Array4<f32> {
    let (height, width, _) = self.shape();
    let (r, b) = match self.order {
      ChannelOrder::Rgb => (0, 2),
      ChannelOrder::Bgr => (2, 0),
    };

    let mut tensor = Array4::<f32>::zeros((1, CHANNELS, height, width));
    for (x, y, pixel) in self.pixels.enumerate_pixels() {
      let (x, y) = (x as usize, y as usize);
      tensor[[0, 0, y, x]] = pixel[r] as f32 / 255.0;
      tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
      tensor[[0, 2, y, x]] = pixel[b] as f32 / 255.0;
    }
    tensor
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Frame::from_rgb_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn sample() -> Frame {
    let image = RgbImage::from_fn(4, 2, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 200]));
    Frame::from_rgb_image(image)
  }

  #[test]
  fn shape_is_height_width_channels() {
    assert_eq!(sample().shape(), (2, 4, 3));
  }

  #[test]
  fn from_raw_rejects_wrong_length() {
    let err = Frame::from_raw(2, 2, vec![0u8; 11], ChannelOrder::Rgb).unwrap_err();
    assert!(matches!(
      err,
      FrameError::ShapeMismatch {
        expected: 12,
        actual: 11
      }
    ));
  }

  #[test]
  fn bgr_conversion_swaps_outer_channels() {
    let frame = sample();
    let bgr = frame.to_order(ChannelOrder::Bgr);
    assert_eq!(bgr.order(), ChannelOrder::Bgr);
    assert_eq!(&bgr.as_raw()[3..6], &[200, 0, 10]);
    assert_eq!(bgr.to_order(ChannelOrder::Rgb), frame);
  }

  #[test]
  fn rgb_image_is_independent_of_storage_order() {
    let frame = sample();
    let bgr = frame.to_order(ChannelOrder::Bgr);
    assert_eq!(bgr.to_rgb_image(), frame.to_rgb_image());
  }

  #[test]
  fn nchw_tensor_is_normalised_rgb() {
    let frame = sample().to_order(ChannelOrder::Bgr);
    let tensor = frame.to_nchw_tensor();
    assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
    assert!((tensor[[0, 0, 0, 1]] - 10.0 / 255.0).abs() < 1e-6);
    assert!((tensor[[0, 1, 1, 0]] - 20.0 / 255.0).abs() < 1e-6);
    assert!((tensor[[0, 2, 1, 3]] - 200.0 / 255.0).abs() < 1e-6);
  }
}
