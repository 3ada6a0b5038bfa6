// 该文件是 Guanzhao （观照） 项目的一部分。
// src/transform.rs - 常用图像变换
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

use std::str::FromStr;

use image::{
  Rgb,
  imageops::{self, FilterType},
};
use imageproc::{
  filter::gaussian_blur_f32,
  geometric_transformations::{Interpolation, Projection, rotate_about_center, warp},
};
use thiserror::Error;
use tracing::{debug, error};

use crate::frame::Frame;

/// 高斯核半径约为 2 sigma，过大的 sigma 会使核尺寸溢出
pub const MAX_BLUR_SIGMA: f32 = 1024.0;

#[derive(Error, Debug, PartialEq)]
pub enum TransformError {
  #[error("未知的变换: {0}")]
  Unknown(String),
  #[error("变换参数错误 '{0}': {1}")]
  BadArgument(String, String),
  #[error("仿射矩阵不可逆")]
  SingularMatrix,
  #[error("裁剪区域 {x},{y},{width}x{height} 超出图像 {image_width}x{image_height}")]
  CropOutOfBounds {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    image_width: u32,
    image_height: u32,
  },
}

/// 单个图像变换
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
  Blur { sigma: f32 },
  Resize { width: u32, height: u32 },
  Rotate { degrees: f32 },
  /// 2x3 仿射矩阵 [[a, b, c], [d, e, f]]，源坐标映射到目标坐标
  Affine { matrix: [f32; 6] },
  Crop { x: u32, y: u32, width: u32, height: u32 },
  FlipHorizontal,
  SwapChannels,
}

impl Transform {
  pub fn apply(&self, frame: &Frame) -> Result<Frame, TransformError> {
    debug!("应用变换: {:?}", self);
    let image = frame.buffer();
    let result = match *self {
      Transform::Blur { sigma } => {
        check_sigma(&format!("blur={sigma}"), sigma)?;
        frame.with_buffer(gaussian_blur_f32(image, sigma))
      }
      Transform::Resize { width, height } => {
        check_size(&format!("resize={width}x{height}"), width, height)?;
        frame.with_buffer(imageops::resize(image, width, height, FilterType::Triangle))
      }
      Transform::Rotate { degrees } => {
        check_finite(&format!("rotate={degrees}"), degrees)?;
        frame.with_buffer(rotate_about_center(
          image,
          degrees.to_radians(),
          Interpolation::Bilinear,
          Rgb([0, 0, 0]),
        ))
      }
      Transform::Affine { matrix } => {
        for value in matrix {
          check_finite(&format!("affine={matrix:?}"), value)?;
        }
        let [a, b, c, d, e, f] = matrix;
        let projection = Projection::from_matrix([a, b, c, d, e, f, 0.0, 0.0, 1.0])
          .ok_or(TransformError::SingularMatrix)?;
        frame.with_buffer(warp(
          image,
          &projection,
          Interpolation::Bilinear,
          Rgb([0, 0, 0]),
        ))
      }
      Transform::Crop {
        x,
        y,
        width,
        height,
      } => {
        check_size(&format!("crop={x},{y},{width}x{height}"), width, height)?;
        let fits = x.checked_add(width).is_some_and(|r| r <= image.width())
          && y.checked_add(height).is_some_and(|b| b <= image.height());
        if !fits {
          error!("裁剪区域超出图像范围");
          return Err(TransformError::CropOutOfBounds {
            x,
            y,
            width,
            height,
            image_width: image.width(),
            image_height: image.height(),
          });
        }
        frame.with_buffer(imageops::crop_imm(image, x, y, width, height).to_image())
      }
      Transform::FlipHorizontal => frame.with_buffer(imageops::flip_horizontal(image)),
      Transform::SwapChannels => frame.clone().reinterpret(frame.order().swapped()),
    };
    Ok(result)
  }
}

fn parse_number<T: FromStr>(text: &str, value: &str) -> Result<T, TransformError> {
  value
    .trim()
    .parse()
    .map_err(|_| TransformError::BadArgument(text.to_string(), format!("无法解析数值 '{value}'")))
}

fn check_finite(text: &str, value: f32) -> Result<f32, TransformError> {
  if !value.is_finite() {
    return Err(TransformError::BadArgument(
      text.to_string(),
      format!("数值 {value} 不是有限数"),
    ));
  }
  Ok(value)
}

fn check_sigma(text: &str, sigma: f32) -> Result<f32, TransformError> {
  if !(sigma > 0.0 && sigma <= MAX_BLUR_SIGMA) {
    return Err(TransformError::BadArgument(
      text.to_string(),
      format!("sigma 必须在 (0, {MAX_BLUR_SIGMA}] 之内"),
    ));
  }
  Ok(sigma)
}

fn check_size(text: &str, width: u32, height: u32) -> Result<(u32, u32), TransformError> {
  if width == 0 || height == 0 {
    return Err(TransformError::BadArgument(
      text.to_string(),
      "尺寸必须大于 0".into(),
    ));
  }
  Ok((width, height))
}

fn parse_size(text: &str, value: &str) -> Result<(u32, u32), TransformError> {
  let (w, h) = value
    .split_once('x')
    .ok_or_else(|| TransformError::BadArgument(text.to_string(), "尺寸格式应为 WxH".into()))?;
  check_size(text, parse_number(text, w)?, parse_number(text, h)?)
}

impl FromStr for Transform {
  type Err = TransformError;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    let (name, args) = match text.split_once('=') {
      Some((name, args)) => (name.trim(), Some(args)),
      None => (text.trim(), None),
    };
    let required = || {
      args.ok_or_else(|| TransformError::BadArgument(text.to_string(), "缺少参数".into()))
    };

    match name {
      "blur" => {
        let sigma = check_sigma(text, parse_number(text, required()?)?)?;
        Ok(Transform::Blur { sigma })
      }
      "resize" => {
        let (width, height) = parse_size(text, required()?)?;
        Ok(Transform::Resize { width, height })
      }
      "rotate" => Ok(Transform::Rotate {
        degrees: check_finite(text, parse_number(text, required()?)?)?,
      }),
      "affine" => {
        let values = required()?
          .split(',')
          .map(|v| check_finite(text, parse_number(text, v)?))
          .collect::<Result<Vec<_>, _>>()?;
        let matrix: [f32; 6] = values.try_into().map_err(|_| {
          TransformError::BadArgument(text.to_string(), "仿射矩阵需要 6 个数".into())
        })?;
        Ok(Transform::Affine { matrix })
      }
      "crop" => {
        let mut parts = required()?.splitn(3, ',');
        let (Some(x), Some(y), Some(size)) = (parts.next(), parts.next(), parts.next()) else {
          return Err(TransformError::BadArgument(
            text.to_string(),
            "裁剪格式应为 x,y,WxH".into(),
          ));
        };
        let (width, height) = parse_size(text, size)?;
        Ok(Transform::Crop {
          x: parse_number(text, x)?,
          y: parse_number(text, y)?,
          width,
          height,
        })
      }
      "flip" => Ok(Transform::FlipHorizontal),
      "swap-channels" => Ok(Transform::SwapChannels),
      _ => Err(TransformError::Unknown(name.to_string())),
    }
  }
}

/// 依次应用的一组变换
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
  transforms: Vec<Transform>,
}

impl TransformChain {
  pub fn new(transforms: Vec<Transform>) -> Self {
    Self { transforms }
  }

  pub fn is_empty(&self) -> bool {
    self.transforms.is_empty()
  }

  pub fn apply(&self, frame: Frame) -> Result<Frame, TransformError> {
    self
      .transforms
      .iter()
      .try_fold(frame, |frame, transform| transform.apply(&frame))
  }

  /// 在输入与模型之间套上变换；失败的帧记录日志后丢弃
  pub fn apply_iter<I: Iterator<Item = Frame>>(self, input: I) -> impl Iterator<Item = Frame> {
    input.filter_map(move |frame| match self.apply(frame) {
      Ok(frame) => Some(frame),
      Err(e) => {
        error!("图像变换失败: {}", e);
        None
      }
    })
  }
}

impl FromIterator<Transform> for TransformChain {
  fn from_iter<I: IntoIterator<Item = Transform>>(iter: I) -> Self {
    Self::new(iter.into_iter().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::ChannelOrder;
  use image::RgbImage;

  fn gradient(width: u32, height: u32) -> Frame {
    Frame::from_rgb_image(RgbImage::from_fn(width, height, |x, y| {
      Rgb([(x * 20) as u8, (y * 20) as u8, 128])
    }))
  }

  #[test]
  fn parses_cli_specs() {
    assert_eq!(
      "blur=1.5".parse::<Transform>().unwrap(),
      Transform::Blur { sigma: 1.5 }
    );
    assert_eq!(
      "resize=640x480".parse::<Transform>().unwrap(),
      Transform::Resize {
        width: 640,
        height: 480
      }
    );
    assert_eq!(
      "crop=1,2,3x4".parse::<Transform>().unwrap(),
      Transform::Crop {
        x: 1,
        y: 2,
        width: 3,
        height: 4
      }
    );
    assert_eq!(
      "affine=1,0,5,0,1,-3".parse::<Transform>().unwrap(),
      Transform::Affine {
        matrix: [1.0, 0.0, 5.0, 0.0, 1.0, -3.0]
      }
    );
    assert_eq!("flip".parse::<Transform>().unwrap(), Transform::FlipHorizontal);
  }

  #[test]
  fn blur_with_non_positive_sigma_is_an_error() {
    let err = Transform::Blur { sigma: 0.0 }.apply(&gradient(4, 4)).unwrap_err();
    assert!(matches!(err, TransformError::BadArgument(..)));
  }

  #[test]
  fn non_finite_or_huge_values_are_rejected() {
    for text in [
      "blur=inf",
      "blur=NaN",
      "blur=1e30",
      "rotate=NaN",
      "rotate=-inf",
      "affine=1,0,0,0,1,NaN",
      "affine=inf,0,0,0,1,0",
    ] {
      assert!(
        matches!(text.parse::<Transform>(), Err(TransformError::BadArgument(..))),
        "{text}"
      );
    }

    let frame = gradient(4, 4);
    for transform in [
      Transform::Blur {
        sigma: f32::INFINITY,
      },
      Transform::Blur { sigma: 1e30 },
      Transform::Rotate { degrees: f32::NAN },
      Transform::Affine {
        matrix: [1.0, 0.0, f32::NAN, 0.0, 1.0, 0.0],
      },
    ] {
      assert!(
        matches!(transform.apply(&frame), Err(TransformError::BadArgument(..))),
        "{transform:?}"
      );
    }
  }

  #[test]
  fn zero_sized_resize_and_crop_are_rejected_on_apply() {
    let frame = gradient(4, 4);
    for transform in [
      Transform::Resize {
        width: 0,
        height: 4,
      },
      Transform::Resize {
        width: 4,
        height: 0,
      },
      Transform::Crop {
        x: 0,
        y: 0,
        width: 0,
        height: 2,
      },
    ] {
      assert!(
        matches!(transform.apply(&frame), Err(TransformError::BadArgument(..))),
        "{transform:?}"
      );
    }
  }

  #[test]
  fn rejects_bad_specs() {
    assert!(matches!(
      "sharpen=2".parse::<Transform>(),
      Err(TransformError::Unknown(_))
    ));
    assert!(matches!(
      "blur=0".parse::<Transform>(),
      Err(TransformError::BadArgument(..))
    ));
    assert!(matches!(
      "resize=0x10".parse::<Transform>(),
      Err(TransformError::BadArgument(..))
    ));
    assert!(matches!(
      "affine=1,2,3".parse::<Transform>(),
      Err(TransformError::BadArgument(..))
    ));
    assert!(matches!(
      "rotate".parse::<Transform>(),
      Err(TransformError::BadArgument(..))
    ));
  }

  #[test]
  fn resize_produces_requested_shape() {
    let out = Transform::Resize {
      width: 5,
      height: 9,
    }
    .apply(&gradient(10, 6))
    .unwrap();
    assert_eq!(out.shape(), (9, 5, 3));
  }

  #[test]
  fn blur_keeps_shape_and_order() {
    let frame = gradient(8, 8).to_order(ChannelOrder::Bgr);
    let out = Transform::Blur { sigma: 1.0 }.apply(&frame).unwrap();
    assert_eq!(out.shape(), frame.shape());
    assert_eq!(out.order(), ChannelOrder::Bgr);
  }

  #[test]
  fn identity_affine_keeps_pixels() {
    let frame = gradient(6, 4);
    let out = Transform::Affine {
      matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
    }
    .apply(&frame)
    .unwrap();
    // 双线性插值在最右列与最底行取不到右下邻居
    for y in 0..3 {
      for x in 0..5 {
        assert_eq!(out.buffer().get_pixel(x, y), frame.buffer().get_pixel(x, y));
      }
    }
  }

  #[test]
  fn affine_translation_moves_pixels() {
    let frame = gradient(6, 4);
    let out = Transform::Affine {
      matrix: [1.0, 0.0, 2.0, 0.0, 1.0, 0.0],
    }
    .apply(&frame)
    .unwrap();
    assert_eq!(out.shape(), frame.shape());
    assert_eq!(out.buffer().get_pixel(3, 1), frame.buffer().get_pixel(1, 1));
    assert_eq!(out.buffer().get_pixel(0, 0), &Rgb([0, 0, 0]));
  }

  #[test]
  fn singular_affine_is_an_error() {
    let err = Transform::Affine {
      matrix: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    }
    .apply(&gradient(4, 4))
    .unwrap_err();
    assert_eq!(err, TransformError::SingularMatrix);
  }

  #[test]
  fn crop_must_fit_inside_image() {
    let frame = gradient(10, 10);
    let out = Transform::Crop {
      x: 2,
      y: 3,
      width: 4,
      height: 5,
    }
    .apply(&frame)
    .unwrap();
    assert_eq!(out.shape(), (5, 4, 3));
    assert_eq!(out.buffer().get_pixel(0, 0), frame.buffer().get_pixel(2, 3));

    let err = Transform::Crop {
      x: 8,
      y: 0,
      width: 4,
      height: 1,
    }
    .apply(&frame)
    .unwrap_err();
    assert!(matches!(err, TransformError::CropOutOfBounds { .. }));
  }

  #[test]
  fn swap_channels_reinterprets_order() {
    let frame = gradient(2, 1);
    let out = Transform::SwapChannels.apply(&frame).unwrap();
    assert_eq!(out.order(), ChannelOrder::Bgr);
    assert_eq!(out.as_raw(), frame.as_raw());
    assert_eq!(out.to_rgb_image().get_pixel(1, 0), &Rgb([128, 0, 20]));

    let back = Transform::SwapChannels.apply(&out).unwrap();
    assert_eq!(back, frame);
  }

  fn close(a: &Rgb<u8>, b: &Rgb<u8>) -> bool {
    a.0.iter().zip(b.0).all(|(x, y)| x.abs_diff(y) <= 1)
  }

  #[test]
  fn rotate_moves_pixels_about_center() {
    // 6x6 的中心为 (3, 3)，顺时针 90 度后 (4, 3) 落到 (3, 4)
    let mut image = RgbImage::from_pixel(6, 6, Rgb([0, 0, 0]));
    image.put_pixel(4, 3, Rgb([200, 100, 50]));
    let frame = Frame::from_rgb_image(image);

    let out = "rotate=90".parse::<Transform>().unwrap().apply(&frame).unwrap();
    assert_eq!(out.shape(), frame.shape());
    assert!(close(out.buffer().get_pixel(3, 4), &Rgb([200, 100, 50])));
    assert!(close(out.buffer().get_pixel(4, 3), &Rgb([0, 0, 0])));
  }

  #[test]
  fn rotate_fills_uncovered_corners_with_black() {
    let frame = Frame::from_rgb_image(RgbImage::from_pixel(6, 6, Rgb([255, 255, 255])));
    let out = Transform::Rotate { degrees: 45.0 }.apply(&frame).unwrap();
    assert_eq!(out.shape(), frame.shape());
    for (x, y) in [(0, 0), (5, 0), (0, 5), (5, 5)] {
      assert_eq!(out.buffer().get_pixel(x, y), &Rgb([0, 0, 0]));
    }
    assert!(close(out.buffer().get_pixel(3, 3), &Rgb([255, 255, 255])));
  }

  #[test]
  fn chain_applies_in_order_and_drops_failures() {
    let chain: TransformChain = vec![
      Transform::Resize {
        width: 4,
        height: 4,
      },
      Transform::Crop {
        x: 0,
        y: 0,
        width: 3,
        height: 3,
      },
    ]
    .into_iter()
    .collect();
    assert_eq!(chain.apply(gradient(10, 10)).unwrap().shape(), (3, 3, 3));

    let strict = TransformChain::new(vec![Transform::Crop {
      x: 0,
      y: 0,
      width: 3,
      height: 3,
    }]);
    let frames = vec![gradient(4, 4), gradient(1, 1)];
    assert_eq!(strict.apply_iter(frames.into_iter()).count(), 1);
  }
}
