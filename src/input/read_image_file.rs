// 该文件是 Guanzhao （观照） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{io::Cursor, path::Path};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 读取图像文件并统一转换为 8 位 RGB 帧
pub fn load_rgb_image(path: impl AsRef<Path>) -> Result<Frame, ImageFileInputError> {
  let path = path.as_ref();
  debug!("读取图像文件: {}", path.display());
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  Ok(Frame::from_rgb_image(image.to_rgb8()))
}

/// 从内存中的字节解码图像
pub fn decode_image_bytes(bytes: &[u8]) -> Result<Frame, ImageFileInputError> {
  let image = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()?
    .decode()?;
  Ok(Frame::from_rgb_image(image.to_rgb8()))
}

pub struct ImageFileInput {
  frame: Option<Frame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let frame = load_rgb_image(url_file_path(url))?;

    Ok(ImageFileInput { frame: Some(frame) })
  }
}

impl ImageFileInput {
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageFileInputError> {
    Ok(ImageFileInput {
      frame: Some(decode_image_bytes(bytes)?),
    })
  }

  pub fn into_frames(self) -> ImageFileInputIter {
    ImageFileInputIter { inner: self }
  }
}

pub struct ImageFileInputIter {
  inner: ImageFileInput,
}

impl Iterator for ImageFileInputIter {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.frame.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb, RgbImage};

  fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]));
    let mut bytes = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    bytes
  }

  #[test]
  fn decode_bytes_keeps_declared_shape() {
    let frame = decode_image_bytes(&png_bytes(7, 4)).unwrap();
    assert_eq!(frame.shape(), (4, 7, 3));
    assert_eq!(&frame.as_raw()[3..6], &[1, 0, 7]);
  }

  #[test]
  fn malformed_bytes_are_a_decode_error() {
    let err = decode_image_bytes(b"definitely not an image").unwrap_err();
    assert!(matches!(
      err,
      ImageFileInputError::ImageLoadError(_) | ImageFileInputError::IoError(_)
    ));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let err = load_rgb_image("/nonexistent/guanzhao/none.png").unwrap_err();
    assert!(matches!(err, ImageFileInputError::IoError(_)));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("folder:///tmp").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }

  #[test]
  fn input_from_bytes_is_single_shot() {
    let mut frames = ImageFileInput::from_bytes(&png_bytes(2, 2))
      .unwrap()
      .into_frames();
    assert!(frames.next().is_some());
    assert!(frames.next().is_none());
  }
}
