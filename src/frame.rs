// 该文件是 Xunshan （巡山） 项目的一部分。
// src/frame.rs - NHWC 输入帧定义
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

use std::borrow::Cow;

use image::{DynamicImage, RgbImage, imageops::FilterType};
use tracing::debug;

const RGB_CHANNELS: usize = 3;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 单批次 NHWC 排列的 RGB 字节帧，即模型的 `u8` 输入张量
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  height: usize,
  width: usize,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let size = RGB_CHANNELS * width * height;
    let data = vec![0u8; size].into_boxed_slice();
    Self {
      height,
      width,
      data,
    }
  }

  /// 缩放到 `width × height` 并统一为三通道后填充到新帧
  pub fn from_image(image: &DynamicImage, width: u32, height: u32) -> Self {
    let resized = if image.width() == width && image.height() == height {
      Cow::Borrowed(image)
    } else {
      Cow::Owned(image.resize_exact(width, height, FilterType::Triangle))
    };
    let rgb = normalize_channels(&resized);

    let mut frame = Self::with_shape(height as usize, width as usize);
    let copied = frame.copy_from_bytes(rgb.as_raw());
    debug!(
      "输入帧: {}x{} -> {}x{}, 复制 {} / {} 字节",
      image.width(),
      image.height(),
      width,
      height,
      copied,
      frame.data.len()
    );
    frame
  }

  /// 逐字节复制，长度取源数据与帧容量中较小者，返回实际复制的字节数
  pub fn copy_from_bytes(&mut self, src: &[u8]) -> usize {
    let len = src.len().min(self.data.len());
    self.data[..len].copy_from_slice(&src[..len]);
    len
  }

  /// 输入张量形状 `[1, height, width, 3]`，即 NHWC 行优先排列。
  ///
  /// 旧版 SDK 声明的形状为 `[1, width, height, 3]`，宽高不等时两者不同；
  /// 像素数据按行存放，只有高度在前的形状与数据一致。
  pub fn tensor_shape(&self) -> Vec<i64> {
    vec![1, self.height as i64, self.width as i64, RGB_CHANNELS as i64]
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

/// 灰度图复制为三通道，带 alpha 的图像丢弃 alpha，8 位 RGB 原样返回
pub fn normalize_channels(image: &DynamicImage) -> RgbImage {
  match image {
    DynamicImage::ImageRgb8(rgb) => rgb.clone(),
    other => {
      debug!("通道转换: {:?} -> Rgb8", other.color());
      other.to_rgb8()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, Luma, Rgb, RgbaImage, Rgba};

  #[test]
  fn grayscale_is_replicated_to_three_channels() {
    let gray = GrayImage::from_fn(3, 2, |x, y| Luma([(10 * (x + 3 * y)) as u8]));
    let rgb = normalize_channels(&DynamicImage::ImageLuma8(gray));

    assert_eq!(rgb.dimensions(), (3, 2));
    assert_eq!(rgb.as_raw().len(), 3 * 2 * 3);
    assert_eq!(rgb.get_pixel(2, 1), &Rgb([50, 50, 50]));
  }

  #[test]
  fn alpha_channel_is_dropped() {
    let rgba = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 128]));
    let rgb = normalize_channels(&DynamicImage::ImageRgba8(rgba));

    assert_eq!(rgb.as_raw().len(), 2 * 2 * 3);
    assert_eq!(rgb.get_pixel(1, 1), &Rgb([1, 2, 3]));
  }

  #[test]
  fn rgb_passes_through_unchanged() {
    let src = RgbImage::from_fn(4, 4, |x, y| Rgb([x as u8, y as u8, 7]));
    let rgb = normalize_channels(&DynamicImage::ImageRgb8(src.clone()));
    assert_eq!(rgb, src);
  }

  #[test]
  fn frame_has_model_shape_after_resize() {
    let gray = GrayImage::from_pixel(40, 20, Luma([200]));
    let frame = RgbNhwcFrame::from_image(&DynamicImage::ImageLuma8(gray), 30, 10);

    assert_eq!(frame.tensor_shape(), vec![1, 10, 30, 3]);
    assert_eq!(frame.as_nhwc().len(), 10 * 30 * 3);
    assert!(frame.as_nhwc().iter().all(|&v| v == 200));
  }

  #[test]
  fn copy_truncates_to_capacity() {
    let mut frame = RgbNhwcFrame::with_shape(1, 2);
    assert_eq!(frame.copy_from_bytes(&[9u8; 10]), 6);
    assert_eq!(frame.as_nhwc(), &[9u8; 6]);

    let mut frame = RgbNhwcFrame::with_shape(1, 2);
    assert_eq!(frame.copy_from_bytes(&[5u8; 4]), 4);
    assert_eq!(frame.as_nhwc(), &[5, 5, 5, 5, 0, 0]);
  }
}
