//! Generation Context - Image Size
//!
//! 纯几何计算：根据部分指定的宽高得到期望尺寸，并按像素预算等比缩小

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Mul;

/// 图片尺寸
///
/// 所有运算都在 u32/u64 域内完成，像素数使用 u64 避免溢出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 像素总数
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// 宽高比（width / height），高度为 0 时返回 0
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        f64::from(self.width) / f64::from(self.height)
    }

    /// 按浮点倍率缩放（向下取整）
    pub fn scale(&self, factor: f64) -> Size {
        Size {
            width: (f64::from(self.width) * factor) as u32,
            height: (f64::from(self.height) * factor) as u32,
        }
    }

    /// 约束到像素预算内
    ///
    /// - 像素数为 0 时返回 1x1
    /// - 超出预算时保持宽高比缩小：
    ///   `w = floor(sqrt(max * ratio))`, `h = floor(sqrt(max / ratio))`
    /// - 否则原样返回
    ///
    /// 结果像素数不超过输入像素数，且对同一预算幂等
    pub fn constrain(&self, max_pixels: u64) -> Size {
        let max_pixels = max_pixels.max(1);

        if self.pixel_count() == 0 {
            return Size::new(1, 1);
        }
        if self.pixel_count() <= max_pixels {
            return *self;
        }

        let ratio = self.aspect_ratio();
        let budget = max_pixels as f64;
        let mut width = (budget * ratio).sqrt().floor() as u64;
        let mut height = (budget / ratio).sqrt().floor() as u64;

        // 极端宽高比下某一边会被压到 0，此时固定为 1 并把预算全部给另一边
        if width == 0 {
            width = 1;
            height = max_pixels.min(u64::from(self.height));
        } else if height == 0 {
            height = 1;
            width = max_pixels.min(u64::from(self.width));
        }

        Size::new(width as u32, height as u32)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 溢出时饱和到 `u32::MAX`
impl Mul<u32> for Size {
    type Output = Size;

    fn mul(self, rhs: u32) -> Size {
        Size::new(self.width.saturating_mul(rhs), self.height.saturating_mul(rhs))
    }
}

impl Mul<f64> for Size {
    type Output = Size;

    fn mul(self, rhs: f64) -> Size {
        self.scale(rhs)
    }
}

/// 计算期望尺寸
///
/// - 未指定的维度使用命令默认值
/// - 显式指定为 0 的维度使用原图（img2img）对应维度，没有原图时回退到默认值
///
/// 返回的宽高始终为正数
pub fn resolve_desired_size(
    specified_width: Option<u32>,
    specified_height: Option<u32>,
    original_width: Option<u32>,
    original_height: Option<u32>,
    default_width: u32,
    default_height: u32,
) -> Size {
    let pick = |specified: Option<u32>, original: Option<u32>, default: u32| -> u32 {
        let value = match specified {
            None => default,
            Some(0) => original.filter(|v| *v > 0).unwrap_or(default),
            Some(v) => v,
        };
        value.max(1)
    };

    Size::new(
        pick(specified_width, original_width, default_width),
        pick(specified_height, original_height, default_height),
    )
}
