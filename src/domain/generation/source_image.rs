//! Generation Context - Source Image
//!
//! img2img / ControlNet 附件：校验 base64，并尽可能从 PNG 头读取尺寸

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

use super::Size;

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceImageError {
    #[error("Image attachment is empty")]
    Empty,

    #[error("Image attachment is not valid base64: {0}")]
    InvalidEncoding(String),
}

/// 解码后的附件图片
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    /// 去掉 data URL 前缀后的 base64
    pub data: String,
    /// PNG 图片的尺寸，其他格式为 None
    pub size: Option<Size>,
}

impl SourceImage {
    /// 解析 base64（接受 `data:image/png;base64,` 前缀）
    pub fn decode(encoded: &str) -> Result<Self, SourceImageError> {
        let trimmed = encoded.trim();
        let data = match trimmed.strip_prefix("data:") {
            Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(""),
            None => trimmed,
        };
        if data.is_empty() {
            return Err(SourceImageError::Empty);
        }

        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|e| SourceImageError::InvalidEncoding(e.to_string()))?;
        if bytes.is_empty() {
            return Err(SourceImageError::Empty);
        }

        Ok(Self {
            data: data.to_string(),
            size: png_size(&bytes),
        })
    }
}

/// 读取 IHDR 中的宽高
fn png_size(bytes: &[u8]) -> Option<Size> {
    if bytes.len() < 24 || &bytes[..8] != PNG_SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    if width == 0 || height == 0 {
        return None;
    }
    Some(Size::new(width, height))
}
