//! File Preference Store - 每个用户一个 JSON 文件
//!
//! 实现 PreferenceStorePort trait

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::application::ports::{PreferenceError, PreferenceStorePort};
use crate::domain::preferences::UserPreferences;

/// 把用户标识转换为安全的文件名
///
/// 字母、数字、`-` 原样保留，其余字节编码为 `_xx`，不同标识不会映射到同一文件
fn sanitize_user_id(user_id: &str) -> String {
    if user_id.is_empty() {
        return "_".to_string();
    }
    let mut name = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("_{:02x}", byte));
        }
    }
    name
}

/// 文件系统偏好存储
pub struct FilePreferenceStore {
    base_dir: PathBuf,
}

impl FilePreferenceStore {
    /// 创建存储并确保目录存在
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let base_dir = base_dir.as_ref().to_path_buf();

        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| PreferenceError::IoError(e.to_string()))?;

        Ok(Self { base_dir })
    }

    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.json", sanitize_user_id(user_id)))
    }
}

#[async_trait]
impl PreferenceStorePort for FilePreferenceStore {
    async fn read(&self, user_id: &str) -> Result<UserPreferences, PreferenceError> {
        let path = self.path_for(user_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(UserPreferences::default()),
            Err(e) => return Err(PreferenceError::IoError(e.to_string())),
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| PreferenceError::SerializationError(e.to_string()))
    }

    async fn write(
        &self,
        user_id: &str,
        preferences: &UserPreferences,
    ) -> Result<(), PreferenceError> {
        let path = self.path_for(user_id);
        let data = serde_json::to_vec_pretty(preferences)
            .map_err(|e| PreferenceError::SerializationError(e.to_string()))?;

        // 先写临时文件再改名，读者不会看到写了一半的文件
        let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp_path, data)
            .await
            .map_err(|e| PreferenceError::IoError(e.to_string()))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| PreferenceError::IoError(e.to_string()))?;

        tracing::debug!(user_id = %user_id, path = %path.display(), "Saved preferences");
        Ok(())
    }
}
