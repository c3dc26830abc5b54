//! Preference Store Port - 用户偏好持久化

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::preferences::UserPreferences;

/// 偏好存储错误
#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Preference Store Port
///
/// 以用户标识为键的简单键值存储
#[async_trait]
pub trait PreferenceStorePort: Send + Sync {
    /// 读取偏好，不存在时返回全部未设置
    async fn read(&self, user_id: &str) -> Result<UserPreferences, PreferenceError>;

    /// 写入偏好
    async fn write(&self, user_id: &str, preferences: &UserPreferences)
        -> Result<(), PreferenceError>;
}
