//! Preferences Context - 用户偏好限界上下文
//!
//! 职责:
//! - 每个用户的稀疏参数覆盖
//! - 设置 / 重置 / 清除

mod aggregate;

pub use aggregate::{PreferenceField, UserPreferences};
