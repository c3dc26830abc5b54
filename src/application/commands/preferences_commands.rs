//! Preferences Commands - 用户偏好子命令

use crate::domain::preferences::{PreferenceField, UserPreferences};

/// 偏好子命令（封闭集合）
#[derive(Debug, Clone, PartialEq)]
pub enum PreferencesCommand {
    /// 查看当前偏好
    List,
    /// 设置给定字段
    Set(UserPreferences),
    /// 重置给定字段
    Reset(Vec<PreferenceField>),
    /// 清除全部偏好
    Clear,
}

impl PreferencesCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Set(_) => "set",
            Self::Reset(_) => "reset",
            Self::Clear => "clear",
        }
    }
}
