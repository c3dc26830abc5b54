//! Preferences Context - Aggregate Root

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 单个用户的偏好设置
///
/// 稀疏记录：未设置的字段回退到命令/全局配置。首次读取时为全部未设置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt_prefix: Option<String>,
}

impl UserPreferences {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 合并更新：`update` 中已设置的字段覆盖当前值
    pub fn merge(&mut self, update: UserPreferences) {
        let UserPreferences {
            checkpoint,
            steps,
            cfg,
            width,
            height,
            count,
            prompt_prefix,
            negative_prompt_prefix,
        } = update;

        if checkpoint.is_some() {
            self.checkpoint = checkpoint;
        }
        if steps.is_some() {
            self.steps = steps;
        }
        if cfg.is_some() {
            self.cfg = cfg;
        }
        if width.is_some() {
            self.width = width;
        }
        if height.is_some() {
            self.height = height;
        }
        if count.is_some() {
            self.count = count;
        }
        if prompt_prefix.is_some() {
            self.prompt_prefix = prompt_prefix;
        }
        if negative_prompt_prefix.is_some() {
            self.negative_prompt_prefix = negative_prompt_prefix;
        }
    }

    /// 清除单个字段
    pub fn reset(&mut self, field: PreferenceField) {
        match field {
            PreferenceField::Checkpoint => self.checkpoint = None,
            PreferenceField::Steps => self.steps = None,
            PreferenceField::Cfg => self.cfg = None,
            PreferenceField::Width => self.width = None,
            PreferenceField::Height => self.height = None,
            PreferenceField::Count => self.count = None,
            PreferenceField::PromptPrefix => self.prompt_prefix = None,
            PreferenceField::NegativePromptPrefix => self.negative_prompt_prefix = None,
        }
    }

    /// 清除全部字段
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// 可个性化的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceField {
    Checkpoint,
    Steps,
    Cfg,
    Width,
    Height,
    Count,
    PromptPrefix,
    NegativePromptPrefix,
}

impl PreferenceField {
    pub const ALL: [PreferenceField; 8] = [
        Self::Checkpoint,
        Self::Steps,
        Self::Cfg,
        Self::Width,
        Self::Height,
        Self::Count,
        Self::PromptPrefix,
        Self::NegativePromptPrefix,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkpoint => "checkpoint",
            Self::Steps => "steps",
            Self::Cfg => "cfg",
            Self::Width => "width",
            Self::Height => "height",
            Self::Count => "count",
            Self::PromptPrefix => "prompt_prefix",
            Self::NegativePromptPrefix => "negative_prompt_prefix",
        }
    }
}

impl fmt::Display for PreferenceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreferenceField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| format!("Unknown preference: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        assert!(UserPreferences::default().is_empty());
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut prefs = UserPreferences {
            steps: Some(30),
            cfg: Some(7.0),
            ..Default::default()
        };
        prefs.merge(UserPreferences {
            steps: Some(20),
            width: Some(768),
            ..Default::default()
        });

        assert_eq!(prefs.steps, Some(20));
        assert_eq!(prefs.cfg, Some(7.0));
        assert_eq!(prefs.width, Some(768));
    }

    #[test]
    fn test_reset_and_clear() {
        let mut prefs = UserPreferences {
            steps: Some(30),
            prompt_prefix: Some("masterpiece".to_string()),
            ..Default::default()
        };
        prefs.reset(PreferenceField::Steps);
        assert_eq!(prefs.steps, None);
        assert!(prefs.prompt_prefix.is_some());

        prefs.clear();
        assert!(prefs.is_empty());
    }

    #[test]
    fn test_field_parsing() {
        assert_eq!(
            "negative_prompt_prefix".parse::<PreferenceField>(),
            Ok(PreferenceField::NegativePromptPrefix)
        );
        assert!("sampler".parse::<PreferenceField>().is_err());
    }

    #[test]
    fn test_unset_fields_are_not_serialized() {
        let prefs = UserPreferences {
            count: Some(4),
            ..Default::default()
        };
        let json = serde_json::to_string(&prefs).unwrap();
        assert_eq!(json, r#"{"count":4}"#);
    }
}
