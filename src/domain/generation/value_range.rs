//! Generation Context - Value Ranges & Layered Resolution

use serde::{Deserialize, Serialize};

/// 数值选项的取值范围 `{min, max, default}`
///
/// 不变量: `min <= default <= max`（由配置校验保证）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange<T> {
    pub min: T,
    pub max: T,
    pub default: T,
}

impl<T: PartialOrd + Copy> ValueRange<T> {
    pub fn new(min: T, max: T, default: T) -> Self {
        Self { min, max, default }
    }

    /// 检查 `min <= default <= max`
    pub fn is_valid(&self) -> bool {
        self.min <= self.default && self.default <= self.max
    }

    /// 值是否落在 `[min, max]` 内
    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }

    /// 把值夹到 `[min, max]`
    pub fn clamp(&self, value: T) -> T {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }
}

/// 命令级的部分取值范围，缺省字段回退到全局范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialValueRange<T> {
    #[serde(default)]
    pub min: Option<T>,
    #[serde(default)]
    pub max: Option<T>,
    #[serde(default)]
    pub default: Option<T>,
}

impl<T: PartialOrd + Copy> PartialValueRange<T> {
    /// 逐字段覆盖全局范围
    pub fn over(&self, base: &ValueRange<T>) -> ValueRange<T> {
        ValueRange {
            min: resolve_layered([self.min], base.min),
            max: resolve_layered([self.max], base.max),
            default: resolve_layered([self.default], base.default),
        }
    }
}

/// 命令级可选范围叠加到全局范围之上
pub fn effective_range<T: PartialOrd + Copy>(
    partial: Option<&PartialValueRange<T>>,
    base: &ValueRange<T>,
) -> ValueRange<T> {
    partial.map(|p| p.over(base)).unwrap_or(*base)
}

/// 按优先级从高到低返回第一个存在的值
pub fn first_present<T, I>(layers: I) -> Option<T>
where
    I: IntoIterator<Item = Option<T>>,
{
    layers.into_iter().flatten().next()
}

/// 分层解析
///
/// 按优先级从高到低依次查看 `overrides`，返回第一个存在的值；都不存在时返回 `base`
pub fn resolve_layered<T, I>(overrides: I, base: T) -> T
where
    I: IntoIterator<Item = Option<T>>,
{
    first_present(overrides).unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_priority() {
        let override_value = Some(5);
        let preference = Some(3);
        let command_default = Some(2);
        let global_default = 1;

        assert_eq!(
            resolve_layered([override_value, preference, command_default], global_default),
            5
        );
        assert_eq!(
            resolve_layered([None, preference, command_default], global_default),
            3
        );
        assert_eq!(resolve_layered([None, None, command_default], global_default), 2);
        assert_eq!(resolve_layered([None, None, None], global_default), 1);
    }

    #[test]
    fn test_first_present() {
        assert_eq!(first_present([None, Some("b"), Some("c")]), Some("b"));
        assert_eq!(first_present::<u32, _>([None, None]), None);
    }

    #[test]
    fn test_partial_range_falls_back_field_by_field() {
        let global = ValueRange::new(1u32, 40, 25);
        let partial = PartialValueRange {
            min: None,
            max: Some(60),
            default: Some(30),
        };
        assert_eq!(partial.over(&global), ValueRange::new(1, 60, 30));
        assert_eq!(effective_range(None, &global), global);
    }

    #[test]
    fn test_clamp_and_validity() {
        let range = ValueRange::new(1.0, 30.0, 6.0);
        assert_eq!(range.clamp(45.0), 30.0);
        assert_eq!(range.clamp(0.5), 1.0);
        assert_eq!(range.clamp(7.5), 7.5);
        assert!(range.is_valid());
        assert!(!ValueRange::new(1, 10, 11).is_valid());
        assert!(range.contains(30.0));
        assert!(!range.contains(30.1));
    }
}
