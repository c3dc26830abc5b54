//! Generation Context - Prompt Prefix Merge

/// 提示词分段分隔符（后端按此拆分为多个组合提示）
const AND_SEPARATOR: &str = " AND ";

/// 把"始终包含"的前缀合并到调用方提供的提示词中
///
/// - 前缀为空时返回原文本
/// - 文本为空时返回前缀
/// - 否则返回 `prefix + ", " + text`，并且文本中的每个 ` AND ` 分段也都带上前缀
///
/// 空字符串与缺省等价
pub fn merge_prefix(prefix: Option<&str>, text: Option<&str>) -> Option<String> {
    let prefix = prefix.filter(|p| !p.is_empty());
    let text = text.filter(|t| !t.is_empty());

    match (prefix, text) {
        (None, text) => text.map(str::to_string),
        (Some(prefix), None) => Some(prefix.to_string()),
        (Some(prefix), Some(text)) => {
            let segmented = text.replace(AND_SEPARATOR, &format!("{}{}, ", AND_SEPARATOR, prefix));
            Some(format!("{}, {}", prefix, segmented))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_and_text() {
        assert_eq!(
            merge_prefix(Some("masterpiece"), Some("cat")).as_deref(),
            Some("masterpiece, cat")
        );
    }

    #[test]
    fn test_missing_prefix() {
        assert_eq!(merge_prefix(None, Some("cat")).as_deref(), Some("cat"));
        assert_eq!(merge_prefix(Some(""), Some("cat")).as_deref(), Some("cat"));
    }

    #[test]
    fn test_missing_text() {
        assert_eq!(
            merge_prefix(Some("masterpiece"), None).as_deref(),
            Some("masterpiece")
        );
        assert_eq!(
            merge_prefix(Some("masterpiece"), Some("")).as_deref(),
            Some("masterpiece")
        );
    }

    #[test]
    fn test_both_missing() {
        assert_eq!(merge_prefix(None, None), None);
    }

    #[test]
    fn test_and_segments_receive_prefix() {
        assert_eq!(
            merge_prefix(Some("best quality"), Some("a cat AND a dog")).as_deref(),
            Some("best quality, a cat AND best quality, a dog")
        );
    }
}
