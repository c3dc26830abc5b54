//! LoRA Catalog

use serde::{Deserialize, Serialize};

/// 搜索结果上限
pub const SEARCH_LIMIT: usize = 25;

/// 推荐权重，三项都可缺省
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendedWeights {
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub default: Option<f64>,
}

/// 整数权重也保留一位小数，与激活键的写法一致
fn format_weight(weight: f64) -> String {
    if weight.fract() == 0.0 {
        format!("{:.1}", weight)
    } else {
        weight.to_string()
    }
}

impl RecommendedWeights {
    /// 给用户看的权重提示，三项都缺省时为 None
    pub fn describe(&self) -> Option<String> {
        match (self.low, self.high, self.default) {
            (None, None, None) => None,
            (None, None, Some(default)) => Some(format!("around {}", format_weight(default))),
            (Some(low), None, _) => Some(format!("{} or higher", format_weight(low))),
            (None, Some(high), _) => Some(format!("{} or lower", format_weight(high))),
            (Some(low), Some(high), _) => Some(format!(
                "{} - {}",
                format_weight(low),
                format_weight(high)
            )),
        }
    }
}

/// 一个已安装的 LoRA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lora {
    /// 激活键中使用的标识
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub recommended_weights: Option<RecommendedWeights>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Lora {
    /// 写进 prompt 的激活键，如 `<lora:fox:0.8>`
    pub fn activation_key(&self) -> String {
        let weight = self
            .recommended_weights
            .and_then(|w| w.default)
            .unwrap_or(1.0);
        format!("<lora:{}:{}>", self.id, format_weight(weight))
    }

    pub fn weight_hint(&self) -> Option<String> {
        self.recommended_weights.as_ref().and_then(RecommendedWeights::describe)
    }

    fn search_key(&self) -> String {
        std::iter::once(self.id.as_str())
            .chain(std::iter::once(self.name.as_str()))
            .chain(self.tags.iter().map(String::as_str))
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// LoRA 目录
#[derive(Debug, Clone, Default)]
pub struct LoraCatalog {
    tags: Vec<String>,
    installed: Vec<Lora>,
}

impl LoraCatalog {
    /// `tags` 为展示用的标签顺序
    pub fn new(tags: Vec<String>, installed: Vec<Lora>) -> Self {
        Self { tags, installed }
    }

    /// nsfw 标记与请求一致的 LoRA
    pub fn visible(&self, nsfw: bool) -> impl Iterator<Item = &Lora> {
        self.installed.iter().filter(move |l| l.nsfw == nsfw)
    }

    pub fn find(&self, id: &str, nsfw: bool) -> Option<&Lora> {
        self.visible(nsfw).find(|l| l.id == id)
    }

    /// 配置的标签中至少被一个可见 LoRA 使用的部分，保持配置顺序
    pub fn tags_in_use(&self, nsfw: bool) -> Vec<String> {
        self.tags
            .iter()
            .filter(|tag| self.visible(nsfw).any(|l| l.tags.contains(*tag)))
            .cloned()
            .collect()
    }

    /// 可见且带有 `tag` 的 LoRA；`tag` 为 None 时不过滤
    pub fn filtered<'a>(
        &'a self,
        tag: Option<&'a str>,
        nsfw: bool,
    ) -> impl Iterator<Item = &'a Lora> {
        self.visible(nsfw)
            .filter(move |l| tag.map_or(true, |tag| l.tags.iter().any(|t| t == tag)))
    }

    /// 按关键词在 id、名称与标签中出现的次数排序，最多返回 25 个
    pub fn search<'a>(&'a self, query: &str, tag: Option<&'a str>, nsfw: bool) -> Vec<&'a Lora> {
        let query = query.to_lowercase();
        if query.is_empty() {
            return self.filtered(tag, nsfw).take(SEARCH_LIMIT).collect();
        }

        let mut hits: Vec<(usize, &Lora)> = self
            .filtered(tag, nsfw)
            .map(|l| (l.search_key().matches(query.as_str()).count(), l))
            .filter(|(count, _)| *count > 0)
            .collect();
        // 稳定排序，次数相同时保持配置顺序
        hits.sort_by(|a, b| b.0.cmp(&a.0));
        hits.into_iter().take(SEARCH_LIMIT).map(|(_, l)| l).collect()
    }
}
