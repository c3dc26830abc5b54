//! LoRA Query Handlers

use std::sync::Arc;

use crate::application::error::ApplicationError;
use crate::application::queries::{GetLora, ListLoras};
use crate::domain::lora::{Lora, LoraCatalog};

// ============================================================================
// Response DTOs
// ============================================================================

/// 列表条目
#[derive(Debug, Clone, PartialEq)]
pub struct LoraSummary {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
}

impl From<&Lora> for LoraSummary {
    fn from(lora: &Lora) -> Self {
        Self {
            id: lora.id.clone(),
            name: lora.name.clone(),
            tags: lora.tags.clone(),
        }
    }
}

/// 列表响应
#[derive(Debug, Clone)]
pub struct LoraListResponse {
    pub loras: Vec<LoraSummary>,
    /// 可用于过滤的标签
    pub tags: Vec<String>,
}

/// LoRA 详情响应
#[derive(Debug, Clone)]
pub struct LoraInfoResponse {
    pub id: String,
    pub name: String,
    /// 加进 prompt 即可生效，如 `<lora:fox:0.8>`
    pub activation_key: String,
    pub keywords: Vec<String>,
    pub weight_hint: Option<String>,
    pub tags: Vec<String>,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl From<&Lora> for LoraInfoResponse {
    fn from(lora: &Lora) -> Self {
        Self {
            id: lora.id.clone(),
            name: lora.name.clone(),
            activation_key: lora.activation_key(),
            keywords: lora.keywords.clone(),
            weight_hint: lora.weight_hint(),
            tags: lora.tags.clone(),
            url: lora.url.clone().filter(|url| !url.trim().is_empty()),
            thumbnail_url: lora.thumbnail_url.clone().filter(|url| !url.trim().is_empty()),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// ListLoras Handler
pub struct ListLorasHandler {
    catalog: Arc<LoraCatalog>,
}

impl ListLorasHandler {
    pub fn new(catalog: Arc<LoraCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn handle(&self, query: ListLoras) -> Result<LoraListResponse, ApplicationError> {
        let tag = query.tag.as_deref().filter(|tag| !tag.is_empty());
        let loras: Vec<LoraSummary> = match query.query.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => self
                .catalog
                .search(text, tag, query.nsfw)
                .into_iter()
                .map(LoraSummary::from)
                .collect(),
            _ => self
                .catalog
                .filtered(tag, query.nsfw)
                .map(LoraSummary::from)
                .collect(),
        };

        tracing::debug!(count = loras.len(), nsfw = query.nsfw, "Listed LoRAs");
        Ok(LoraListResponse {
            loras,
            tags: self.catalog.tags_in_use(query.nsfw),
        })
    }
}

/// GetLora Handler
pub struct GetLoraHandler {
    catalog: Arc<LoraCatalog>,
}

impl GetLoraHandler {
    pub fn new(catalog: Arc<LoraCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn handle(&self, query: GetLora) -> Result<LoraInfoResponse, ApplicationError> {
        let lora = self
            .catalog
            .find(&query.id, query.nsfw)
            .ok_or_else(|| ApplicationError::not_found("LoRA", query.id.as_str()))?;

        Ok(LoraInfoResponse::from(lora))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lora::RecommendedWeights;

    fn catalog() -> Arc<LoraCatalog> {
        let lora = |id: &str, tags: &[&str], nsfw: bool| Lora {
            id: id.to_string(),
            name: format!("{} LoRA", id),
            url: Some(" ".to_string()),
            thumbnail_url: None,
            nsfw,
            recommended_weights: None,
            keywords: Vec::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        };
        let mut fox = lora("fox", &["animal"], false);
        fox.keywords = vec!["fox ears".to_string()];
        fox.recommended_weights = Some(RecommendedWeights {
            low: Some(0.6),
            high: Some(0.9),
            default: Some(0.8),
        });

        Arc::new(LoraCatalog::new(
            vec!["animal".to_string(), "style".to_string()],
            vec![
                fox,
                lora("ink", &["style"], false),
                lora("secret", &["style"], true),
            ],
        ))
    }

    #[tokio::test]
    async fn test_list_filters_by_tag_and_query() {
        let handler = ListLorasHandler::new(catalog());

        let all = handler.handle(ListLoras::default()).await.unwrap();
        assert_eq!(all.loras.len(), 2);
        assert_eq!(all.tags, vec!["animal", "style"]);

        let styles = handler
            .handle(ListLoras {
                tag: Some("style".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(styles.loras.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), vec!["ink"]);

        let found = handler
            .handle(ListLoras {
                query: Some(" FOX ".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.loras.len(), 1);
        assert_eq!(found.loras[0].name, "fox LoRA");
    }

    #[tokio::test]
    async fn test_info_describes_usage() {
        let handler = GetLoraHandler::new(catalog());

        let info = handler
            .handle(GetLora {
                id: "fox".to_string(),
                nsfw: false,
            })
            .await
            .unwrap();
        assert_eq!(info.activation_key, "<lora:fox:0.8>");
        assert_eq!(info.weight_hint.as_deref(), Some("0.6 - 0.9"));
        assert_eq!(info.keywords, vec!["fox ears"]);
        assert_eq!(info.url, None);
    }

    #[tokio::test]
    async fn test_info_hides_other_catalog() {
        let handler = GetLoraHandler::new(catalog());

        let err = handler
            .handle(GetLora {
                id: "secret".to_string(),
                nsfw: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::NotFound { .. }));

        assert!(handler
            .handle(GetLora {
                id: "secret".to_string(),
                nsfw: true,
            })
            .await
            .is_ok());
    }
}
