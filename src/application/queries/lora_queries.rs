//! LoRA Queries

/// 列出 LoRA
///
/// `tag` 与 `query` 同时给出时先按标签过滤再搜索
#[derive(Debug, Clone, Default)]
pub struct ListLoras {
    pub nsfw: bool,
    pub tag: Option<String>,
    pub query: Option<String>,
}

/// 获取 LoRA 详情
#[derive(Debug, Clone)]
pub struct GetLora {
    pub id: String,
    pub nsfw: bool,
}
