//! Chat Image Request - 从模型输出中提取出图参数
//!
//! 模型按 `| key=value | key=value` 的格式输出，键名大小写与分隔符不敏感

use crate::domain::generation::Checkpoint;

/// 模型给出的出图参数，只有 prompt 是必需的
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatImageRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub checkpoint: Option<String>,
    pub seed: Option<u32>,
}

/// 参数输出的起始前缀，作为助手消息的开头交给模型续写
pub const IMAGE_PARAMETERS_PREFIX: &str = "| prompt=";

/// negativePrompt / negative_prompt / Negative prompt 都归一为 negativeprompt
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn clean_value(value: &str) -> String {
    value
        .trim()
        .trim_end_matches(['.', ','])
        .trim_matches('"')
        .trim()
        .to_string()
}

/// "640x480"、"640 X 480 pixels"
fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.split_once(['x', 'X'])?;
    let width: String = width
        .trim_end()
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let height: String = height
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    Some((width.parse().ok()?, height.parse().ok()?))
}

fn parse_dimension(value: &str) -> Option<u32> {
    let value: f64 = value.parse().ok()?;
    let value = value.abs().round();
    (value <= f64::from(u32::MAX)).then_some(value as u32)
}

fn parse_seed(value: &str) -> Option<u32> {
    let value: i64 = value.parse().ok()?;
    u32::try_from(value.unsigned_abs()).ok()
}

impl ChatImageRequest {
    /// 解析模型输出；缺少 prompt 时返回 None
    ///
    /// 第一段没有 `=` 时视为 prompt 本身（模型只续写了前缀之后的部分）
    pub fn parse(text: &str) -> Option<Self> {
        let mut fields: Vec<(String, String)> = Vec::new();
        for segment in text.split(['|', '\n']) {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            match segment.split_once('=') {
                Some((key, value)) => fields.push((normalize_key(key), clean_value(value))),
                None if fields.is_empty() => fields.push(("prompt".to_string(), clean_value(segment))),
                None => {}
            }
        }

        let field = |name: &str| {
            fields
                .iter()
                .find(|(key, value)| key == name && !value.is_empty())
                .map(|(_, value)| value.as_str())
        };

        let prompt = field("prompt")?.to_string();
        let size = field("size").and_then(parse_size);

        Some(Self {
            prompt,
            negative_prompt: field("negativeprompt").map(str::to_string),
            width: field("width")
                .and_then(parse_dimension)
                .or(size.map(|(width, _)| width)),
            height: field("height")
                .and_then(parse_dimension)
                .or(size.map(|(_, height)| height)),
            checkpoint: field("checkpoint").map(str::to_string),
            seed: field("seed").and_then(parse_seed),
        })
    }
}

/// 按 id 或名称（不区分大小写）匹配已安装的 checkpoint，返回其 id
pub fn match_checkpoint(requested: &str, installed: &[Checkpoint]) -> Option<String> {
    installed
        .iter()
        .find(|c| c.id.eq_ignore_ascii_case(requested) || c.name.eq_ignore_ascii_case(requested))
        .map(|c| c.id.clone())
}

/// 出图参数提取的系统指令
pub fn image_parameters_instruction(bot_name: &str, checkpoints: &[Checkpoint]) -> String {
    let mut instruction = format!(
        "Read the conversation below and work out the parameters of the image {} should draw. \
         Write them as key=value pairs separated by |. \
         Be creative where the request leaves room.\n\n\
         Parameters:\n\
         \x20 prompt: what the image shows (required)\n\
         \x20 negativePrompt: what the image must not show\n\
         \x20 size: WIDTHxHEIGHT in pixels\n\
         \x20 checkpoint: the model to draw with\n\
         \x20 seed: a number that fixes the random noise",
        bot_name
    );
    if !checkpoints.is_empty() {
        let names = checkpoints
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        instruction.push_str("\n\nAvailable checkpoints: ");
        instruction.push_str(&names);
    }
    instruction
}
