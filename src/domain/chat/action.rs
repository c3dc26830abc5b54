//! Chat Actions - 对最后一条消息的回应方式

use serde::{Deserialize, Serialize};

/// 机器人对对话中最后一条消息采取的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatAction {
    Respond,
    Explain,
    Inquire,
    Brainstorm,
    Recall,
    GenerateImage,
    UpdateImage,
}

impl ChatAction {
    pub const ALL: [ChatAction; 7] = [
        ChatAction::Respond,
        ChatAction::Explain,
        ChatAction::Inquire,
        ChatAction::Brainstorm,
        ChatAction::Recall,
        ChatAction::GenerateImage,
        ChatAction::UpdateImage,
    ];

    /// 模型输出中使用的标签
    pub fn label(&self) -> &'static str {
        match self {
            ChatAction::Respond => "RESPOND",
            ChatAction::Explain => "EXPLAIN",
            ChatAction::Inquire => "INQUIRE",
            ChatAction::Brainstorm => "BRAINSTORM",
            ChatAction::Recall => "RECALL",
            ChatAction::GenerateImage => "GENERATE_IMAGE",
            ChatAction::UpdateImage => "UPDATE_IMAGE",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ChatAction::Respond => "Reply with a short message",
            ChatAction::Explain => "Reply with a detailed explanation of the topic",
            ChatAction::Inquire => "Ask the user for more information",
            ChatAction::Brainstorm => "Come up with ideas the user asked for",
            ChatAction::Recall => "Look up something mentioned earlier in the conversation",
            ChatAction::GenerateImage => "Draw a new image the user explicitly asked for",
            ChatAction::UpdateImage => {
                "Change a previously generated image (retry, resize or adjust its parameters)"
            }
        }
    }

    /// 生成回复时附加的系统指令
    pub fn instruction(&self) -> &'static str {
        match self {
            ChatAction::Respond => "Reply to the last message casually.",
            ChatAction::Explain => {
                "Reply to the last message by explaining the topic as well as you can."
            }
            ChatAction::Inquire => {
                "Reply to the last message and ask for more details about the topic."
            }
            ChatAction::Brainstorm => {
                "Reply to the last message with a few creative ideas related to the topic."
            }
            ChatAction::Recall => {
                "Search the conversation for what the last message refers to and reply with what you find."
            }
            ChatAction::GenerateImage => {
                "Reply to the last message and tell the user that the requested image is being drawn."
            }
            ChatAction::UpdateImage => {
                "Reply to the last message and tell the user that the previous image is being updated."
            }
        }
    }

    /// 是否需要在回复之后出图
    pub fn wants_image(&self) -> bool {
        matches!(self, ChatAction::GenerateImage | ChatAction::UpdateImage)
    }

    /// 取模型输出中最先出现的动作标签
    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .filter_map(|action| text.find(action.label()).map(|index| (index, *action)))
            .min_by_key(|(index, _)| *index)
            .map(|(_, action)| action)
    }
}

/// 动作选择的系统指令
pub fn action_choice_instruction(bot_name: &str) -> String {
    let actions = ChatAction::ALL
        .iter()
        .map(|action| format!("  {}: {}", action.label(), action.description()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{bot} is a chat bot that normally answers with text. \
         When a user explicitly asks for a picture, {bot} can draw one instead, \
         and it can rework pictures it drew earlier. \
         Read the conversation below and decide how {bot} should respond to the last message.\n\n\
         Pick exactly one action:\n{actions}",
        bot = bot_name,
        actions = actions,
    )
}
