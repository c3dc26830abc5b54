//! Chat Context - 对话动作与出图参数提取

mod action;
mod image_request;

pub use action::{action_choice_instruction, ChatAction};
pub use image_request::{
    image_parameters_instruction, match_checkpoint, ChatImageRequest, IMAGE_PARAMETERS_PREFIX,
};
