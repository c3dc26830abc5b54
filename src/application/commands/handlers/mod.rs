//! Command Handlers 实现

mod chat_handlers;
mod generation_handlers;
mod parameter_resolver;
mod preferences_handlers;

pub use chat_handlers::ChatCompletionHandler;
pub use generation_handlers::{GenerationOrchestrator, PendingGeneration};
pub use parameter_resolver::ParameterResolver;
pub use preferences_handlers::PreferencesHandler;
