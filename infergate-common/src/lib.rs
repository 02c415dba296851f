//! infergate common types
//!
//! Wire types shared by the gateway and by client code talking to it.

pub mod chat;

pub use chat::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, CompletionOutput, Usage,
};
