//! 类型模块：聊天消息与补全响应。
//!
//! # Types Module
//!
//! Provider-agnostic representations of the chat-completion contract.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChatMessage`] | One `{role, content}` message |
//! | [`MessageRole`] | `system`, `user` or `assistant` |
//! | [`ChatCompletionResponse`] | Normalized provider answer with token usage |
//! | [`ResponseFormat`] | Requested output shape (`json`, `text`) |

pub mod completion;
pub mod message;

pub use completion::{ChatCompletionResponse, ResponseFormat, Usage};
pub use message::{ChatMessage, MessageRole};
pub(crate) use message::render_transcript;
