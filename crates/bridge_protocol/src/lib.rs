pub mod jsonrpc;
pub mod message;

pub use jsonrpc::{Id, Message, Request, Response, RpcMethod};
pub use message::{
    LogLevel, PromptDescriptor, PromptGetResult, ResourceDescriptor, ToolCallParams, ToolCallResult,
    ToolContent, ToolDescriptor,
};
