pub mod gateway;
#[cfg(test)]
pub mod mock;
pub mod retry;

pub use gateway::{
    ChatMessage, ContentPart, Gateway, GatewayConfig, GatewayError, GatewayReply, GatewayRequest,
    HttpGateway,
};
pub use retry::{RetryPolicy, retry_upstream};
