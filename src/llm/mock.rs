use super::gateway::{Gateway, GatewayError, GatewayReply, GatewayRequest, MessageContent};
use async_trait::async_trait;
use std::sync::Mutex;

type Responder = dyn Fn(&GatewayRequest) -> Result<GatewayReply, GatewayError> + Send + Sync;

/// Test gateway that answers from a closure and records every request.
pub struct ScriptedGateway {
    responder: Box<Responder>,
    calls: Mutex<Vec<GatewayRequest>>,
}

impl ScriptedGateway {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GatewayRequest) -> Result<GatewayReply, GatewayError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: GatewayError) -> Self {
        Self::new(move |_| Err(err.clone()))
    }

    pub fn calls(&self) -> Vec<GatewayRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn invoke(&self, request: &GatewayRequest) -> Result<GatewayReply, GatewayError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.responder)(request)
    }
}

/// Concatenated plain text of every message in the request.
pub fn prompt_text(request: &GatewayRequest) -> String {
    let mut out = String::new();
    for message in &request.messages {
        match &message.content {
            MessageContent::Text(text) => out.push_str(text),
            MessageContent::Parts(parts) => {
                for part in parts {
                    if let super::gateway::ContentPart::Text { text } = part {
                        out.push_str(text);
                    }
                }
            }
        }
        out.push('\n');
    }
    out
}
