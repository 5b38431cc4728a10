use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestrationApiError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API call failed with status: {0}")]
    Status(reqwest::StatusCode),
}

/// One worker agent as listed by `GET /agents`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    pub label: String,
}

/// Per-turn transport headers.
#[derive(Clone, Debug)]
pub struct TurnHeaders {
    pub conversation_id: String,
    /// Zero-padded to 3 digits, e.g. `001`.
    pub turn_id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RequestMessage {
    pub content: String,
    pub role: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Tells the orchestrator which principal strategy to run and which worker
/// agents take part in it.
#[derive(Clone, Debug, Serialize)]
pub struct Strategy {
    pub name: String,
    pub agents_involved: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct InvokeRequest {
    pub conversation_id: String,
    pub message: RequestMessage,
    pub history: Vec<RequestMessage>,
    pub strategy: Strategy,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RichContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: serde_json::Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplyMessage {
    pub id: Option<String>,
    pub content: Option<String>,
    pub agent_id: Option<String>,
    pub rich_content: Option<RichContent>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InvokeReply {
    pub conversation_id: Option<String>,
    pub message: ReplyMessage,
}

/// Client-side contract of the orchestration backend. Object safe so the
/// session can hold it behind a pointer and tests can substitute stubs.
pub trait OrchestrationApi: Send + Sync {
    /// `GET /agents`: the worker agent catalog.
    fn list_agents(&self) -> BoxFuture<'_, Result<Vec<AgentInfo>, OrchestrationApiError>>;

    /// `POST /plan/invoke`: submit one conversation turn.
    fn invoke(
        &self,
        headers: TurnHeaders,
        request: InvokeRequest,
    ) -> BoxFuture<'_, Result<InvokeReply, OrchestrationApiError>>;
}

/// `OrchestrationApi` over HTTP via `reqwest`.
pub struct HttpOrchestrationApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpOrchestrationApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl OrchestrationApi for HttpOrchestrationApi {
    fn list_agents(&self) -> BoxFuture<'_, Result<Vec<AgentInfo>, OrchestrationApiError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(format!("{}/agents", self.base_url))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(OrchestrationApiError::Status(response.status()));
            }
            Ok(response.json().await?)
        })
    }

    fn invoke(
        &self,
        headers: TurnHeaders,
        request: InvokeRequest,
    ) -> BoxFuture<'_, Result<InvokeReply, OrchestrationApiError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(format!("{}/plan/invoke", self.base_url))
                .header("x-conversation-id", &headers.conversation_id)
                .header("x-turn-id", &headers.turn_id)
                .json(&request)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(OrchestrationApiError::Status(response.status()));
            }
            Ok(response.json().await?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_request_serializes_wire_shape() {
        let request = InvokeRequest {
            conversation_id: "conv-1".into(),
            message: RequestMessage {
                content: "hello".into(),
                role: "user".into(),
                id: "msg-1".into(),
                metadata: None,
            },
            history: Vec::new(),
            strategy: Strategy {
                name: "single_chat".into(),
                agents_involved: vec!["azure_agent_1".into()],
            },
        };

        let value = serde_json::to_value(&request).expect("serializable");
        assert_eq!(value["conversation_id"], "conv-1");
        assert_eq!(value["message"]["role"], "user");
        assert_eq!(value["strategy"]["name"], "single_chat");
        assert_eq!(value["history"].as_array().map(Vec::len), Some(0));
        // Absent metadata stays off the wire entirely.
        assert!(value["message"].get("metadata").is_none());
    }

    #[test]
    fn reply_with_rich_content_deserializes() {
        let raw = r#"{
            "conversation_id": "conv-1",
            "message": {
                "id": null,
                "content": null,
                "agent_id": "azure_agent_1",
                "rich_content": { "type": "adaptiveCard", "content": { "body": [] } }
            }
        }"#;

        let reply: InvokeReply = serde_json::from_str(raw).expect("valid reply");
        assert!(reply.message.id.is_none());
        let rich = reply.message.rich_content.expect("rich content present");
        assert_eq!(rich.kind, "adaptiveCard");
    }
}
