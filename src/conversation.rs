use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::adaptive_card::{self, welcome_card};
use crate::graph_workflow::TopologyEvent;
use crate::logging::{CanvasLogger, LogLevel};
use crate::orchestration_api::{
    InvokeReply, InvokeRequest, OrchestrationApi, OrchestrationApiError, RequestMessage,
    Strategy, TurnHeaders,
};

/// Wire content for a turn whose real payload travels as metadata.
const CARD_RESPONSE_CONTENT: &str =
    "This is an adaptive card response, and should be handled by the previous request agent";
const MISSING_REPLY_CONTENT: &str = "Sorry, I could not process your request.";
const SEND_FAILURE_CONTENT: &str =
    "Sorry, I encountered an error processing your request. Please try again later.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is not open")]
    NotOpen,
    #[error("A send is already in flight")]
    SendInFlight,
    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error(transparent)]
    Api(#[from] OrchestrationApiError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => f.pad("user"),
            Role::Assistant => f.pad("assistant"),
        }
    }
}

/// One chat bubble. Append-only: never mutated after creation.
#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub is_card: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Local>,
}

impl ChatMessage {
    fn assistant(content: String, agent_id: Option<String>, is_card: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content,
            agent_id,
            is_card,
            metadata: None,
            timestamp: Local::now(),
        }
    }
}

/// Outcome of a successfully transported turn.
#[derive(Debug)]
pub enum TurnOutcome {
    Replied(ChatMessage),
    /// The session was reset while the request was in flight; the reply was
    /// dropped instead of being applied to the wrong conversation.
    DiscardedStale,
}

/// One chat thread against the orchestration API: conversation id, turn
/// counter, message history and the in-flight request flag.
pub struct ConversationSession {
    conversation_id: Option<String>,
    turn_id: u32,
    messages: Vec<ChatMessage>,
    principal_agent_id: String,
    connected_agent_ids: Vec<String>,
    in_flight: bool,
    api: Arc<dyn OrchestrationApi>,
    logger: Arc<dyn CanvasLogger>,
}

impl ConversationSession {
    pub fn new(api: Arc<dyn OrchestrationApi>, logger: Arc<dyn CanvasLogger>) -> Self {
        Self {
            conversation_id: None,
            turn_id: 1,
            messages: Vec::new(),
            principal_agent_id: String::new(),
            connected_agent_ids: Vec::new(),
            in_flight: false,
            api,
            logger,
        }
    }

    /// (Re)initialize the thread for the given principal/worker projection.
    ///
    /// A no-op when the session is already open for exactly these agents;
    /// otherwise the conversation id is regenerated, the turn counter resets
    /// to 1, history is cleared and a synthetic welcome card is appended.
    /// Returns whether a (re)initialization happened.
    pub fn open(
        &mut self,
        principal_agent_id: &str,
        connected_agent_ids: &[String],
    ) -> Result<bool, SessionError> {
        let unchanged = self.conversation_id.is_some()
            && self.principal_agent_id == principal_agent_id
            && self.connected_agent_ids == connected_agent_ids;
        if unchanged {
            return Ok(false);
        }

        self.principal_agent_id = principal_agent_id.to_string();
        self.connected_agent_ids = connected_agent_ids.to_vec();
        let conversation_id = Uuid::new_v4().to_string();
        tracing::debug!("chat thread cleared, new conversation id: {conversation_id}");
        self.conversation_id = Some(conversation_id);
        self.turn_id = 1;
        self.messages.clear();

        let card = welcome_card(principal_agent_id, connected_agent_ids);
        let payload = serde_json::to_string(&card)?;
        self.messages
            .push(ChatMessage::assistant(payload, None, true));
        Ok(true)
    }

    /// Submit one turn to the orchestrator and reconcile the reply.
    ///
    /// `is_card_response` turns are carried as metadata and shown in the UI
    /// only as the payload's declared submit identifier. Messages are
    /// appended to history only when `show_in_ui` is set; the turn counter
    /// increments either way, even when the transport fails.
    pub async fn send_turn(
        &mut self,
        content: impl Into<String>,
        is_card_response: bool,
        show_in_ui: bool,
    ) -> Result<TurnOutcome, SessionError> {
        let content = content.into();
        let conversation_id = self
            .conversation_id
            .clone()
            .ok_or(SessionError::NotOpen)?;
        if self.in_flight {
            self.logger
                .log(LogLevel::Warning, "A message is already being sent");
            return Err(SessionError::SendInFlight);
        }

        let message_id = Uuid::new_v4().to_string();
        let wire_message = if is_card_response {
            let action_data: serde_json::Value = serde_json::from_str(&content)?;
            if show_in_ui {
                let label = adaptive_card::submit_label(&action_data)
                    .unwrap_or_default()
                    .to_string();
                self.messages.push(ChatMessage {
                    id: message_id.clone(),
                    role: Role::User,
                    content: label,
                    agent_id: None,
                    is_card: false,
                    metadata: Some(action_data.clone()),
                    timestamp: Local::now(),
                });
            }
            RequestMessage {
                content: CARD_RESPONSE_CONTENT.to_string(),
                role: "user".to_string(),
                id: message_id,
                metadata: Some(serde_json::json!({
                    "adaptive_card_response": action_data
                })),
            }
        } else {
            if show_in_ui {
                self.messages.push(ChatMessage {
                    id: message_id.clone(),
                    role: Role::User,
                    content: content.clone(),
                    agent_id: None,
                    is_card: false,
                    metadata: None,
                    timestamp: Local::now(),
                });
            }
            RequestMessage {
                content,
                role: "user".to_string(),
                id: message_id,
                metadata: None,
            }
        };

        let headers = TurnHeaders {
            conversation_id: conversation_id.clone(),
            turn_id: format!("{:03}", self.turn_id),
        };
        self.turn_id += 1;

        let request = InvokeRequest {
            conversation_id: conversation_id.clone(),
            message: wire_message,
            history: Vec::new(),
            strategy: Strategy {
                name: adaptive_card::principal_short_name(&self.principal_agent_id).to_string(),
                agents_involved: self.connected_agent_ids.clone(),
            },
        };

        self.in_flight = true;
        let api = Arc::clone(&self.api);
        let result = api.invoke(headers, request).await;
        self.in_flight = false;

        match result {
            Ok(reply) => self.accept_reply(&conversation_id, reply),
            Err(e) => {
                self.logger.log(
                    LogLevel::Error,
                    &format!("Failed to send message to API: {e}"),
                );
                if show_in_ui {
                    self.messages.push(ChatMessage::assistant(
                        SEND_FAILURE_CONTENT.to_string(),
                        None,
                        false,
                    ));
                }
                Err(e.into())
            }
        }
    }

    /// Normalize a reply into a chat message, unless the session has moved
    /// to a different conversation since the request went out.
    fn accept_reply(
        &mut self,
        sent_conversation_id: &str,
        reply: InvokeReply,
    ) -> Result<TurnOutcome, SessionError> {
        if self.conversation_id.as_deref() != Some(sent_conversation_id) {
            self.logger.log(
                LogLevel::Warning,
                "Discarded a reply for a conversation that was reset",
            );
            return Ok(TurnOutcome::DiscardedStale);
        }

        let message = reply.message;
        let (content, is_card) = match message.rich_content {
            Some(rich) if rich.kind == "adaptiveCard" => {
                (serde_json::to_string(&rich.content)?, true)
            }
            _ => (
                message
                    .content
                    .unwrap_or_else(|| MISSING_REPLY_CONTENT.to_string()),
                false,
            ),
        };

        let assistant = ChatMessage {
            id: message.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            role: Role::Assistant,
            content,
            agent_id: message.agent_id,
            is_card,
            metadata: None,
            timestamp: Local::now(),
        };
        self.messages.push(assistant.clone());
        Ok(TurnOutcome::Replied(assistant))
    }

    /// Drop the thread: history, conversation id and turn counter all go
    /// back to their initial state.
    pub fn reset(&mut self) {
        self.conversation_id = None;
        self.turn_id = 1;
        self.messages.clear();
        self.in_flight = false;
    }

    /// React to a graph mutation. Resets (and reports true) when the change
    /// invalidates the agents this session was opened for.
    pub fn handle_topology_event(&mut self, event: &TopologyEvent) -> bool {
        if self.conversation_id.is_none() {
            return false;
        }
        let invalidated = match event {
            TopologyEvent::Reset => true,
            TopologyEvent::NodeRemoved { agent_id, .. } => {
                *agent_id == self.principal_agent_id
                    || self.connected_agent_ids.contains(agent_id)
            }
        };
        if invalidated {
            self.reset();
        }
        invalidated
    }

    pub fn is_open(&self) -> bool {
        self.conversation_id.is_some()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn turn_id(&self) -> u32 {
        self.turn_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn principal_agent_id(&self) -> &str {
        &self.principal_agent_id
    }

    pub fn connected_agent_ids(&self) -> &[String] {
        &self.connected_agent_ids
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::future::BoxFuture;
    use serde_json::json;

    use super::*;
    use crate::adaptive_card::{CardElement, parse_card};
    use crate::logging::BufferedLogger;
    use crate::orchestration_api::{AgentInfo, ReplyMessage, RichContent};

    enum StubMode {
        Text(&'static str),
        TextWithId(&'static str, &'static str),
        Card(serde_json::Value),
        MissingContent,
        Fail,
    }

    struct StubApi {
        mode: StubMode,
        seen: Mutex<Vec<(TurnHeaders, InvokeRequest)>>,
    }

    impl StubApi {
        fn new(mode: StubMode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<(TurnHeaders, InvokeRequest)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl OrchestrationApi for StubApi {
        fn list_agents(&self) -> BoxFuture<'_, Result<Vec<AgentInfo>, OrchestrationApiError>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn invoke(
            &self,
            headers: TurnHeaders,
            request: InvokeRequest,
        ) -> BoxFuture<'_, Result<InvokeReply, OrchestrationApiError>> {
            self.seen.lock().unwrap().push((headers, request));
            let conversation_id = self
                .seen
                .lock()
                .unwrap()
                .last()
                .map(|(h, _)| h.conversation_id.clone());
            let result = match &self.mode {
                StubMode::Text(text) => Ok(InvokeReply {
                    conversation_id,
                    message: ReplyMessage {
                        id: None,
                        content: Some((*text).to_string()),
                        agent_id: Some("azure_agent_1".to_string()),
                        rich_content: None,
                    },
                }),
                StubMode::TextWithId(id, text) => Ok(InvokeReply {
                    conversation_id,
                    message: ReplyMessage {
                        id: Some((*id).to_string()),
                        content: Some((*text).to_string()),
                        agent_id: None,
                        rich_content: None,
                    },
                }),
                StubMode::Card(content) => Ok(InvokeReply {
                    conversation_id,
                    message: ReplyMessage {
                        id: None,
                        content: None,
                        agent_id: Some("azure_agent_1".to_string()),
                        rich_content: Some(RichContent {
                            kind: "adaptiveCard".to_string(),
                            content: content.clone(),
                        }),
                    },
                }),
                StubMode::MissingContent => Ok(InvokeReply {
                    conversation_id,
                    message: ReplyMessage {
                        id: None,
                        content: None,
                        agent_id: None,
                        rich_content: None,
                    },
                }),
                StubMode::Fail => Err(OrchestrationApiError::Status(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                )),
            };
            Box::pin(async move { result })
        }
    }

    fn session(api: Arc<StubApi>) -> ConversationSession {
        ConversationSession::new(api, Arc::new(BufferedLogger::new()))
    }

    fn workers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn open_appends_welcome_card() {
        let mut session = session(StubApi::new(StubMode::Text("hi")));
        let opened = session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        assert!(opened);
        assert_eq!(session.turn_id(), 1);
        assert_eq!(session.messages().len(), 1);
        let welcome = &session.messages()[0];
        assert_eq!(welcome.role, Role::Assistant);
        assert!(welcome.is_card);

        let card = parse_card(&welcome.content).expect("welcome card parses");
        let CardElement::FactSet { facts } = &card.body[2] else {
            panic!("expected a fact set");
        };
        assert_eq!(facts[0].value, "azure_agent_1");
        assert_eq!(facts[1].value, "single_chat");
    }

    #[test]
    fn reopen_with_same_agents_is_a_no_op() {
        let mut session = session(StubApi::new(StubMode::Text("hi")));
        let agents = workers(&["azure_agent_1"]);
        session.open("PA_single_chat", &agents).expect("opened");
        let first_id = session.conversation_id().map(str::to_string);

        let reopened = session.open("PA_single_chat", &agents).expect("no-op");
        assert!(!reopened);
        assert_eq!(session.conversation_id().map(str::to_string), first_id);
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn reopen_with_changed_agents_resets_thread() {
        let mut session = session(StubApi::new(StubMode::Text("hi")));
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");
        let first_id = session.conversation_id().map(str::to_string);

        let reopened = session
            .open("PA_single_chat", &workers(&["azure_agent_1", "azure_agent_2"]))
            .expect("reopened");
        assert!(reopened);
        assert_ne!(session.conversation_id().map(str::to_string), first_id);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.turn_id(), 1);
    }

    #[tokio::test]
    async fn plain_turn_round_trip() {
        let api = StubApi::new(StubMode::Text("Hello from the agent"));
        let mut session = session(api.clone());
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        let outcome = session
            .send_turn("Hi", false, true)
            .await
            .expect("turn accepted");
        let TurnOutcome::Replied(reply) = outcome else {
            panic!("expected a reply");
        };
        assert_eq!(reply.content, "Hello from the agent");
        assert_eq!(reply.agent_id.as_deref(), Some("azure_agent_1"));
        assert!(!reply.id.is_empty());

        // welcome + user + assistant
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[1].content, "Hi");
        assert_eq!(session.turn_id(), 2);

        let requests = api.requests();
        assert_eq!(requests.len(), 1);
        let (headers, request) = &requests[0];
        assert_eq!(headers.turn_id, "001");
        assert_eq!(headers.conversation_id, request.conversation_id);
        assert_eq!(request.strategy.name, "single_chat");
        assert_eq!(request.strategy.agents_involved, workers(&["azure_agent_1"]));
        assert!(request.history.is_empty());
    }

    #[tokio::test]
    async fn turn_ids_are_zero_padded_and_increasing() {
        let api = StubApi::new(StubMode::Text("ok"));
        let mut session = session(api.clone());
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        for _ in 0..3 {
            session.send_turn("ping", false, true).await.expect("sent");
        }
        let turn_ids: Vec<String> = api
            .requests()
            .iter()
            .map(|(h, _)| h.turn_id.clone())
            .collect();
        assert_eq!(turn_ids, ["001", "002", "003"]);
    }

    #[tokio::test]
    async fn failed_send_appends_one_fallback_message() {
        let mut session = session(StubApi::new(StubMode::Fail));
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        let err = session.send_turn("Hi", false, true).await.unwrap_err();
        assert!(matches!(err, SessionError::Api(_)));

        // welcome + user + exactly one error bubble
        assert_eq!(session.messages().len(), 3);
        let fallback = &session.messages()[2];
        assert_eq!(fallback.role, Role::Assistant);
        assert_eq!(fallback.content, SEND_FAILURE_CONTENT);
        // The counter still moves on.
        assert_eq!(session.turn_id(), 2);
        assert!(!session.in_flight());
    }

    #[tokio::test]
    async fn hidden_failed_send_stays_out_of_history() {
        let mut session = session(StubApi::new(StubMode::Fail));
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        let _ = session.send_turn("background", false, false).await;
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.turn_id(), 2);
    }

    #[tokio::test]
    async fn card_response_shows_submit_label_only() {
        let api = StubApi::new(StubMode::Text("done"));
        let mut session = session(api.clone());
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        let action = json!({ "actionSubmitId": "confirm_booking", "slot": 3 }).to_string();
        session.send_turn(action, true, true).await.expect("sent");

        let user_message = &session.messages()[1];
        assert_eq!(user_message.role, Role::User);
        assert_eq!(user_message.content, "confirm_booking");
        assert_eq!(
            user_message
                .metadata
                .as_ref()
                .and_then(|m| m.get("slot"))
                .and_then(serde_json::Value::as_i64),
            Some(3)
        );

        let (_, request) = &api.requests()[0];
        assert_eq!(request.message.content, CARD_RESPONSE_CONTENT);
        let metadata = request.message.metadata.as_ref().expect("metadata set");
        assert_eq!(
            metadata["adaptive_card_response"]["actionSubmitId"],
            "confirm_booking"
        );
    }

    #[tokio::test]
    async fn malformed_card_payload_is_rejected_before_sending() {
        let api = StubApi::new(StubMode::Text("unused"));
        let mut session = session(api.clone());
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        let err = session.send_turn("not json", true, true).await.unwrap_err();
        assert!(matches!(err, SessionError::JsonError(_)));
        assert!(api.requests().is_empty());
        assert_eq!(session.turn_id(), 1);
    }

    #[tokio::test]
    async fn card_reply_is_flagged_and_serialized() {
        let card_body = json!({ "type": "AdaptiveCard", "body": [] });
        let mut session = session(StubApi::new(StubMode::Card(card_body)));
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        let outcome = session.send_turn("show me", false, true).await.expect("sent");
        let TurnOutcome::Replied(reply) = outcome else {
            panic!("expected a reply");
        };
        assert!(reply.is_card);
        parse_card(&reply.content).expect("card body parses back");
    }

    #[tokio::test]
    async fn missing_reply_content_falls_back_to_apology() {
        let mut session = session(StubApi::new(StubMode::MissingContent));
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        let TurnOutcome::Replied(reply) =
            session.send_turn("hi", false, true).await.expect("sent")
        else {
            panic!("expected a reply");
        };
        assert_eq!(reply.content, MISSING_REPLY_CONTENT);
        assert!(!reply.id.is_empty());
    }

    #[tokio::test]
    async fn reply_id_from_backend_is_kept() {
        let mut session = session(StubApi::new(StubMode::TextWithId("msg-42", "hello")));
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        let TurnOutcome::Replied(reply) =
            session.send_turn("hi", false, true).await.expect("sent")
        else {
            panic!("expected a reply");
        };
        assert_eq!(reply.id, "msg-42");
    }

    #[test]
    fn stale_reply_is_discarded() {
        let mut session = session(StubApi::new(StubMode::Text("late")));
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");
        let old_id = "some-older-conversation".to_string();

        let reply = InvokeReply {
            conversation_id: Some(old_id.clone()),
            message: ReplyMessage {
                id: None,
                content: Some("late reply".to_string()),
                agent_id: None,
                rich_content: None,
            },
        };
        let outcome = session.accept_reply(&old_id, reply).expect("handled");
        assert!(matches!(outcome, TurnOutcome::DiscardedStale));
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_send_is_rejected() {
        let mut session = session(StubApi::new(StubMode::Text("ok")));
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        session.in_flight = true;
        let err = session.send_turn("second", false, true).await.unwrap_err();
        assert!(matches!(err, SessionError::SendInFlight));
    }

    #[tokio::test]
    async fn send_without_open_session_is_rejected() {
        let mut session = session(StubApi::new(StubMode::Text("ok")));
        let err = session.send_turn("hi", false, true).await.unwrap_err();
        assert!(matches!(err, SessionError::NotOpen));
    }

    #[test]
    fn topology_events_reset_only_affected_sessions() {
        let mut session = session(StubApi::new(StubMode::Text("ok")));
        session
            .open("PA_single_chat", &workers(&["azure_agent_1"]))
            .expect("opened");

        let unrelated = TopologyEvent::NodeRemoved {
            node_id: "node-x".to_string(),
            agent_id: "azure_agent_9".to_string(),
            kind: crate::catalog::AgentKind::Worker,
        };
        assert!(!session.handle_topology_event(&unrelated));
        assert!(session.is_open());

        let principal_gone = TopologyEvent::NodeRemoved {
            node_id: "node-y".to_string(),
            agent_id: "PA_single_chat".to_string(),
            kind: crate::catalog::AgentKind::Principal,
        };
        assert!(session.handle_topology_event(&principal_gone));
        assert!(!session.is_open());
        assert!(session.messages().is_empty());
        assert_eq!(session.turn_id(), 1);
    }
}
