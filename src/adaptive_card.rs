use serde::{Deserialize, Serialize};
use thiserror::Error;

const CARD_SCHEMA: &str = "http://adaptivecards.io/schemas/adaptive-card.json";
const CARD_TYPE: &str = "AdaptiveCard";

#[derive(Debug, Error)]
pub enum CardError {
    #[error("Malformed card payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unsupported card type: {0}")]
    UnsupportedType(String),
}

/// A validated adaptive card: a flat list of display elements plus optional
/// submit actions. Only the element kinds the chat panel renders are
/// accepted; anything else fails parsing instead of failing at render time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardDocument {
    #[serde(rename = "$schema", default = "default_schema")]
    pub schema: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub body: Vec<CardElement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<CardAction>,
}

fn default_schema() -> String {
    CARD_SCHEMA.to_string()
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CardElement {
    TextBlock {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        weight: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        wrap: Option<bool>,
    },
    FactSet {
        facts: Vec<Fact>,
    },
    ActionSet {
        actions: Vec<CardAction>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fact {
    pub title: String,
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CardAction {
    #[serde(rename = "Action.Submit")]
    Submit {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        data: serde_json::Value,
    },
}

/// Parse and validate a serialized card before anything tries to render it.
pub fn parse_card(payload: &str) -> Result<CardDocument, CardError> {
    let card: CardDocument = serde_json::from_str(payload)?;
    if card.kind != CARD_TYPE {
        return Err(CardError::UnsupportedType(card.kind));
    }
    Ok(card)
}

/// The identifier a submit action declares for its UI-visible label.
pub fn submit_label(data: &serde_json::Value) -> Option<&str> {
    data.get("actionSubmitId").and_then(serde_json::Value::as_str)
}

/// `PA_single_chat` -> `single_chat`.
pub fn principal_short_name(principal_agent_id: &str) -> &str {
    principal_agent_id
        .split_once('_')
        .map_or(principal_agent_id, |(_, rest)| rest)
}

/// The synthetic assistant card that opens every conversation, summarizing
/// the principal and its connected agents.
pub fn welcome_card(principal_agent_id: &str, connected_agent_ids: &[String]) -> CardDocument {
    let connected_agents_text = if connected_agent_ids.is_empty() {
        "No agents connected".to_string()
    } else {
        connected_agent_ids.join(", ")
    };

    CardDocument {
        schema: default_schema(),
        kind: CARD_TYPE.to_string(),
        version: default_version(),
        body: vec![
            CardElement::TextBlock {
                text: "Welcome to Multi-Agent Chat".to_string(),
                weight: Some("bolder".to_string()),
                size: Some("medium".to_string()),
                wrap: None,
            },
            CardElement::TextBlock {
                text: "You can now chat with connected agents. Start by sending a message!"
                    .to_string(),
                weight: None,
                size: None,
                wrap: Some(true),
            },
            CardElement::FactSet {
                facts: vec![
                    Fact {
                        title: "Connected Agents:".to_string(),
                        value: connected_agents_text,
                    },
                    Fact {
                        title: "Principal Agent:".to_string(),
                        value: principal_short_name(principal_agent_id).to_string(),
                    },
                ],
            },
        ],
        actions: Vec::new(),
    }
}
