use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kinds of addressable entities on the document canvas.
///
/// The document may grow new entity kinds over time; anything the bridge does
/// not recognize deserializes to [`NodeKind::Component`] instead of failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum NodeKind {
    #[default]
    Component,
    Parameter,
    Slider,
    Panel,
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        NodeKind::from_str(&s)
    }
}

#[allow(clippy::should_implement_trait)]
impl NodeKind {
    /// Returns the string representation of this node kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Component => "component",
            NodeKind::Parameter => "parameter",
            NodeKind::Slider => "slider",
            NodeKind::Panel => "panel",
        }
    }

    /// Parses a string into a `NodeKind`.
    ///
    /// Unrecognized values map to the default kind rather than erroring, so
    /// a newer document model never breaks an older bridge.
    pub fn from_str(s: &str) -> NodeKind {
        match s {
            "parameter" => NodeKind::Parameter,
            "slider" => NodeKind::Slider,
            "panel" => NodeKind::Panel,
            _ => NodeKind::Component,
        }
    }
}

/// Canvas position of a node, in document coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Range and current value of a slider node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SliderState {
    pub min: f64,
    pub max: f64,
    pub value: f64,
}

/// A snapshot record of one graph-addressable entity.
///
/// Built fresh from the live document on every query and never cached across
/// requests. The traversal layer treats it as read-only; mutation flows only
/// through dispatcher handlers back into the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Opaque unique id, stable for the document session.
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub position: Option<Position>,
    /// Ids this node consumes from.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Ids this node feeds.
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub is_selected: bool,
    /// Diagnostic messages produced by the last solve, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_messages: Vec<String>,
    /// Present only for slider nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slider: Option<SliderState>,
    /// Present only for panel nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_content: Option<String>,
}

impl NodeInfo {
    /// Creates a minimal node record with the given id, kind, and name.
    pub fn new(id: impl Into<String>, kind: NodeKind, name: impl Into<String>) -> Self {
        let name = name.into();
        NodeInfo {
            id: id.into(),
            kind,
            nickname: name.clone(),
            name,
            description: String::new(),
            position: None,
            sources: Vec::new(),
            targets: Vec::new(),
            is_selected: false,
            runtime_messages: Vec::new(),
            slider: None,
            panel_content: None,
        }
    }
}

/// A per-query snapshot of the document: id to node record.
pub type DocumentSnapshot = HashMap<String, NodeInfo>;

/// A command received from a client: a type discriminant plus free-form
/// parameters carried as the remaining top-level JSON fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub command: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl CommandEnvelope {
    /// Creates an envelope with no parameters.
    pub fn new(command: impl Into<String>) -> Self {
        CommandEnvelope {
            command: command.into(),
            params: Map::new(),
        }
    }

    /// Creates an envelope with the given parameter object.
    pub fn with_params(command: impl Into<String>, params: Map<String, Value>) -> Self {
        CommandEnvelope {
            command: command.into(),
            params,
        }
    }
}

/// Status discriminant of a [`ResponseEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// The sole outward contract of every handler and of the dispatcher itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    pub result: Value,
}

impl ResponseEnvelope {
    /// Creates a success response with the given result payload.
    pub fn success(result: Value) -> Self {
        ResponseEnvelope {
            status: ResponseStatus::Success,
            result,
        }
    }

    /// Creates an error response carrying a message.
    pub fn error(message: impl Into<String>) -> Self {
        ResponseEnvelope {
            status: ResponseStatus::Error,
            result: Value::String(message.into()),
        }
    }
}

/// A context-shaped graph query: expand the targets into their bounded-depth
/// neighborhood.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQuery {
    /// Ids to expand from. Accepts the legacy `instance_guids` spelling.
    #[serde(default, alias = "target_ids", alias = "instance_guids")]
    pub target_ids: Vec<String>,
    /// Expansion depth; clamped to `[0, 3]` by the traversal.
    #[serde(default, alias = "context_depth")]
    pub depth: i64,
}
