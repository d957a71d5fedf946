//! Waveform tree consumed by the waveform viewer

use serde::{Deserialize, Serialize};

/// Type descriptor attached to every node (`{"name": ..., "width": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeType {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

impl NodeType {
    /// Type of a scope node.
    pub fn scope() -> Self {
        Self {
            name: "struct".to_string(),
            width: None,
        }
    }

    pub fn signal(var_type: impl Into<String>, width: u32) -> Self {
        Self {
            name: var_type.into(),
            width: Some(width),
        }
    }
}

/// Value recorded for a signal at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaveValue {
    /// Digit string (`"0101"`) or raw word such as `"x"`.
    Text(String),
    Real(f64),
}

impl From<&str> for WaveValue {
    fn from(text: &str) -> Self {
        WaveValue::Text(text.to_string())
    }
}

/// `[timestamp, value]` pair.
pub type Sample = (u64, WaveValue);

/// Node of the waveform tree: nested scopes with signal leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaveNode {
    Scope {
        name: String,
        #[serde(rename = "type")]
        node_type: NodeType,
        children: Vec<WaveNode>,
    },
    Signal {
        name: String,
        #[serde(rename = "type")]
        node_type: NodeType,
        data: Vec<Sample>,
    },
}

impl WaveNode {
    pub fn scope(name: impl Into<String>, children: Vec<WaveNode>) -> Self {
        WaveNode::Scope {
            name: name.into(),
            node_type: NodeType::scope(),
            children,
        }
    }

    pub fn signal(name: impl Into<String>, node_type: NodeType, data: Vec<Sample>) -> Self {
        WaveNode::Signal {
            name: name.into(),
            node_type,
            data,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            WaveNode::Scope { name, .. } | WaveNode::Signal { name, .. } => name,
        }
    }

    pub fn node_type(&self) -> &NodeType {
        match self {
            WaveNode::Scope { node_type, .. } | WaveNode::Signal { node_type, .. } => node_type,
        }
    }

    /// Children of a scope; empty for signals.
    pub fn children(&self) -> &[WaveNode] {
        match self {
            WaveNode::Scope { children, .. } => children,
            WaveNode::Signal { .. } => &[],
        }
    }

    /// Samples of a signal; empty for scopes.
    pub fn data(&self) -> &[Sample] {
        match self {
            WaveNode::Signal { data, .. } => data,
            WaveNode::Scope { .. } => &[],
        }
    }

    /// Finds a descendant by a `/`-separated path of names below this node.
    pub fn find(&self, path: &str) -> Option<&WaveNode> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| {
                node.children().iter().find(|child| child.name() == segment)
            })
    }
}
