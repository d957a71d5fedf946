//! Conversion of a value-change event log into a waveform tree

use crate::vcd::VcdError;
use hdlplay_common::{NodeType, Sample, WaveNode, WaveValue};
use std::collections::HashMap;
use thiserror::Error;

/// Name of the synthetic root scope.
pub const ROOT_NAME: &str = "design";

/// One entry of a sequential value-change log
#[derive(Debug, Clone, PartialEq)]
pub enum WaveEvent {
    ScopeOpen {
        name: String,
    },
    ScopeClose,
    VarDecl {
        /// Identifier code used by later `Change` events
        id: String,
        name: String,
        var_type: String,
        width: u32,
    },
    /// Advances the current time
    Time(u64),
    Change {
        id: String,
        value: ChangeValue,
    },
}

/// Value carried by a `Change` event
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeValue {
    Integer(u128),
    Real(f64),
    /// Anything that is not a plain number, e.g. `x` or `b10z1`
    Word(String),
}

#[derive(Debug, Error)]
pub enum WaveformError {
    #[error("Value change for undeclared identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("Scope closed without a matching open")]
    UnbalancedScope,

    #[error(transparent)]
    Vcd(#[from] VcdError),
}

enum Pending {
    Scope {
        name: String,
        children: Vec<usize>,
    },
    Signal {
        name: String,
        node_type: NodeType,
        data: Vec<Sample>,
    },
}

/// Rebuilds the scope hierarchy of an event log.
///
/// Returns the single top-level scope when there is exactly one, otherwise a
/// root named `design` holding all of them.
pub fn convert(events: &[WaveEvent]) -> Result<WaveNode, WaveformError> {
    let mut nodes = vec![Pending::Scope {
        name: ROOT_NAME.to_string(),
        children: Vec::new(),
    }];
    let mut stack = vec![0usize];
    let mut signals: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut time = 0u64;

    for event in events {
        match event {
            WaveEvent::ScopeOpen { name } => {
                let idx = push_child(
                    &mut nodes,
                    &stack,
                    Pending::Scope {
                        name: name.clone(),
                        children: Vec::new(),
                    },
                );
                stack.push(idx);
            }
            WaveEvent::ScopeClose => {
                if stack.len() == 1 {
                    return Err(WaveformError::UnbalancedScope);
                }
                stack.pop();
            }
            WaveEvent::VarDecl {
                id,
                name,
                var_type,
                width,
            } => {
                let idx = push_child(
                    &mut nodes,
                    &stack,
                    Pending::Signal {
                        name: name.clone(),
                        node_type: NodeType::signal(var_type.as_str(), *width),
                        data: Vec::new(),
                    },
                );
                signals.entry(id.as_str()).or_default().push(idx);
            }
            WaveEvent::Time(t) => time = *t,
            WaveEvent::Change { id, value } => {
                let leaves = signals
                    .get(id.as_str())
                    .ok_or_else(|| WaveformError::UnknownIdentifier(id.clone()))?;
                for &idx in leaves {
                    if let Pending::Signal {
                        node_type, data, ..
                    } = &mut nodes[idx]
                    {
                        let width = node_type.width.unwrap_or(1);
                        data.push((time, format_value(value, width)));
                    }
                }
            }
        }
    }

    let mut root = build(&mut nodes, 0);
    if let WaveNode::Scope { children, .. } = &mut root {
        if children.len() == 1 {
            return Ok(children.remove(0));
        }
    }
    Ok(root)
}

fn push_child(nodes: &mut Vec<Pending>, stack: &[usize], node: Pending) -> usize {
    let idx = nodes.len();
    nodes.push(node);
    let parent = stack.last().copied().unwrap_or(0);
    if let Pending::Scope { children, .. } = &mut nodes[parent] {
        children.push(idx);
    }
    idx
}

fn build(nodes: &mut [Pending], idx: usize) -> WaveNode {
    match &mut nodes[idx] {
        Pending::Scope { name, children } => {
            let name = std::mem::take(name);
            let children = std::mem::take(children);
            let children = children.into_iter().map(|child| build(nodes, child)).collect();
            WaveNode::scope(name, children)
        }
        Pending::Signal {
            name,
            node_type,
            data,
        } => WaveNode::signal(
            std::mem::take(name),
            node_type.clone(),
            std::mem::take(data),
        ),
    }
}

/// Integers become binary digit strings zero-padded to the signal width.
fn format_value(value: &ChangeValue, width: u32) -> WaveValue {
    match value {
        ChangeValue::Integer(n) => WaveValue::Text(format!("{:0width$b}", n, width = width as usize)),
        ChangeValue::Real(r) => WaveValue::Real(*r),
        ChangeValue::Word(word) => WaveValue::Text(word.clone()),
    }
}
