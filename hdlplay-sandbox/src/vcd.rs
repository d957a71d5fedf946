//! Minimal VCD reader producing [`WaveEvent`]s

use crate::waveform::{ChangeValue, WaveEvent};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VcdError {
    #[error("Unexpected end of VCD input in {0}")]
    UnexpectedEnd(&'static str),

    #[error("Invalid timestamp '{0}'")]
    InvalidTime(String),

    #[error("Invalid variable size '{0}'")]
    InvalidSize(String),

    #[error("Invalid value change '{0}'")]
    InvalidValue(String),
}

/// Tokenizes a VCD document.
///
/// Header sections other than `$scope`, `$upscope` and `$var` are skipped,
/// as are the `$dumpvars`/`$dumpall`/`$dumpon`/`$dumpoff` wrappers.
pub fn tokenize(text: &str) -> Result<Vec<WaveEvent>, VcdError> {
    let mut tokens = text.split_whitespace();
    let mut events = Vec::new();

    while let Some(token) = tokens.next() {
        match token {
            "$scope" => {
                let _kind = tokens.next().ok_or(VcdError::UnexpectedEnd("$scope"))?;
                let name = tokens.next().ok_or(VcdError::UnexpectedEnd("$scope"))?;
                skip_to_end(&mut tokens, "$scope")?;
                events.push(WaveEvent::ScopeOpen {
                    name: name.to_string(),
                });
            }
            "$upscope" => {
                skip_to_end(&mut tokens, "$upscope")?;
                events.push(WaveEvent::ScopeClose);
            }
            "$var" => {
                let mut fields = Vec::new();
                loop {
                    match tokens.next() {
                        Some("$end") => break,
                        Some(field) => fields.push(field),
                        None => return Err(VcdError::UnexpectedEnd("$var")),
                    }
                }
                let [var_type, size, id, name, ..] = fields.as_slice() else {
                    return Err(VcdError::UnexpectedEnd("$var"));
                };
                let width = size
                    .parse()
                    .map_err(|_| VcdError::InvalidSize(size.to_string()))?;
                events.push(WaveEvent::VarDecl {
                    id: id.to_string(),
                    name: name.to_string(),
                    var_type: var_type.to_string(),
                    width,
                });
            }
            "$dumpvars" | "$dumpall" | "$dumpon" | "$dumpoff" | "$end" => {}
            section if section.starts_with('$') => skip_to_end(&mut tokens, "header")?,
            _ => {
                if let Some(time) = token.strip_prefix('#') {
                    let time = time
                        .parse()
                        .map_err(|_| VcdError::InvalidTime(token.to_string()))?;
                    events.push(WaveEvent::Time(time));
                } else if let Some(bits) = token.strip_prefix(['b', 'B']) {
                    let id = tokens.next().ok_or(VcdError::UnexpectedEnd("vector change"))?;
                    events.push(WaveEvent::Change {
                        id: id.to_string(),
                        value: vector_value(bits),
                    });
                } else if let Some(real) = token.strip_prefix(['r', 'R']) {
                    let id = tokens.next().ok_or(VcdError::UnexpectedEnd("real change"))?;
                    let value = real
                        .parse()
                        .map_err(|_| VcdError::InvalidValue(token.to_string()))?;
                    events.push(WaveEvent::Change {
                        id: id.to_string(),
                        value: ChangeValue::Real(value),
                    });
                } else {
                    events.push(scalar_change(token)?);
                }
            }
        }
    }

    Ok(events)
}

fn skip_to_end<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    section: &'static str,
) -> Result<(), VcdError> {
    tokens
        .find(|token| *token == "$end")
        .map(|_| ())
        .ok_or(VcdError::UnexpectedEnd(section))
}

fn vector_value(bits: &str) -> ChangeValue {
    if !bits.is_empty() && bits.len() <= 128 && bits.bytes().all(|b| b == b'0' || b == b'1') {
        if let Ok(n) = u128::from_str_radix(bits, 2) {
            return ChangeValue::Integer(n);
        }
    }
    ChangeValue::Word(bits.to_string())
}

fn scalar_change(token: &str) -> Result<WaveEvent, VcdError> {
    let mut chars = token.chars();
    let value = match chars.next() {
        Some('0') => ChangeValue::Integer(0),
        Some('1') => ChangeValue::Integer(1),
        Some(c @ ('x' | 'X' | 'z' | 'Z')) => ChangeValue::Word(c.to_ascii_lowercase().to_string()),
        _ => return Err(VcdError::InvalidValue(token.to_string())),
    };
    let id = chars.as_str();
    if id.is_empty() {
        return Err(VcdError::InvalidValue(token.to_string()));
    }
    Ok(WaveEvent::Change {
        id: id.to_string(),
        value,
    })
}
