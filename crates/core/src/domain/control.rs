//! Textual control values
//!
//! Control messages arrive as `key=value` strings from the operator
//! surface. They are parsed on the control thread into typed parameters;
//! the realtime side only ever sees the typed form.

use thiserror::Error;
use tracing::warn;

/// Errors raised while interpreting a control message
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("Unknown control key: {0}")]
    UnknownKey(String),

    #[error("No such unit: {0}")]
    UnknownUnit(usize),

    #[error("Control queue is full")]
    QueueFull,

    #[error("Engine is not running")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, ControlError>;

/// Parse a finite number, falling back to `default` when malformed
pub fn parse_f32(key: &str, value: &str, default: f32) -> f32 {
    match value.trim().parse::<f32>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            warn!(key, value, default, "Malformed numeric control value, using default");
            default
        }
    }
}

/// Parse an unsigned integer, falling back to `default` when malformed
pub fn parse_usize(key: &str, value: &str, default: usize) -> usize {
    let trimmed = value.trim();
    if let Ok(v) = trimmed.parse::<usize>() {
        return v;
    }
    // accept "2.0" from surfaces that only send floats
    match trimmed.parse::<f32>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 => v as usize,
        _ => {
            warn!(key, value, default, "Malformed integer control value, using default");
            default
        }
    }
}

/// Parse a flag: `1/0`, `true/false`, `on/off`, `yes/no`
pub fn parse_bool(key: &str, value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => true,
        "0" | "false" | "off" | "no" => false,
        _ => {
            warn!(key, value, default, "Malformed flag control value, using default");
            default
        }
    }
}
