//! Request payloads as workers actually send them.
//!
//! Workers are loose about JSON types: ids arrive as numbers or numeric strings, timestamps as
//! `time.time()` floats, and positions as numbers far beyond 64 bits. Numbers are captured as
//! raw JSON text so a position token is stored exactly as it was written.
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::allocator::AllocationRequest;
use crate::error::SlotError;
use crate::lease::LeasePatch;

/// Body of `POST /api/slot/upsert`.
#[derive(Debug, Default, Deserialize)]
pub struct UpsertLeaseRequest {
    #[serde(default)]
    pub job_id: Option<Box<RawValue>>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub checkpoint_pos: Option<Box<RawValue>>,
    #[serde(default)]
    pub start_pos: Option<Box<RawValue>>,
    #[serde(default)]
    pub end_pos: Option<Box<RawValue>>,
    #[serde(default)]
    pub chunk_size: Option<Box<RawValue>>,
    #[serde(default)]
    pub updated_at: Option<Box<RawValue>>,
}

impl UpsertLeaseRequest {
    /// Validates the payload and splits it into the target slot and the patch to merge.
    pub fn into_parts(self) -> Result<(i64, LeasePatch), SlotError> {
        let slot_id = parse_integer("job_id", self.job_id.as_deref(), Fraction::Reject)?
            .ok_or_else(|| SlotError::validation("missing job_id"))?;

        let patch = LeasePatch {
            state: self.state,
            checkpoint_pos: parse_position("checkpoint_pos", self.checkpoint_pos.as_deref())?,
            start_pos: parse_position("start_pos", self.start_pos.as_deref())?,
            end_pos: parse_position("end_pos", self.end_pos.as_deref())?,
            chunk_size: parse_integer("chunk_size", self.chunk_size.as_deref(), Fraction::Reject)?,
            updated_at: parse_integer("updated_at", self.updated_at.as_deref(), Fraction::Floor)?,
        };

        Ok((slot_id, patch))
    }
}

/// What the client sends to `POST /api/slot/upsert`.
#[derive(Debug, Serialize)]
pub struct UpsertLeaseBody<'a> {
    pub job_id: i64,
    #[serde(flatten)]
    pub patch: &'a LeasePatch,
}

/// Query string of `GET /api/slot`.
#[derive(Debug, Default, Deserialize)]
pub struct AllocateQuery {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub total_slots: Option<i64>,
    // Older workers spell it `total`.
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub total: Option<i64>,
    #[serde(default)]
    pub prefer_active: Option<String>,
}

impl AllocateQuery {
    pub fn into_request(self, default_total_slots: i64) -> Result<AllocationRequest, SlotError> {
        let total_slots = self
            .total_slots
            .or(self.total)
            .unwrap_or(default_total_slots);

        AllocationRequest::new(total_slots, prefer_active(self.prefer_active.as_deref()))
    }
}

/// `prefer_active` is on unless explicitly switched off.
pub fn prefer_active(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_lowercase()) {
        Some(v) => !matches!(v.as_str(), "0" | "false" | "no" | "off"),
        None => true,
    }
}

/// Treats empty query values as missing.
pub fn empty_string_as_none<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let opt = Option::<String>::deserialize(de)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => FromStr::from_str(s).map_err(de::Error::custom).map(Some),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fraction {
    Reject,
    Floor,
}

enum Token {
    Text(String),
    Number(String),
    Other,
}

fn classify(field: &str, raw: &RawValue) -> Result<Token, SlotError> {
    let text = raw.get().trim();
    match text.as_bytes().first().copied() {
        Some(b'"') => serde_json::from_str::<String>(text)
            .map(Token::Text)
            .map_err(|e| SlotError::validation(format!("{field} is not a valid string: {e}"))),
        Some(b'-' | b'0'..=b'9') => Ok(Token::Number(text.to_owned())),
        _ => Ok(Token::Other),
    }
}

/// Positions are opaque: strings are kept verbatim and numbers keep their literal text.
fn parse_position(field: &str, raw: Option<&RawValue>) -> Result<Option<String>, SlotError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    match classify(field, raw)? {
        Token::Text(text) | Token::Number(text) => Ok(Some(text)),
        Token::Other => Err(SlotError::validation(format!(
            "{field} must be a string or a number"
        ))),
    }
}

fn parse_integer(
    field: &str,
    raw: Option<&RawValue>,
    fraction: Fraction,
) -> Result<Option<i64>, SlotError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let text = match classify(field, raw)? {
        Token::Text(text) if text.trim().is_empty() => return Ok(None),
        Token::Text(text) => text.trim().to_owned(),
        Token::Number(text) => text,
        Token::Other => {
            return Err(SlotError::validation(format!("{field} must be an integer")))
        }
    };

    integer_from_text(field, &text, fraction).map(Some)
}

fn integer_from_text(field: &str, text: &str, fraction: Fraction) -> Result<i64, SlotError> {
    if let Ok(value) = text.parse::<i64>() {
        return Ok(value);
    }

    let value = text
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| SlotError::validation(format!("{field} must be an integer, got {text}")))?;

    let whole = match fraction {
        Fraction::Reject if value.fract() != 0.0 => {
            return Err(SlotError::validation(format!(
                "{field} must be an integer, got {text}"
            )))
        }
        Fraction::Reject => value,
        Fraction::Floor => value.floor(),
    };

    if whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
        return Err(SlotError::validation(format!(
            "{field} is out of range: {text}"
        )));
    }

    Ok(whole as i64)
}
