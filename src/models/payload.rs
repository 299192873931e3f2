//! Validation of inbound recommendation payloads.
//!
//! Payloads arrive as raw JSON so that every rejection can name the offending
//! field. Client-supplied `id` and `is_deleted` values are ignored.

use serde_json::{Map, Value};
use std::fmt::Display;

use crate::{
    error::{AppError, AppResult},
    models::{NewRecommendation, RecommendationPatch, Relation, MAX_DISLIKE},
};

fn invalid(reason: impl Display) -> AppError {
    AppError::InvalidInput(format!("Invalid Recommendation: {}", reason))
}

fn as_object(payload: &Value) -> AppResult<&Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| invalid("body of request contained bad or no data"))
}

/// Reads a required key field; `0` and `null` are rejected like a missing key would be
fn key_field(name: &str, value: &Value) -> AppResult<i64> {
    match value {
        Value::Null => Err(invalid(format!("{} must not be null", name))),
        Value::Number(_) => match value.as_i64() {
            Some(0) => Err(invalid(format!("{} must not be 0", name))),
            Some(n) => Ok(n),
            None => Err(invalid(format!("{} must be an integer", name))),
        },
        _ => Err(invalid(format!("{} must be an integer", name))),
    }
}

fn required<'a>(body: &'a Map<String, Value>, name: &str) -> AppResult<&'a Value> {
    body.get(name)
        .ok_or_else(|| invalid(format!("missing {}", name)))
}

fn relation_field(value: &Value) -> AppResult<Relation> {
    let code = key_field("relation", value)?;
    Relation::try_from(code).map_err(invalid)
}

fn dislike_field(value: &Value) -> AppResult<i64> {
    match value.as_i64() {
        Some(n) if (0..=MAX_DISLIKE).contains(&n) => Ok(n),
        _ => Err(invalid(format!(
            "dislike must be an integer between 0 and {}",
            MAX_DISLIKE
        ))),
    }
}

impl NewRecommendation {
    /// Validates a create payload
    pub fn from_payload(payload: &Value) -> AppResult<Self> {
        let body = as_object(payload)?;

        // Fields are checked one at a time so the first bad one is reported
        let product_origin = key_field("product_origin", required(body, "product_origin")?)?;
        let product_target = key_field("product_target", required(body, "product_target")?)?;
        let relation = relation_field(required(body, "relation")?)?;
        let dislike = body.get("dislike").map(dislike_field).transpose()?.unwrap_or(0);

        Ok(Self {
            product_origin,
            product_target,
            relation,
            dislike,
        })
    }
}

impl RecommendationPatch {
    /// Validates an update payload; absent keys stay `None`
    pub fn from_payload(payload: &Value) -> AppResult<Self> {
        let body = as_object(payload)?;

        Ok(Self {
            product_origin: body
                .get("product_origin")
                .map(|v| key_field("product_origin", v))
                .transpose()?,
            product_target: body
                .get("product_target")
                .map(|v| key_field("product_target", v))
                .transpose()?,
            relation: body.get("relation").map(relation_field).transpose()?,
            dislike: body.get("dislike").map(dislike_field).transpose()?,
        })
    }
}
