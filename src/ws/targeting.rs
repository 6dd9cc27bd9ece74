//! Audience targeting: target validation and the delivery predicate.

use crate::auth::Claims;
use crate::error::{AppError, AppResult};
use crate::ws::message::Target;
use serde_json::Value;

/// Validates a target before fan-out. Each include/exclude value must be
/// null, a scalar, or an array whose elements recursively satisfy the same
/// rule; objects are rejected with the offending path.
pub fn validate_target(target: &Target) -> AppResult<()> {
    for (path, value) in target.include.iter().chain(target.exclude.iter()) {
        validate_target_value(path, value)?;
    }
    Ok(())
}

fn validate_target_value(path: &str, value: &Value) -> AppResult<()> {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
        Value::Array(elems) => {
            for elem in elems {
                validate_target_value(path, elem)?;
            }
            Ok(())
        }
        Value::Object(_) => Err(AppError::InvalidTarget(path.to_string())),
    }
}

/// Decides whether a subscriber with `claims` receives a message with
/// `target`.
///
/// Empty target delivers to everyone. Exclude rules run first: a resolved
/// path whose value matches excludes immediately (an unresolved path never
/// excludes). Surviving that, an empty include delivers; otherwise include
/// rules are disjunctive and at least one must match.
pub fn should_receive(claims: &Claims, target: &Target) -> bool {
    if target.is_empty() {
        return true;
    }

    for (path, target_value) in &target.exclude {
        if let Some(claim_value) = claims.custom_claim(path) {
            if match_value(claim_value, target_value) {
                return false;
            }
        }
    }

    if target.include.is_empty() {
        return true;
    }

    target.include.iter().any(|(path, target_value)| {
        claims
            .custom_claim(path)
            .is_some_and(|claim_value| match_value(claim_value, target_value))
    })
}

/// Matches one claim value against one target value.
///
/// Arrays on the target side mean "any of": against a claim array the
/// intersection must be non-empty, against a scalar the claim must equal some
/// element. An empty target array matches only an empty claim array.
fn match_value(claim_value: &Value, target_value: &Value) -> bool {
    if claim_value.is_null() || target_value.is_null() {
        return claim_value.is_null() && target_value.is_null();
    }

    if let Value::Array(targets) = target_value {
        if targets.is_empty() {
            return matches!(claim_value, Value::Array(claims) if claims.is_empty());
        }
        return match claim_value {
            Value::Array(claims) => targets
                .iter()
                .any(|t| claims.iter().any(|c| value_eq(c, t))),
            scalar => targets.iter().any(|t| value_eq(scalar, t)),
        };
    }

    value_eq(claim_value, target_value)
}

/// Structural equality with numbers compared by canonical numeric value, so
/// an integer claim equals a float target of the same value.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
