//! Structural drift detection between desired and observed objects.
//!
//! The API server fills in defaults the builders never set (`protocol`,
//! `terminationMessagePath`, `strategy`, ...). Comparing whole objects would
//! therefore report drift on every pass, so an object is converged when each
//! desired field is present in the observed object with the same value.

use serde_json::Value;

/// Parts of an object compared for drift.
pub const DRIFT_FIELDS: &[&str] = &["/spec", "/metadata/labels", "/metadata/annotations"];

/// Whether `observed` already carries everything `desired` sets in
/// [`DRIFT_FIELDS`].
#[must_use]
pub fn is_converged(observed: &Value, desired: &Value) -> bool {
    DRIFT_FIELDS.iter().all(|pointer| match desired.pointer(pointer) {
        None | Some(Value::Null) => true,
        Some(want) => observed.pointer(pointer).is_some_and(|have| contains(have, want)),
    })
}

/// Whether `desired` is a structural subset of `observed`.
///
/// Objects may carry extra keys; arrays must match element for element.
/// A `null` in `desired` matches anything.
#[must_use]
pub fn contains(observed: &Value, desired: &Value) -> bool {
    match (observed, desired) {
        (_, Value::Null) => true,
        (Value::Object(have), Value::Object(want)) => want.iter().all(|(key, value)| {
            have.get(key)
                .map_or_else(|| value.is_null(), |present| contains(present, value))
        }),
        (Value::Array(have), Value::Array(want)) => {
            have.len() == want.len() && have.iter().zip(want).all(|(h, w)| contains(h, w))
        }
        _ => observed == desired,
    }
}

/// Writes every field of `desired` onto `target`.
///
/// Objects merge key by key, anything else (arrays included) is replaced.
/// Fields `desired` leaves unset keep their observed values, which preserves
/// server-side state such as `resourceVersion` and `status`.
pub fn overlay(target: &mut Value, desired: &Value) {
    match (target, desired) {
        (Value::Object(have), Value::Object(want)) => {
            for (key, value) in want {
                if value.is_null() {
                    continue;
                }
                match have.get_mut(key) {
                    Some(present) => overlay(present, value),
                    None => {
                        have.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, desired) => {
            if !desired.is_null() {
                *target = desired.clone();
            }
        }
    }
}
