//! Schema validation for everything the backend sends us.
//!
//! Parsing happens in two steps: `serde` enforces the shape, [`Validate`]
//! enforces the value constraints serde cannot express. Both failures map to
//! [`ClientError::Validation`] so malformed data never reaches the stores.

use std::collections::HashSet;

use serde::de::DeserializeOwned;

use crate::{domain::Entity, error::ClientError};

pub trait Validate {
    fn validate(&self) -> Result<(), ClientError>;
}

impl<T: Entity> Validate for Vec<T> {
    fn validate(&self) -> Result<(), ClientError> {
        let mut seen = HashSet::with_capacity(self.len());
        for item in self {
            item.validate()?;
            if !seen.insert(item.id()) {
                return Err(ClientError::validation(format!(
                    "duplicate {} id '{}' in collection",
                    T::KIND.as_str(),
                    item.id()
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_validated<T>(body: &str) -> Result<T, ClientError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_str(body)
        .map_err(|e| ClientError::validation(format!("malformed body: {e}")))?;
    value.validate()?;
    Ok(value)
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

pub(crate) fn require_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ClientError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ClientError::validation(format!(
            "{field} must be within {min}..={max}, got {value}"
        )));
    }
    Ok(())
}
