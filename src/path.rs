//! Dotted-path access into an opaque JSON payload.
//!
//! Paths address nested objects only (`"a.b.c"`). Indexing into arrays is not
//! part of the algebra; arrays are only ever replaced wholesale.

use crate::error::PathError;
use serde_json::Value;

/// Splits a dotted path into its segments.
pub fn split(path: &str) -> Result<Vec<&str>, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(path.split('.').collect())
}

/// Reads the value at `path`.
pub fn get<'a>(payload: &'a Value, path: &str) -> Result<&'a Value, PathError> {
    let mut current = payload;
    for segment in split(path)? {
        let obj = current.as_object().ok_or_else(|| PathError::NotTraversable {
            path: path.to_string(),
            segment: segment.to_string(),
        })?;
        current = obj.get(segment).ok_or_else(|| PathError::NotFound {
            path: path.to_string(),
            segment: segment.to_string(),
        })?;
    }
    Ok(current)
}

/// Writes `value` at `path`. Every segment but the last must already exist;
/// the last one is created or overwritten.
pub fn set(payload: &mut Value, value: Value, path: &str) -> Result<(), PathError> {
    let segments = split(path)?;
    let (last, parents) = segments.split_last().ok_or(PathError::Empty)?;

    let mut current = payload;
    for segment in parents {
        let obj = current.as_object_mut().ok_or_else(|| PathError::NotTraversable {
            path: path.to_string(),
            segment: segment.to_string(),
        })?;
        current = obj.get_mut(*segment).ok_or_else(|| PathError::NotFound {
            path: path.to_string(),
            segment: segment.to_string(),
        })?;
    }

    let obj = current.as_object_mut().ok_or_else(|| PathError::NotTraversable {
        path: path.to_string(),
        segment: last.to_string(),
    })?;
    obj.insert(last.to_string(), value);
    Ok(())
}
