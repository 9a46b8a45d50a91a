//! Route handlers, one module per route group.

pub mod convert;
pub mod health;
pub mod image;
pub mod pdf;

use crate::error::ToolifyError;
use std::str::FromStr;

/// Parse an optional form field; absent or blank means `T::default()`.
fn parse_field<T>(value: Option<&str>) -> Result<T, ToolifyError>
where
    T: FromStr<Err = ToolifyError> + Default,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v.parse(),
        None => Ok(T::default()),
    }
}
