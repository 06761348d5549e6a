use anyhow::Result;
use toml_edit::{Item, TableLike};

use crate::BackendError;

pub(crate) fn get_str<'a>(table: &'a dyn TableLike, key: &str, field: &str) -> Result<Option<&'a str>> {
    match table.get(key) {
        None => Ok(None),
        Some(item) => item.as_str().map(Some).ok_or_else(|| {
            invalid_type(field, "a string", item)
        }),
    }
}

pub(crate) fn get_bool(table: &dyn TableLike, key: &str, field: &str) -> Result<Option<bool>> {
    match table.get(key) {
        None => Ok(None),
        Some(item) => item
            .as_bool()
            .map(Some)
            .ok_or_else(|| invalid_type(field, "a boolean", item)),
    }
}

pub(crate) fn get_str_list(table: &dyn TableLike, key: &str, field: &str) -> Result<Option<Vec<String>>> {
    let Some(item) = table.get(key) else {
        return Ok(None);
    };
    let array = item
        .as_array()
        .ok_or_else(|| invalid_type(field, "a list of strings", item))?;
    let mut values = Vec::with_capacity(array.len());
    for value in array {
        let text = value.as_str().ok_or_else(|| {
            anyhow::Error::new(BackendError::validation(
                format!("Field \"{field}\" contains item with invalid type, expecting a string (got \"{value}\")"),
                field.to_string(),
            ))
        })?;
        values.push(text.to_string());
    }
    Ok(Some(values))
}

pub(crate) fn get_str_map(
    table: &dyn TableLike,
    key: &str,
    field: &str,
) -> Result<Vec<(String, String)>> {
    let Some(item) = table.get(key) else {
        return Ok(Vec::new());
    };
    let inner = item
        .as_table_like()
        .ok_or_else(|| invalid_type(field, "a dictionary of strings", item))?;
    let mut values = Vec::new();
    for (name, value) in inner.iter() {
        let text = value
            .as_str()
            .ok_or_else(|| invalid_type(&format!("{field}.{name}"), "a string", value))?;
        values.push((name.to_string(), text.to_string()));
    }
    Ok(values)
}

pub(crate) fn invalid_type(field: &str, expected: &str, item: &Item) -> anyhow::Error {
    let shown = item.to_string();
    anyhow::Error::new(BackendError::validation(
        format!(
            "Field \"{field}\" has an invalid type, expecting {expected} (got \"{}\")",
            shown.trim()
        ),
        field.to_string(),
    ))
}
