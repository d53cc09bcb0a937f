//! Resource Fetcher
//!
//! Handles fetching resources from one (profile, region) cell based on
//! resource definitions: paging, record extraction and flattening.

use super::registry::ResourceDef;
use super::sdk_dispatch::{ListingParams, Operation, Provider};
use crate::aws::xml::as_list;
use crate::error::{Error, ProviderResult};
use serde_json::{Map, Value};

/// Hard stop for a provider that keeps returning tokens
const MAX_PAGES: usize = 10_000;

/// Error while listing one cell
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Provider(#[from] crate::error::ProviderError),
    #[error(transparent)]
    Setup(#[from] Error),
}

/// Call `make_op` page after page until the response carries no token.
///
/// `extract` turns each page into items. A token repeated back-to-back
/// ends the loop, as does [`MAX_PAGES`].
pub async fn paginate<F, E>(
    provider: &dyn Provider,
    token_path: Option<&str>,
    mut make_op: F,
    mut extract: E,
) -> ProviderResult<Vec<Value>>
where
    F: FnMut(Option<String>) -> Operation,
    E: FnMut(&Value) -> Vec<Value>,
{
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let response = provider.invoke(&make_op(page_token.clone())).await?;
        all_items.extend(extract(&response));

        let next = token_path.and_then(|path| next_token(&response, path));
        if next.is_none() || next == page_token {
            break;
        }
        page_token = next;
    }

    Ok(all_items)
}

/// Fetch every record of one kind from one cell (auto-paginate)
pub async fn fetch_resources(
    def: &ResourceDef,
    provider: &dyn Provider,
    params: &ListingParams,
) -> Result<Vec<Value>, FetchError> {
    // A missing listing parameter is a setup error, raised before any call
    let first = def.listing.operation(params, None)?;

    let items = paginate(
        provider,
        def.next_token_path.as_deref(),
        |token| first.with_page_token(token),
        |response| extract_items(response, def),
    )
    .await?;

    Ok(items)
}

fn next_token(response: &Value, path: &str) -> Option<String> {
    lookup(response, path)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, part| current.get(part))
}

/// Extract records from a response using the definition's response path
pub fn extract_items(response: &Value, def: &ResourceDef) -> Vec<Value> {
    let segments: Vec<&str> = if def.response_path.is_empty() {
        Vec::new()
    } else {
        def.response_path.split('.').collect()
    };

    let mut raw_items = Vec::new();
    collect(response, &segments, &Map::new(), def, &mut raw_items);

    raw_items
        .into_iter()
        .map(|item| post_process_item(item, def))
        .collect()
}

fn collect(
    current: &Value,
    segments: &[&str],
    inherited: &Map<String, Value>,
    def: &ResourceDef,
    out: &mut Vec<Value>,
) {
    let Some((head, rest)) = segments.split_first() else {
        for item in as_list(current) {
            let mut item = item.clone();
            if let Value::Object(map) = &mut item {
                for (key, value) in inherited {
                    map.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            out.push(item);
        }
        return;
    };

    if *head == "*" {
        for element in as_list(current) {
            let mut scope = inherited.clone();
            for field in &def.inherit_fields {
                if let Some(value) = element.get(field) {
                    scope.insert(field.clone(), value.clone());
                }
            }
            collect(element, rest, &scope, def, out);
        }
    } else if let Some(next) = current.get(*head) {
        collect(next, rest, inherited, def, out);
    }
}

/// Apply the definition's flatten rules to a record
fn post_process_item(mut item: Value, def: &ResourceDef) -> Value {
    if let Value::Object(ref mut map) = item {
        for rule in &def.flatten {
            let mut flattened = Map::new();
            if let Some(list) = map.get(&rule.field) {
                for element in as_list(list) {
                    let Some(key) = element.get(&rule.key).and_then(scalar_key) else {
                        continue;
                    };
                    let value = match &rule.value {
                        Some(field) => element.get(field).cloned().unwrap_or(Value::Null),
                        None => element.clone(),
                    };
                    flattened.insert(key, value);
                }
            }
            map.insert(rule.field.clone(), Value::Object(flattened));
        }
    }
    item
}

/// Natural-key rendering of a scalar
pub fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Extract a value from JSON using a dot-notation path, rendered for display
pub fn extract_json_value(item: &Value, path: &str) -> String {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = item;

    for part in parts {
        // Handle array index
        if let Ok(idx) = part.parse::<usize>() {
            current = match current.get(idx) {
                Some(v) => v,
                None => return "-".to_string(),
            };
        } else {
            current = match current.get(part) {
                Some(v) => v,
                None => return "-".to_string(),
            };
        }
    }

    match current {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "-".to_string(),
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(_) => "[object]".to_string(),
    }
}
