//! Task id lists at the definition boundary
//!
//! Older workflow exports store task relationships as delimited strings
//! (`"2,3"`). Definitions accept either that form or a proper JSON array,
//! and the engine only ever sees `Vec<TaskDefinitionId>`.

use crate::{ConfigurationIssue, TaskDefinitionId};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;

/// Parse a delimited task id list. Commas, semicolons and whitespace all
/// separate entries; empty segments are ignored; duplicates are rejected.
pub fn parse(raw: &str) -> Result<Vec<TaskDefinitionId>, ConfigurationIssue> {
    let ids = raw
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(TaskDefinitionId::new)
        .collect::<Vec<_>>();
    ensure_unique(ids).map_err(|_| ConfigurationIssue::MalformedTaskIdList(raw.to_string()))
}

fn ensure_unique(ids: Vec<TaskDefinitionId>) -> Result<Vec<TaskDefinitionId>, TaskDefinitionId> {
    let mut seen = HashSet::new();
    for id in &ids {
        if !seen.insert(id) {
            return Err(id.clone());
        }
    }
    Ok(ids)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawList {
    Delimited(String),
    Items(Vec<String>),
}

/// `deserialize_with` target for task id list fields
pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<TaskDefinitionId>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawList::deserialize(deserializer)? {
        RawList::Delimited(raw) => parse(&raw).map_err(serde::de::Error::custom),
        RawList::Items(items) => {
            let ids = items
                .into_iter()
                .map(|s| TaskDefinitionId::new(s.trim()))
                .collect();
            ensure_unique(ids).map_err(|dup| {
                serde::de::Error::custom(ConfigurationIssue::DuplicateReference(dup))
            })
        }
    }
}
