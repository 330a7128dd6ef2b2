use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// NIP-01 subscription filter.
///
/// Single-letter tag constraints (`#e`, `#p`, ...) and any unknown keys are
/// kept in `extensions` so a filter survives a round trip unchanged.
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl Filter {
    /// Filter for the newest contact list authored by `author`.
    pub fn contact_list_of(author: &str) -> Self {
        Self {
            authors: Some(vec![author.to_string()]),
            kinds: Some(vec![crate::event::KIND_CONTACT_LIST]),
            limit: Some(1),
            ..Self::default()
        }
    }

    /// Tag constraints as `(tag name, accepted values)` pairs.
    pub fn tag_constraints(&self) -> Vec<(&str, Vec<&str>)> {
        self.extensions
            .iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix('#')?;
                if name.chars().count() != 1 {
                    return None;
                }
                let values = value
                    .as_array()?
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>();
                Some((name, values))
            })
            .collect()
    }

    pub fn has_tag_constraints(&self) -> bool {
        !self.tag_constraints().is_empty()
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id == &event.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|author| author == &event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }
        self.tag_constraints().into_iter().all(|(name, accepted)| {
            event
                .tag_values(name)
                .any(|value| accepted.contains(&value))
        })
    }
}

/// Orders events newest first with the id as a stable tie-break.
pub fn sort_newest_first(events: &mut [Event]) {
    events.sort_by(|left, right| {
        right
            .created_at
            .cmp(&left.created_at)
            .then_with(|| left.id.cmp(&right.id))
    });
}
