use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AllowList, AllowListError, Identity};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One curated member. `username` is informational and never authorizes.
pub struct MembershipRecord {
    pub username: String,
    pub pubkey: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// On-disk membership document: `{"frens": [{"username", "pubkey"}, ...]}`.
pub struct MembershipDocument {
    pub frens: Vec<MembershipRecord>,
}

impl MembershipDocument {
    /// Member identities in document order, duplicates kept.
    pub fn allowlist(&self) -> AllowList {
        self.frens
            .iter()
            .map(|record| Identity::new(record.pubkey.clone()))
            .collect()
    }
}

pub fn parse_membership_document(raw: &str) -> Result<MembershipDocument, AllowListError> {
    let document = serde_json::from_str::<MembershipDocument>(raw).map_err(|error| {
        AllowListError::configuration(format!("failed to parse membership document: {error}"))
    })?;
    if let Some((index, record)) = document
        .frens
        .iter()
        .enumerate()
        .find(|(_, record)| record.pubkey.is_empty())
    {
        return Err(AllowListError::configuration(format!(
            "membership record {index} ('{}') has an empty pubkey",
            record.username
        )));
    }
    Ok(document)
}

/// Reads and parses the membership file at `path`.
///
/// Unreadable or malformed input is a configuration error; there is no
/// partial result and no fallback to an empty list.
pub fn load_membership_file(path: &Path) -> Result<AllowList, AllowListError> {
    let raw = std::fs::read_to_string(path).map_err(|error| {
        AllowListError::configuration(format!(
            "failed to read membership file {}: {error}",
            path.display()
        ))
    })?;
    let document = parse_membership_document(&raw).map_err(|error| match error {
        AllowListError::Configuration { message } => {
            AllowListError::configuration(format!("{message} ({})", path.display()))
        }
        other => other,
    })?;
    Ok(document.allowlist())
}
