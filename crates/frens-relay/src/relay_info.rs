//! NIP-11 relay information document.
use serde::{Deserialize, Serialize};

pub const NIP11_CONTENT_TYPE: &str = "application/nostr+json";
pub const SUPPORTED_NIPS: [u16; 3] = [1, 11, 42];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInfo {
    pub name: String,
    pub pubkey: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInfoDocument {
    pub name: String,
    pub description: String,
    pub pubkey: String,
    pub supported_nips: Vec<u16>,
    pub software: String,
    pub version: String,
    pub limitation: RelayLimitation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayLimitation {
    pub auth_required: bool,
    pub restricted_writes: bool,
}

impl RelayInfo {
    pub fn document(&self) -> RelayInfoDocument {
        RelayInfoDocument {
            name: self.name.clone(),
            description: self.description.clone(),
            pubkey: self.pubkey.clone(),
            supported_nips: SUPPORTED_NIPS.to_vec(),
            software: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            limitation: RelayLimitation {
                auth_required: true,
                restricted_writes: true,
            },
        }
    }
}

/// True when the request's `Accept` header asks for the NIP-11 document.
pub fn accepts_relay_info(accept: Option<&str>) -> bool {
    accept.is_some_and(|accept| {
        accept
            .split(',')
            .any(|value| value.trim().starts_with(NIP11_CONTENT_TYPE))
    })
}

#[cfg(test)]
mod tests {
    use super::{accepts_relay_info, RelayInfo};

    #[test]
    fn unit_document_advertises_auth_nips() {
        let document = RelayInfo {
            name: "frens".to_string(),
            pubkey: "ab".repeat(32),
            description: "members only".to_string(),
        }
        .document();
        assert_eq!(document.supported_nips, vec![1, 11, 42]);
        assert!(document.limitation.auth_required);
        assert_eq!(document.software, "frens-relay");
        let value = serde_json::to_value(&document).expect("encode document");
        assert_eq!(value["name"], "frens");
        assert_eq!(value["description"], "members only");
    }

    #[test]
    fn unit_accept_header_detection() {
        assert!(accepts_relay_info(Some("application/nostr+json")));
        assert!(accepts_relay_info(Some(
            "text/html, application/nostr+json; q=0.9"
        )));
        assert!(!accepts_relay_info(Some("application/json")));
        assert!(!accepts_relay_info(None));
    }
}
