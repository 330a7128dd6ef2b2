use anyhow::{anyhow, bail, Context, Result};
use secp256k1::{schnorr, Keypair, Message, XOnlyPublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

pub const KIND_METADATA: u16 = 0;
pub const KIND_TEXT_NOTE: u16 = 1;
pub const KIND_CONTACT_LIST: u16 = 3;
pub const KIND_CLIENT_AUTH: u16 = 22242;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Signed Nostr event as exchanged on the wire.
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Identifies the slot a replaceable or addressable event occupies.
pub struct ReplacementKey {
    pub kind: u16,
    pub pubkey: String,
    pub d_tag: Option<String>,
}

impl Event {
    /// Builds and signs an event for the x-only public key of `keypair`.
    pub fn sign(
        keypair: &Keypair,
        created_at: u64,
        kind: u16,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
    ) -> Self {
        let (public_key, _parity) = keypair.x_only_public_key();
        let mut event = Self {
            id: String::new(),
            pubkey: hex::encode(public_key.serialize()),
            created_at,
            kind,
            tags,
            content: content.into(),
            sig: String::new(),
        };
        let digest = event.id_digest();
        event.id = hex::encode(digest);
        let signature = SECP256K1.sign_schnorr_no_aux_rand(&Message::from_digest(digest), keypair);
        event.sig = signature.to_string();
        event
    }

    /// Computes the canonical NIP-01 id over `[0, pubkey, created_at, kind, tags, content]`.
    pub fn compute_id(&self) -> String {
        hex::encode(self.id_digest())
    }

    fn id_digest(&self) -> [u8; 32] {
        let canonical = json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hasher.finalize().into()
    }

    pub fn verify_id(&self) -> Result<()> {
        let expected = self.compute_id();
        if self.id != expected {
            bail!("event id does not match its content");
        }
        Ok(())
    }

    pub fn verify_signature(&self) -> Result<()> {
        let id_bytes = decode_fixed::<32>(&self.id, "event id")?;
        let pubkey_bytes = decode_fixed::<32>(&self.pubkey, "event pubkey")?;
        let sig_bytes = decode_fixed::<64>(&self.sig, "event signature")?;
        let public_key = XOnlyPublicKey::from_slice(&pubkey_bytes)
            .map_err(|error| anyhow!("event pubkey is not a valid x-only key: {error}"))?;
        let signature = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|error| anyhow!("event signature is malformed: {error}"))?;
        SECP256K1
            .verify_schnorr(&signature, &Message::from_digest(id_bytes), &public_key)
            .map_err(|_| anyhow!("event signature verification failed"))
    }

    /// Checks both the id hash and the Schnorr signature.
    pub fn verify(&self) -> Result<()> {
        self.verify_id()?;
        self.verify_signature()
    }

    /// Yields the second element of every tag named `name`, in tag order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// First value of a tag named `name`; the result borrows only from the event.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .filter(|tag| tag.first().map(String::as_str) == Some(name))
            .find_map(|tag| tag.get(1).map(String::as_str))
    }

    pub fn is_ephemeral(&self) -> bool {
        (20_000..30_000).contains(&self.kind)
    }

    pub fn is_replaceable(&self) -> bool {
        self.kind == KIND_METADATA
            || self.kind == KIND_CONTACT_LIST
            || (10_000..20_000).contains(&self.kind)
    }

    pub fn is_addressable(&self) -> bool {
        (30_000..40_000).contains(&self.kind)
    }

    /// Returns the slot key for replaceable and addressable kinds.
    pub fn replacement_key(&self) -> Option<ReplacementKey> {
        if self.is_replaceable() {
            return Some(ReplacementKey {
                kind: self.kind,
                pubkey: self.pubkey.clone(),
                d_tag: None,
            });
        }
        if self.is_addressable() {
            return Some(ReplacementKey {
                kind: self.kind,
                pubkey: self.pubkey.clone(),
                d_tag: Some(self.first_tag_value("d").unwrap_or_default().to_string()),
            });
        }
        None
    }

    /// True when `self` should win over `other` for the same replacement slot.
    pub fn supersedes(&self, other: &Event) -> bool {
        self.created_at > other.created_at
            || (self.created_at == other.created_at && self.id < other.id)
    }
}

/// Parses a 32-byte secret key in hex into a signing keypair.
pub fn keypair_from_secret_hex(secret_hex: &str) -> Result<Keypair> {
    let secret = decode_fixed::<32>(secret_hex.trim(), "secret key")?;
    Keypair::from_seckey_slice(SECP256K1, &secret)
        .map_err(|error| anyhow!("invalid secret key: {error}"))
}

fn decode_fixed<const N: usize>(raw: &str, label: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(raw).with_context(|| format!("{label} must be hex encoded"))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow!("{label} must be {N} bytes, found {}", bytes.len()))
}
