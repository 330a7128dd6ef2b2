//! NIP-42 challenge issuance and AUTH event verification.
use super::*;

use axum::http::Uri;
use frens_core::{is_within_skew, KIND_CLIENT_AUTH};
use rand::RngCore;

pub(super) const AUTH_EVENT_MAX_SKEW_SECONDS: u64 = 600;
const AUTH_CHALLENGE_BYTES: usize = 16;

pub(super) fn issue_auth_challenge() -> String {
    let mut bytes = [0_u8; AUTH_CHALLENGE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn uri_host(raw: &str) -> Option<String> {
    let uri = raw.trim().parse::<Uri>().ok()?;
    uri.host().map(|host| host.to_ascii_lowercase())
}

/// Checks a client AUTH event against the challenge issued on this
/// connection. Returns the authenticated identity or a rejection message.
pub(super) fn verify_auth_event(
    event: &Event,
    challenge: &str,
    service_url: Option<&str>,
    now_unix: u64,
) -> Result<Identity, String> {
    if event.kind != KIND_CLIENT_AUTH {
        return Err(format!(
            "invalid: auth event must be kind {KIND_CLIENT_AUTH}, found {}",
            event.kind
        ));
    }
    if let Err(error) = event.verify() {
        return Err(format!("invalid: {error}"));
    }
    if !is_within_skew(event.created_at, now_unix, AUTH_EVENT_MAX_SKEW_SECONDS) {
        return Err(format!(
            "invalid: auth event created_at is more than {AUTH_EVENT_MAX_SKEW_SECONDS} seconds from now"
        ));
    }
    if event.first_tag_value("challenge") != Some(challenge) {
        return Err("invalid: challenge tag does not match".to_string());
    }
    if let Some(service_url) = service_url {
        let expected = uri_host(service_url);
        let observed = event.first_tag_value("relay").and_then(uri_host);
        if expected.is_none() || expected != observed {
            return Err("invalid: relay tag does not name this relay".to_string());
        }
    }
    Ok(Identity::new(event.pubkey.clone()))
}

/// Applies an AUTH frame to the session and builds the OK reply.
pub(super) fn apply_auth_event(
    state: &RelayServerState,
    session: &mut RelayConnectionSession,
    event: &Event,
) -> RelayMessage {
    if let Some(existing) = session.authenticated.as_ref() {
        if existing.as_str() != event.pubkey {
            warn!(
                connection_id = session.connection_id,
                peer = %session.peer,
                identity = existing.short(),
                "refused second AUTH identity on connection"
            );
            return RelayMessage::Ok {
                event_id: event.id.clone(),
                accepted: false,
                message: ALREADY_AUTHENTICATED_MESSAGE.to_string(),
            };
        }
    }

    match verify_auth_event(
        event,
        session.challenge.as_str(),
        state.config.service_url.as_deref(),
        current_unix_timestamp(),
    ) {
        Ok(identity) => {
            info!(
                connection_id = session.connection_id,
                peer = %session.peer,
                identity = identity.short(),
                member = state.config.gate.allowlist().contains(&identity),
                "connection authenticated"
            );
            session.authenticated = Some(identity);
            RelayMessage::Ok {
                event_id: event.id.clone(),
                accepted: true,
                message: String::new(),
            }
        }
        Err(message) => {
            debug!(
                connection_id = session.connection_id,
                peer = %session.peer,
                reason = message.as_str(),
                "auth event rejected"
            );
            RelayMessage::Ok {
                event_id: event.id.clone(),
                accepted: false,
                message,
            }
        }
    }
}
