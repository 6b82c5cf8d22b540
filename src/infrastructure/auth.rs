//! Credential resolution and identity-claim decoding.
//!
//! Precedence: explicit argument > persistent store (historical key names,
//! newest first) > host-page local state. The resolved credential is cached
//! back into the store. No network validation happens here; invalidity is
//! discovered only when the remote endpoint rejects a later request.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::error::AuthError;
use crate::infrastructure::store::{KEY_CREDENTIAL, KEY_IDENTITY_CLAIM, SessionStore};

/// Subject identifier decoded from the credential's payload segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    pub sub: String,
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolvedAuth {
    pub credential: String,
    pub claim: Option<IdentityClaim>,
}

#[derive(Debug, Deserialize)]
struct ClaimPayload {
    sub: Option<String>,
}

pub struct AuthResolver {
    store: Arc<SessionStore>,
}

impl AuthResolver {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Resolves a credential once per session. `page_local` is the host
    /// page's own stored token, consulted last.
    pub fn resolve(
        &self,
        explicit: Option<&str>,
        page_local: Option<String>,
    ) -> Result<ResolvedAuth, AuthError> {
        let credential = if let Some(token) = explicit.filter(|t| !t.is_empty()) {
            debug!("credential supplied explicitly");
            self.store.set(KEY_CREDENTIAL, &token)?;
            token.to_string()
        } else if let Some(token) = self.store.credential() {
            debug!("credential resolved from session store");
            token
        } else if let Some(token) = page_local.filter(|t| !t.is_empty()) {
            debug!("credential recovered from host-page local state");
            self.store.set(KEY_CREDENTIAL, &token)?;
            token
        } else {
            return Err(AuthError::NotFound);
        };

        let claim = match self.store.get::<IdentityClaim>(KEY_IDENTITY_CLAIM) {
            Some(claim) => Some(claim),
            None => {
                let decoded = decode_claim(&credential);
                match &decoded {
                    Some(claim) => self.store.set(KEY_IDENTITY_CLAIM, claim)?,
                    // Tolerated: the run proceeds with a null claim.
                    None => warn!("could not decode identity claim from credential"),
                }
                decoded
            }
        };

        Ok(ResolvedAuth { credential, claim })
    }
}

/// Decodes the subject claim from the middle segment of a three-part signed
/// token (URL-safe base64 JSON payload). Any malformation yields `None`.
pub fn decode_claim(credential: &str) -> Option<IdentityClaim> {
    let mut segments = credential.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let _signature = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let payload: ClaimPayload = serde_json::from_slice(&bytes).ok()?;
    payload.sub.map(|sub| IdentityClaim { sub })
}
