//! ACME HTTP-01 challenge responder.
//!
//! Challenge requests are diverted before the matcher ever sees them, so a
//! rule table can never shadow an in-flight certificate issuance.

use std::collections::HashMap;

use parking_lot::RwLock;

pub const CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Extract the challenge token when `path` is under the HTTP-01 prefix.
pub fn challenge_token(path: &str) -> Option<&str> {
    path.strip_prefix(CHALLENGE_PREFIX)
}

/// Answers HTTP-01 probes. The edge serves `200` with the key authorization
/// for known tokens and `404` otherwise.
pub trait AcmeResponder: Send + Sync {
    fn key_authorization(&self, token: &str) -> Option<String>;
}

/// In-memory token store; whichever component drives the ACME order inserts
/// tokens before the CA probes and removes them afterwards.
#[derive(Default)]
pub struct ChallengeStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, key_authorization: impl Into<String>) {
        self.tokens
            .write()
            .insert(token.into(), key_authorization.into());
    }

    pub fn remove(&self, token: &str) {
        self.tokens.write().remove(token);
    }
}

impl AcmeResponder for ChallengeStore {
    fn key_authorization(&self, token: &str) -> Option<String> {
        self.tokens.read().get(token).cloned()
    }
}
