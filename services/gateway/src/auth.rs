//! Token → member resolution seam.
//!
//! Authentication itself belongs to the account service; by the time
//! the ranking core is engaged, a token has already been exchanged for
//! a member identity. The gateway only carries the seam: a resolver
//! trait plus a development implementation that accepts pre-issued
//! opaque tokens.

use dashmap::DashMap;
use types::ids::MemberId;

/// Resolves an opaque client token to the member that owns it.
pub trait TokenResolver: Send + Sync + 'static {
    fn resolve(&self, token: &str) -> Option<MemberId>;
}

/// In-process token table for development and tests.
///
/// Production deployments replace this with a resolver backed by the
/// account service's session store.
#[derive(Default)]
pub struct StaticTokenResolver {
    tokens: DashMap<String, MemberId>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a member; returns self for chained setup.
    pub fn with_token(self, token: impl Into<String>, member: MemberId) -> Self {
        self.tokens.insert(token.into(), member);
        self
    }

    pub fn insert(&self, token: impl Into<String>, member: MemberId) {
        self.tokens.insert(token.into(), member);
    }
}

impl TokenResolver for StaticTokenResolver {
    fn resolve(&self, token: &str) -> Option<MemberId> {
        self.tokens.get(token).map(|entry| *entry.value())
    }
}
