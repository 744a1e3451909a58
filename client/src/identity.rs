//! Local player identity and display names

use shared::PlayerId;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

pub trait IdentityProvider {
    fn local_identity(&self) -> PlayerId;
    fn display_name(&self, id: PlayerId) -> String;
}

/// Identity provider with a fixed local user and a table of known names
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    local: PlayerId,
    names: HashMap<PlayerId, String>,
}

impl StaticIdentity {
    pub fn new(local: PlayerId, name: impl Into<String>) -> Self {
        let mut names = HashMap::new();
        names.insert(local, name.into());
        Self { local, names }
    }

    /// Derives a stable id from the player name, for setups without a platform account.
    pub fn from_name(name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(PlayerId(hasher.finish()), name)
    }

    pub fn with_known(mut self, id: PlayerId, name: impl Into<String>) -> Self {
        self.names.insert(id, name.into());
        self
    }
}

impl IdentityProvider for StaticIdentity {
    fn local_identity(&self) -> PlayerId {
        self.local
    }

    fn display_name(&self, id: PlayerId) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("Player {:04x}", id.0 & 0xffff))
    }
}
