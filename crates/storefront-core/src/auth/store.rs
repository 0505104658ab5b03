use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{Credential, MemoryPersistence, TokenPersistence};

/// The single credential slot shared by every request.
///
/// The in-memory slot is authoritative for the running process; the
/// persistence backend only carries the token across restarts. Persistence
/// failures are logged and never surface to callers.
pub struct CredentialStore {
    slot: RwLock<Option<Credential>>,
    persistence: Box<dyn TokenPersistence>,
}

impl CredentialStore {
    /// Create a store backed by `persistence`, loading any saved token
    pub fn new(persistence: impl TokenPersistence + 'static) -> Self {
        let loaded = match persistence.load() {
            Ok(token) => token.map(Credential::from),
            Err(e) => {
                warn!(error = %e, "Failed to load stored access token");
                None
            }
        };
        debug!(present = loaded.is_some(), "Credential store initialized");

        Self {
            slot: RwLock::new(loaded),
            persistence: Box::new(persistence),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryPersistence::new())
    }

    pub fn get(&self) -> Option<Credential> {
        self.slot.read().clone()
    }

    pub fn set(&self, credential: Credential) {
        // Persist under the write lock so slot and backend agree on the last writer
        let mut slot = self.slot.write();
        if let Err(e) = self.persistence.save(credential.as_str()) {
            warn!(error = %e, "Failed to persist access token");
        }
        *slot = Some(credential);
    }

    pub fn clear(&self) {
        let mut slot = self.slot.write();
        if let Err(e) = self.persistence.remove() {
            warn!(error = %e, "Failed to remove persisted access token");
        }
        *slot = None;
    }

    pub fn is_present(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
