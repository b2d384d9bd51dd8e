use std::sync::Arc;

use crate::cache::Cache;
use crate::config::Settings;
use crate::dates::Clock;
use crate::lock::DocumentLock;
use crate::store::TabularStore;

/// Everything an operation needs: the store plus the process-wide services
/// built around it.
pub struct Workspace {
    store: Arc<dyn TabularStore>,
    pub cache: Cache,
    pub lock: DocumentLock,
    pub clock: Clock,
    pub settings: Settings,
}

impl Workspace {
    pub fn new(store: Arc<dyn TabularStore>, settings: Settings, clock: Clock) -> Self {
        Self {
            lock: DocumentLock::new(settings.lock_timeout(), store.clone()),
            store,
            cache: Cache::new(),
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &dyn TabularStore {
        self.store.as_ref()
    }
}
