use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use skiff_asyncutils::{Gauge, SingleFlight};
use skiff_config::{IntegrityPolicy, SyncConfig};
use skiff_content::StoreHandle;
use skiff_content::models::{ContentId, Saved};
use skiff_manifest::models::{ContentKind, NaturalKey};
use skiff_registry::{RegistryHandle, Target};
use skiff_storage::BackendHandle;
use tokio_util::sync::CancellationToken;

use crate::report::Recorder;
use crate::unit::Download;

/// Whether the remote had the target. `None` is a 404.
pub(crate) type Fetch = Option<Arc<Download>>;

/// Everything the stages of one sync share.
pub(crate) struct Context {
    pub registry: RegistryHandle,
    pub storage: BackendHandle,
    pub store: StoreHandle,
    /// Configured name of the remote, recorded with every remote artifact.
    pub remote: String,
    /// Repository name on the remote.
    pub upstream: String,
    pub config: SyncConfig,
    pub include_foreign_layers: bool,
    /// Fires on caller cancellation or on the first fatal error.
    pub cancel: CancellationToken,
    /// Counts units between discovery and the end of a pass.
    pub gauge: Gauge,
    pub downloads: SingleFlight<Target, Fetch>,
    pub saves: Deduplicator,
    pub recorder: Recorder,
}
impl Context {
    pub fn skips_rejections(&self) -> bool {
        self.config.integrity == IntegrityPolicy::Skip
    }
}

pub(crate) type ContentKey = (ContentKind, NaturalKey);

/// Single-flight saves plus the identities already settled during this sync.
///
/// A key settled earlier in the sync is answered from memory, so each natural
/// key is written at most once per sync even when its saves do not overlap.
#[derive(Default)]
pub(crate) struct Deduplicator {
    pub flights: SingleFlight<ContentKey, Saved>,
    settled: Mutex<HashMap<ContentKey, ContentId>>,
}
impl Deduplicator {
    fn lock(&self) -> MutexGuard<'_, HashMap<ContentKey, ContentId>> {
        self.settled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settled(&self, key: &ContentKey) -> Option<ContentId> {
        self.lock().get(key).copied()
    }

    pub fn settle(&self, key: ContentKey, id: ContentId) {
        self.lock().insert(key, id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
