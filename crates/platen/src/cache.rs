//! Process-local template cache.
//!
//! Maps a (tenant-code, workspace-code, document-type-code) triple to the
//! resolved published version. Concurrent misses on the same key coalesce
//! into a single resolution: the first caller resolves while holding the
//! key's slot lock and everyone else waits for its result. Negative
//! results are never cached, so a template published after a miss is
//! picked up on the next request without explicit invalidation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use platen_types::{DocumentType, Result, Template, TemplateVersion, Tenant, Workspace};

/// Cache key: the render request triple.
pub type TriadKey = (String, String, String);

/// The outcome of a successful fallback resolution.
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub tenant: Tenant,
    pub workspace: Workspace,
    pub doc_type: DocumentType,
    pub template: Template,
    pub version: TemplateVersion,
}

#[derive(Default)]
struct Slot {
    value: Mutex<Option<ResolvedTemplate>>,
}

/// Concurrent map with single-writer-per-key resolution.
#[derive(Default)]
pub struct TemplateCache {
    entries: Mutex<HashMap<TriadKey, Arc<Slot>>>,
}

impl TemplateCache {
    pub fn new() -> TemplateCache {
        TemplateCache::default()
    }

    /// Look up `key`, running `resolve` on a miss. While one caller
    /// resolves, other callers for the same key block on its slot; callers
    /// for other keys proceed independently.
    pub fn get_or_resolve(
        &self,
        key: &TriadKey,
        resolve: impl FnOnce() -> Result<Option<ResolvedTemplate>>,
    ) -> Result<Option<ResolvedTemplate>> {
        let slot = {
            let mut entries = self.entries.lock().unwrap();
            Arc::clone(entries.entry(key.clone()).or_default())
        };

        let mut value = slot.value.lock().unwrap();
        if let Some(hit) = value.as_ref() {
            return Ok(Some(hit.clone()));
        }

        match resolve() {
            Ok(Some(resolved)) => {
                *value = Some(resolved.clone());
                Ok(Some(resolved))
            }
            Ok(None) => {
                drop(value);
                self.drop_slot(key, &slot);
                Ok(None)
            }
            Err(err) => {
                drop(value);
                self.drop_slot(key, &slot);
                Err(err)
            }
        }
    }

    /// Remove one key.
    pub fn invalidate(&self, key: &TriadKey) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Remove every key that resolves through the given document-type
    /// code, whichever tenant or workspace reached it.
    pub fn invalidate_doc_type(&self, doc_type_code: &str) {
        self.entries
            .lock()
            .unwrap()
            .retain(|(_, _, code), _| code != doc_type_code);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Drop an empty slot so negative outcomes are not retained. A slot
    /// refilled by a racing resolver is left in place.
    fn drop_slot(&self, key: &TriadKey, slot: &Arc<Slot>) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(current) = entries.get(key)
            && Arc::ptr_eq(current, slot)
            && current.value.lock().unwrap().is_none()
        {
            entries.remove(key);
        }
    }
}
