// Mirror identity cache
//
// Deduplicates remote-entity proxies by wire identity: for a given identity
// and connection at most one live mirror exists, so two lookups return the
// same Arc. Entries are removed when a reply reports the remote entity
// collected; the next lookup then constructs a fresh mirror. Remote ids are
// not reused by the wire protocol while the connection is live, so there is
// no eviction beyond explicit invalidation.

use crate::connection::ConnectionInner;
use crate::object::ObjectMirror;
use crate::reftype::ReferenceTypeMirror;
use crate::thread::{ThreadGroupMirror, ThreadMirror};
use crate::types::{ObjectId, ReferenceTypeId, ThreadGroupId, ThreadId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Cache key: object ids and reference-type ids live in distinct wire
/// namespaces, so the key carries the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorKey {
    Object(ObjectId),
    Type(ReferenceTypeId),
}

#[derive(Debug, Clone)]
enum CachedMirror {
    Thread(Arc<ThreadMirror>),
    ThreadGroup(Arc<ThreadGroupMirror>),
    Object(Arc<ObjectMirror>),
    Type(Arc<ReferenceTypeMirror>),
}

#[derive(Debug, Default)]
pub(crate) struct MirrorCache {
    entries: Mutex<HashMap<MirrorKey, CachedMirror>>,
}

impl MirrorCache {
    pub fn thread(&self, vm: &Weak<ConnectionInner>, id: ThreadId) -> Arc<ThreadMirror> {
        let mut entries = self.entries.lock().expect("mirror cache poisoned");
        if let Some(CachedMirror::Thread(mirror)) = entries.get(&MirrorKey::Object(id)) {
            return mirror.clone();
        }
        let mirror = Arc::new(ThreadMirror::new(vm.clone(), id));
        entries.insert(MirrorKey::Object(id), CachedMirror::Thread(mirror.clone()));
        mirror
    }

    pub fn thread_group(
        &self,
        vm: &Weak<ConnectionInner>,
        id: ThreadGroupId,
    ) -> Arc<ThreadGroupMirror> {
        let mut entries = self.entries.lock().expect("mirror cache poisoned");
        if let Some(CachedMirror::ThreadGroup(mirror)) = entries.get(&MirrorKey::Object(id)) {
            return mirror.clone();
        }
        let mirror = Arc::new(ThreadGroupMirror::new(vm.clone(), id));
        entries.insert(
            MirrorKey::Object(id),
            CachedMirror::ThreadGroup(mirror.clone()),
        );
        mirror
    }

    pub fn object(&self, vm: &Weak<ConnectionInner>, tag: u8, id: ObjectId) -> Arc<ObjectMirror> {
        let mut entries = self.entries.lock().expect("mirror cache poisoned");
        if let Some(CachedMirror::Object(mirror)) = entries.get(&MirrorKey::Object(id)) {
            return mirror.clone();
        }
        let mirror = Arc::new(ObjectMirror::new(vm.clone(), tag, id));
        entries.insert(MirrorKey::Object(id), CachedMirror::Object(mirror.clone()));
        mirror
    }

    pub fn reference_type(
        &self,
        vm: &Weak<ConnectionInner>,
        id: ReferenceTypeId,
    ) -> Arc<ReferenceTypeMirror> {
        let mut entries = self.entries.lock().expect("mirror cache poisoned");
        if let Some(CachedMirror::Type(mirror)) = entries.get(&MirrorKey::Type(id)) {
            return mirror.clone();
        }
        let mirror = Arc::new(ReferenceTypeMirror::new(vm.clone(), id));
        entries.insert(MirrorKey::Type(id), CachedMirror::Type(mirror.clone()));
        mirror
    }

    /// Remove an entry after a reply reported the remote entity collected.
    pub fn invalidate(&self, key: MirrorKey) {
        self.entries
            .lock()
            .expect("mirror cache poisoned")
            .remove(&key);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("mirror cache poisoned").len()
    }
}
