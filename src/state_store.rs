use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::types::{DownloadId, DownloadState, DownloadStatus};

/// Handle to a download's running task, detachable from its state entry.
pub struct TaskHandle {
    pub cancel: CancellationToken,
    pub join: JoinHandle<()>,
}

struct Entry {
    state: DownloadState,
    task: Option<TaskHandle>,
}

/// Owns the `DownloadId -> (State, TaskHandle?)` mapping. All reads and
/// writes go through a single mutex; the stored state is replaced, never
/// mutated in place, so readers always observe a consistent snapshot.
pub struct StateStore {
    entries: Mutex<HashMap<DownloadId, Entry>>,
    states_tx: watch::Sender<Vec<DownloadState>>,
}

impl StateStore {
    pub fn new() -> Self {
        let (states_tx, _) = watch::channel(Vec::new());
        Self {
            entries: Mutex::new(HashMap::new()),
            states_tx,
        }
    }

    pub fn states_watch(&self) -> watch::Receiver<Vec<DownloadState>> {
        self.states_tx.subscribe()
    }

    pub fn get(&self, id: &DownloadId) -> Option<DownloadState> {
        self.entries.lock().unwrap().get(id).map(|e| e.state.clone())
    }

    pub fn all(&self) -> Vec<DownloadState> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .map(|e| e.state.clone())
            .collect()
    }

    pub fn active_ids(&self) -> Vec<DownloadId> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.state.status.is_active())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Insert the initial state for a fresh download. Returns `false` (a
    /// no-op) if an entry already exists for this id; a pre-existing entry
    /// is treated as already handled.
    pub fn insert_or_reject(&self, id: DownloadId, initial: DownloadState) -> bool {
        let mut guard = self.entries.lock().unwrap();
        if guard.contains_key(&id) {
            return false;
        }
        guard.insert(
            id,
            Entry {
                state: initial,
                task: None,
            },
        );
        self.publish_states(&guard);
        true
    }

    /// Apply `transform` to the current state and publish the result. A
    /// no-op (returns `None`) if the id is absent.
    pub fn update(
        &self,
        id: &DownloadId,
        transform: impl FnOnce(&DownloadState) -> DownloadState,
    ) -> Option<DownloadState> {
        let mut guard = self.entries.lock().unwrap();
        let entry = guard.get_mut(id)?;
        entry.state = transform(&entry.state);
        let new_state = entry.state.clone();
        self.publish_states(&guard);
        Some(new_state)
    }

    pub fn attach_task(&self, id: &DownloadId, task: TaskHandle) {
        let mut guard = self.entries.lock().unwrap();
        if let Some(entry) = guard.get_mut(id) {
            entry.task = Some(task);
        }
    }

    /// Detach the task handle without modifying state. Returns the handle
    /// so the caller can cancel/join it outside the lock.
    pub fn detach_task(&self, id: &DownloadId) -> Option<TaskHandle> {
        self.entries.lock().unwrap().get_mut(id)?.task.take()
    }

    pub fn has_active_task(&self, id: &DownloadId) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(id)
            .map(|e| e.task.is_some())
            .unwrap_or(false)
    }

    /// Combined atomic transition used by pause/cancel: set the terminal
    /// status and detach the task handle in one critical section.
    pub fn set_status_and_detach(
        &self,
        id: &DownloadId,
        new_status: DownloadStatus,
    ) -> Option<(DownloadState, Option<TaskHandle>)> {
        let mut guard = self.entries.lock().unwrap();
        let entry = guard.get_mut(id)?;
        entry.state.status = new_status;
        entry.state.timestamp = crate::types::now_millis();
        let task = entry.task.take();
        let new_state = entry.state.clone();
        self.publish_states(&guard);
        Some((new_state, task))
    }

    /// Empty the map entirely, as the final step of an orderly engine
    /// shutdown. Callers must have already cancelled and joined every task
    /// (e.g. via `set_status_and_detach`/`detach_task`) before calling this;
    /// any task handle still attached is simply dropped, not cancelled.
    pub fn clear(&self) {
        let mut guard = self.entries.lock().unwrap();
        guard.clear();
        self.publish_states(&guard);
    }

    fn publish_states(&self, guard: &HashMap<DownloadId, Entry>) {
        let snapshot: Vec<DownloadState> = guard.values().map(|e| e.state.clone()).collect();
        let _ = self.states_tx.send(snapshot);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaType;
    use std::path::PathBuf;
    use url::Url;

    fn sample_state(id: &DownloadId) -> DownloadState {
        DownloadState::new_initializing(
            id.clone(),
            Url::parse("https://host/video.m3u8").unwrap(),
            PathBuf::from("out.mp4"),
            PathBuf::from("out_segments"),
            MediaType::M3u8,
        )
    }

    #[test]
    fn insert_or_reject_rejects_duplicate_id() {
        let store = StateStore::new();
        let id = DownloadId::from("abc");
        assert!(store.insert_or_reject(id.clone(), sample_state(&id)));
        assert!(!store.insert_or_reject(id.clone(), sample_state(&id)));
    }

    #[test]
    fn update_is_noop_for_absent_id() {
        let store = StateStore::new();
        let id = DownloadId::from("missing");
        let result = store.update(&id, |s| s.clone());
        assert!(result.is_none());
    }

    #[test]
    fn clear_empties_the_map() {
        let store = StateStore::new();
        let id = DownloadId::from("abc");
        store.insert_or_reject(id.clone(), sample_state(&id));
        assert!(store.get(&id).is_some());

        store.clear();
        assert!(store.get(&id).is_none());
        assert!(store.all().is_empty());
    }

    #[test]
    fn set_status_and_detach_clears_task() {
        let store = StateStore::new();
        let id = DownloadId::from("abc");
        store.insert_or_reject(id.clone(), sample_state(&id));
        assert!(!store.has_active_task(&id));

        let (state, task) = store
            .set_status_and_detach(&id, DownloadStatus::Canceled)
            .unwrap();
        assert_eq!(state.status, DownloadStatus::Canceled);
        assert!(task.is_none());
    }
}
