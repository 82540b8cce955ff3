use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::KeyValueStorage;
use crate::task::{Importance, Task};

pub const STORAGE_KEY: &str = "todo-list";
pub const BACKUP_KEY: &str = "todo-list.unreadable";

/// Everything that is written under [`STORAGE_KEY`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    #[serde(default, alias = "todos")]
    pub tasks: Vec<Task>,

    #[serde(default)]
    pub id_counter: u64,

    #[serde(default)]
    pub add_button_disabled: bool,
}

/// Owns the task list and saves a full snapshot after every mutation.
///
/// Mutators never fail: an unknown id is a no-op and a failed save is only
/// logged. Use [`TaskStore::flush`] when the caller needs to know the last
/// mutation reached storage.
#[derive(Debug)]
pub struct TaskStore<S: KeyValueStorage> {
    state: StoreState,
    storage: S,
    dirty: bool,
    // raw value that could not be restored in full; copied to BACKUP_KEY
    // before the first write replaces it
    unrestored: Option<String>,
}

impl<S: KeyValueStorage> TaskStore<S> {
    #[tracing::instrument(skip(storage))]
    pub fn open(storage: S) -> Self {
        let restored = restore_state(&storage);
        let state = restored.state;
        info!(
            tasks = state.tasks.len(),
            id_counter = state.id_counter,
            add_button_disabled = state.add_button_disabled,
            lossy = restored.unrestored.is_some(),
            "opened task store"
        );
        Self {
            state,
            storage,
            dirty: false,
            unrestored: restored.unrestored,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.state.tasks
    }

    pub fn task(&self, id: u64) -> Option<&Task> {
        self.state.tasks.iter().find(|task| task.id == id)
    }

    pub fn id_counter(&self) -> u64 {
        self.state.id_counter
    }

    /// False once the counter has reached `u64::MAX`.
    pub fn can_add(&self) -> bool {
        self.state.id_counter.checked_add(1).is_some()
    }

    pub fn add_button_disabled(&self) -> bool {
        self.state.add_button_disabled
    }

    pub fn snapshot(&self) -> &StoreState {
        &self.state
    }

    /// The value currently held in storage, which may differ from
    /// [`TaskStore::snapshot`] when restoring it was lossy.
    pub fn stored_snapshot(&self) -> anyhow::Result<Option<String>> {
        self.storage
            .get_item(STORAGE_KEY)
            .with_context(|| format!("failed to read {STORAGE_KEY}"))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    #[tracing::instrument(skip(self))]
    pub fn set_add_button_disabled(&mut self, flag: bool) {
        self.state.add_button_disabled = flag;
        self.persist();
    }

    #[tracing::instrument(skip(self, text))]
    pub fn add_task(&mut self, text: impl Into<String>, importance: Importance) {
        let id = self.state.id_counter;
        let Some(next) = id.checked_add(1) else {
            tracing::error!(id, "id counter exhausted; task not added");
            return;
        };
        self.state.tasks.push(Task::new(id, text.into(), importance));
        self.state.id_counter = next;
        debug!(id, count = self.state.tasks.len(), "task added");
        self.persist();
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_task(&mut self, id: u64) {
        let before = self.state.tasks.len();
        self.state.tasks.retain(|task| task.id != id);
        if self.state.tasks.len() == before {
            debug!("no task matched; nothing deleted");
        }
        self.persist();
    }

    #[tracing::instrument(skip(self))]
    pub fn toggle_complete(&mut self, id: u64) {
        match self.state.tasks.iter_mut().find(|task| task.id == id) {
            Some(task) => {
                task.completed = !task.completed;
                debug!(completed = task.completed, "toggled task");
            }
            None => debug!("no task matched; nothing toggled"),
        }
        self.persist();
    }

    /// `None` or an empty string keeps the current text; `None` keeps the
    /// current importance.
    #[tracing::instrument(skip(self, new_text))]
    pub fn update_task(
        &mut self,
        id: u64,
        new_text: Option<&str>,
        new_importance: Option<Importance>,
    ) {
        match self.state.tasks.iter_mut().find(|task| task.id == id) {
            Some(task) => {
                if let Some(text) = new_text.filter(|text| !text.is_empty()) {
                    task.text = text.to_string();
                }
                if let Some(importance) = new_importance {
                    task.importance = importance;
                }
                debug!(importance = %task.importance, "updated task");
            }
            None => debug!("no task matched; nothing updated"),
        }
        self.persist();
    }

    /// Keeps the completed tasks and drops every task still open.
    #[tracing::instrument(skip(self))]
    pub fn clear_todos(&mut self) {
        let before = self.state.tasks.len();
        self.state.tasks.retain(|task| task.completed);
        info!(
            before,
            after = self.state.tasks.len(),
            "cleared incomplete tasks"
        );
        self.persist();
    }

    /// Writes the snapshot unconditionally.
    #[tracing::instrument(skip(self))]
    pub fn checkpoint(&mut self) -> anyhow::Result<()> {
        if let Some(raw) = self.unrestored.as_deref() {
            self.storage
                .set_item(BACKUP_KEY, raw)
                .with_context(|| format!("failed to back up {STORAGE_KEY} to {BACKUP_KEY}"))?;
            warn!(backup = BACKUP_KEY, "kept unreadable task list before overwriting it");
            self.unrestored = None;
        }

        let payload =
            serde_json::to_string(&self.state).context("failed to serialize task store")?;
        self.storage
            .set_item(STORAGE_KEY, &payload)
            .with_context(|| format!("failed to save {STORAGE_KEY}"))?;
        self.dirty = false;
        Ok(())
    }

    /// Retries a save that failed after a mutation. Does nothing when every
    /// mutation has already been written.
    #[tracing::instrument(skip(self))]
    pub fn flush(&mut self) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.checkpoint()
    }

    fn persist(&mut self) {
        self.dirty = true;
        if let Err(error) = self.checkpoint() {
            tracing::error!(error = %format!("{error:#}"), "failed to persist task store");
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawState {
    #[serde(default, alias = "todos")]
    tasks: Vec<serde_json::Value>,

    #[serde(default)]
    id_counter: u64,

    #[serde(default)]
    add_button_disabled: bool,
}

#[derive(Debug, Default)]
struct Restored {
    state: StoreState,
    unrestored: Option<String>,
}

/// Unreadable tasks are skipped one by one; an unreadable snapshot gives the
/// defaults. Either way the raw value is kept for a backup.
fn restore_state<S: KeyValueStorage>(storage: &S) -> Restored {
    let raw = match storage.get_item(STORAGE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("no stored task list; starting empty");
            return Restored::default();
        }
        Err(error) => {
            tracing::error!(
                error = %format!("{error:#}"),
                "failed reading task list from storage"
            );
            return Restored::default();
        }
    };

    let parsed = match serde_json::from_str::<RawState>(&raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::error!(
                %error,
                "failed parsing task list from storage"
            );
            return Restored {
                state: StoreState::default(),
                unrestored: Some(raw),
            };
        }
    };

    let mut next_free = 0_u64;
    let mut tasks = Vec::with_capacity(parsed.tasks.len());
    let mut skipped = 0_usize;
    for value in parsed.tasks {
        if let Some(id) = value.get("id").and_then(serde_json::Value::as_u64) {
            // an id of u64::MAX leaves the counter exhausted
            next_free = next_free.max(id.checked_add(1).unwrap_or(u64::MAX));
        }
        match serde_json::from_value::<Task>(value) {
            Ok(task) => tasks.push(task),
            Err(error) => {
                skipped += 1;
                warn!(%error, "skipping unreadable task");
            }
        }
    }

    let mut state = StoreState {
        tasks,
        id_counter: parsed.id_counter,
        add_button_disabled: parsed.add_button_disabled,
    };
    if state.id_counter < next_free {
        warn!(
            stored = state.id_counter,
            raised_to = next_free,
            "stored id counter would reuse ids; raising it"
        );
        state.id_counter = next_free;
    }

    Restored {
        state,
        unrestored: (skipped > 0).then_some(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::{BACKUP_KEY, STORAGE_KEY, StoreState, TaskStore};
    use crate::storage::{KeyValueStorage, MemoryStorage};
    use crate::task::{Importance, Task};

    fn store_with(state: &str) -> TaskStore<MemoryStorage> {
        let mut storage = MemoryStorage::new();
        storage.set_item(STORAGE_KEY, state).expect("seed storage");
        TaskStore::open(storage)
    }

    #[test]
    fn ids_keep_increasing_across_deletes() {
        let mut store = TaskStore::open(MemoryStorage::new());
        store.add_task("a", Importance::None);
        store.add_task("b", Importance::None);
        store.delete_task(1);
        store.delete_task(0);
        store.add_task("c", Importance::General);
        store.add_task("d", Importance::General);

        let ids: Vec<u64> = store.tasks().iter().map(|task| task.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(store.id_counter(), 4);
    }

    #[test]
    fn delete_unknown_id_is_noop() {
        let mut store = TaskStore::open(MemoryStorage::new());
        store.add_task("keep me", Importance::Important);
        let before = store.tasks().to_vec();

        store.delete_task(42);

        assert_eq!(store.tasks(), before.as_slice());
        assert_eq!(store.id_counter(), 1);
    }

    #[test]
    fn toggle_twice_restores_state() {
        let mut store = TaskStore::open(MemoryStorage::new());
        store.add_task("a", Importance::None);
        store.add_task("b", Importance::None);

        store.toggle_complete(1);
        assert!(store.task(1).expect("task 1").completed);
        assert!(!store.task(0).expect("task 0").completed);

        store.toggle_complete(1);
        assert!(!store.task(1).expect("task 1").completed);
    }

    #[test]
    fn toggle_unknown_id_is_noop() {
        let mut store = TaskStore::open(MemoryStorage::new());
        store.add_task("a", Importance::None);
        store.toggle_complete(7);
        assert!(!store.task(0).expect("task 0").completed);
    }

    #[test]
    fn update_with_blank_input_keeps_previous_values() {
        let mut store = TaskStore::open(MemoryStorage::new());
        store.add_task("Buy milk", Importance::General);

        store.update_task(0, Some(""), None);
        store.update_task(0, None, None);

        let task = store.task(0).expect("task 0");
        assert_eq!(task.text, "Buy milk");
        assert_eq!(task.importance, Importance::General);
    }

    #[test]
    fn update_replaces_given_parts_only() {
        let mut store = TaskStore::open(MemoryStorage::new());
        store.add_task("Buy milk", Importance::General);

        store.update_task(0, Some("Buy oat milk"), None);
        assert_eq!(store.task(0).expect("task 0").text, "Buy oat milk");
        assert_eq!(store.task(0).expect("task 0").importance, Importance::General);

        store.update_task(0, None, Some(Importance::VeryImportant));
        assert_eq!(store.task(0).expect("task 0").text, "Buy oat milk");
        assert_eq!(
            store.task(0).expect("task 0").importance,
            Importance::VeryImportant
        );
    }

    #[test]
    fn update_keeps_whitespace_text() {
        let mut store = TaskStore::open(MemoryStorage::new());
        store.add_task("Buy milk", Importance::General);
        store.update_task(0, Some(" "), None);
        assert_eq!(store.task(0).expect("task 0").text, " ");
    }

    #[test]
    fn clear_keeps_only_completed_tasks() {
        let mut store = TaskStore::open(MemoryStorage::new());
        store.add_task("A", Importance::None);
        store.add_task("B", Importance::None);
        store.toggle_complete(1);

        store.clear_todos();

        let mut expected = Task::new(1, "B".to_string(), Importance::None);
        expected.completed = true;
        assert_eq!(store.tasks(), &[expected]);
        assert_eq!(store.id_counter(), 2);
    }

    #[test]
    fn add_button_flag_is_stored_verbatim() {
        let mut store = TaskStore::open(MemoryStorage::new());
        store.set_add_button_disabled(true);
        assert!(store.add_button_disabled());
        assert!(store.tasks().is_empty());

        let storage = store.into_storage();
        let reopened = TaskStore::open(storage);
        assert!(reopened.add_button_disabled());
    }

    #[test]
    fn every_mutation_writes_a_snapshot() {
        let mut store = TaskStore::open(MemoryStorage::new());
        store.add_task("Buy milk", Importance::General);

        let storage = store.into_storage();
        let raw = storage
            .get_item(STORAGE_KEY)
            .expect("get")
            .expect("snapshot written");
        assert_eq!(
            raw,
            r#"{"tasks":[{"id":0,"text":"Buy milk","completed":false,"importance":"general"}],"idCounter":1,"addButtonDisabled":false}"#
        );
    }

    #[test]
    fn malformed_snapshot_falls_back_to_defaults() {
        let store = store_with("{not json");
        assert_eq!(store.snapshot(), &StoreState::default());
        assert!(!store.is_dirty());
    }

    #[test]
    fn unreadable_task_is_skipped_and_the_rest_kept() {
        let raw = r#"{"tasks":[{"id":0,"text":"keep","completed":false,"importance":"general"},{"id":1,"text":"x","importance":"urgent"}],"idCounter":2}"#;
        let mut store = store_with(raw);

        assert_eq!(
            store.tasks(),
            &[Task::new(0, "keep".to_string(), Importance::General)]
        );
        assert_eq!(store.id_counter(), 2);

        store.add_task("new", Importance::None);
        assert_eq!(store.tasks()[1].id, 2);

        let storage = store.into_storage();
        assert_eq!(
            storage.get_item(BACKUP_KEY).expect("get").as_deref(),
            Some(raw)
        );
    }

    #[test]
    fn skipped_task_ids_are_not_reused() {
        let store = store_with(r#"{"tasks":[{"id":6,"text":"x","importance":"urgent"}]}"#);
        assert!(store.tasks().is_empty());
        assert_eq!(store.id_counter(), 7);
    }

    #[test]
    fn opening_and_reading_never_writes() {
        let raw = r#"{"tasks":[{"id":1,"text":"x","importance":"urgent"}],"idCounter":2}"#;
        let mut store = store_with(raw);
        assert!(!store.is_dirty());
        store.flush().expect("flush");
        assert_eq!(store.stored_snapshot().expect("read").as_deref(), Some(raw));

        let storage = store.into_storage();
        assert_eq!(storage.get_item(STORAGE_KEY).expect("get").as_deref(), Some(raw));
        assert_eq!(storage.get_item(BACKUP_KEY).expect("get"), None);
    }

    #[test]
    fn exhausted_counter_refuses_to_add() {
        let mut store = store_with(r#"{"tasks":[],"idCounter":18446744073709551615}"#);
        assert!(!store.can_add());

        store.add_task("boom", Importance::None);

        assert!(store.tasks().is_empty());
        assert_eq!(store.id_counter(), u64::MAX);
    }

    #[test]
    fn task_at_max_id_exhausts_the_counter() {
        let mut store = store_with(
            r#"{"tasks":[{"id":18446744073709551615,"text":"last","completed":false,"importance":"none"}],"idCounter":3}"#,
        );
        assert_eq!(store.id_counter(), u64::MAX);

        store.add_task("dup", Importance::None);
        assert_eq!(store.tasks().len(), 1);
    }

    #[test]
    fn reads_todos_alias_and_missing_fields() {
        let store = store_with(
            r#"{"todos":[{"id":0,"text":"Water plants","completed":true,"importance":"none"}],"idCounter":1}"#,
        );
        assert_eq!(store.tasks().len(), 1);
        assert!(store.tasks()[0].completed);
        assert_eq!(store.id_counter(), 1);
        assert!(!store.add_button_disabled());
    }

    #[test]
    fn stale_counter_is_raised_past_stored_ids() {
        let mut store = store_with(
            r#"{"tasks":[{"id":4,"text":"x","completed":false,"importance":"none"}],"idCounter":2}"#,
        );
        assert_eq!(store.id_counter(), 5);

        store.add_task("y", Importance::None);
        assert_eq!(store.tasks()[1].id, 5);
    }
}
