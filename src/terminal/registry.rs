//! Arena-backed registry of live sessions

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::backend::{OutputSink, ProcessBackend};
use crate::domain::{SessionContext, TerminalSession};

/// Everything the manager owns for one session
pub(crate) struct SessionEntry {
    pub session: TerminalSession,
    pub backend: Arc<Mutex<Box<dyn ProcessBackend>>>,
    pub context: Arc<Mutex<SessionContext>>,
    pub sink: OutputSink,
    pub last_activity: Instant,
}

/// Sessions live in a slot arena; `index` maps session ids to slots and
/// freed slots are reused.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    slots: Vec<Option<SessionEntry>>,
    index: HashMap<String, usize>,
    free: Vec<usize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Insert an entry; the caller checks for duplicates first
    pub fn insert(&mut self, entry: SessionEntry) -> usize {
        let id = entry.session.id.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        slot
    }

    pub fn get(&self, id: &str) -> Option<&SessionEntry> {
        let slot = *self.index.get(id)?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SessionEntry> {
        let slot = *self.index.get(id)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn remove(&mut self, id: &str) -> Option<SessionEntry> {
        let slot = self.index.remove(id)?;
        let entry = self.slots.get_mut(slot)?.take();
        self.free.push(slot);
        entry
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionEntry> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Remove every entry
    pub fn drain(&mut self) -> Vec<SessionEntry> {
        self.index.clear();
        self.free.clear();
        self.slots.drain(..).flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionMode;
    use crate::terminal::backend::SpawnSpec;
    use crate::terminal::simulated::SimulatedBackend;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn entry(id: &str) -> SessionEntry {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = OutputSink::new(tx, None);
        let spec = SpawnSpec {
            session_id: id.to_string(),
            shell: "sh".to_string(),
            cwd: PathBuf::from("/"),
            cols: 80,
            rows: 24,
            env: Vec::new(),
        };
        let backend: Box<dyn ProcessBackend> = Box::new(SimulatedBackend::start(&spec, sink.clone()));
        SessionEntry {
            session: TerminalSession {
                id: id.to_string(),
                pid: backend.pid(),
                mode: SessionMode::Demo,
                cwd: PathBuf::from("/"),
                cols: 80,
                rows: 24,
                killed: false,
                created_at: chrono::Utc::now(),
            },
            backend: Arc::new(Mutex::new(backend)),
            context: Arc::new(Mutex::new(SessionContext::new(id, PathBuf::from("/")))),
            sink,
            last_activity: Instant::now(),
        }
    }

    #[test]
    fn test_slots_are_reused() {
        let mut registry = SessionRegistry::new();
        let a = registry.insert(entry("a"));
        let b = registry.insert(entry("b"));
        assert_ne!(a, b);

        assert!(registry.remove("a").is_some());
        assert!(!registry.contains("a"));
        assert!(registry.remove("a").is_none());

        let c = registry.insert(entry("c"));
        assert_eq!(c, a);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("c").map(|e| e.session.id.as_str()), Some("c"));
        assert_eq!(registry.iter().count(), 2);
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = SessionRegistry::new();
        registry.insert(entry("a"));
        registry.insert(entry("b"));
        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.len(), 0);
        assert!(registry.get("a").is_none());
    }
}
