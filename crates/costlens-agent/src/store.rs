//! Conversation history storage.
//!
//! Conversations are created lazily on first reference and capped to the most
//! recent N turns. The map lock is only held to find or insert an entry; each
//! conversation has its own lock, so traffic on different ids never contends
//! on appends.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use costlens_core::error::CostlensError;

use crate::types::{Conversation, Turn};

/// Keyed, append-only conversation history.
pub trait ConversationStore: Send + Sync {
    /// Snapshot of a conversation, creating an empty one if `id` is unknown.
    fn get(&self, id: &str) -> Result<Conversation, CostlensError>;

    /// Append one turn, trimming the oldest turns past the cap.
    fn append(&self, id: &str, turn: Turn) -> Result<(), CostlensError>;

    /// Append several turns as one step, so concurrent requests on the same
    /// conversation never interleave inside an exchange.
    fn append_all(&self, id: &str, turns: Vec<Turn>) -> Result<(), CostlensError> {
        for turn in turns {
            self.append(id, turn)?;
        }
        Ok(())
    }

    /// Snapshot of an existing conversation without creating one.
    fn history(&self, id: &str) -> Result<Option<Conversation>, CostlensError>;

    /// Forget conversations idle for longer than `max_idle`. Returns how many.
    fn evict_idle(&self, max_idle: Duration) -> Result<usize, CostlensError>;

    /// Number of live conversations.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry {
    turns: VecDeque<Turn>,
    last_active: Instant,
}

impl Entry {
    fn new() -> Self {
        Self {
            turns: VecDeque::new(),
            last_active: Instant::now(),
        }
    }
}

type Shared = Arc<Mutex<Entry>>;

/// Process-local conversation store.
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Shared>>,
    max_turns: usize,
}

impl InMemoryConversationStore {
    /// Create a store retaining at most `max_turns` turns per conversation.
    pub fn new(max_turns: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    fn lookup(&self, id: &str) -> Result<Option<Shared>, CostlensError> {
        let map = self
            .conversations
            .read()
            .map_err(|e| CostlensError::Storage(format!("conversation map lock poisoned: {}", e)))?;
        Ok(map.get(id).cloned())
    }

    fn entry(&self, id: &str) -> Result<Shared, CostlensError> {
        if let Some(entry) = self.lookup(id)? {
            return Ok(entry);
        }
        let mut map = self
            .conversations
            .write()
            .map_err(|e| CostlensError::Storage(format!("conversation map lock poisoned: {}", e)))?;
        let entry = map.entry(id.to_string()).or_insert_with(|| {
            debug!(conversation_id = id, "Conversation created");
            Arc::new(Mutex::new(Entry::new()))
        });
        Ok(Arc::clone(entry))
    }

    fn push_all(&self, id: &str, turns: Vec<Turn>) -> Result<(), CostlensError> {
        let shared = self.entry(id)?;
        let mut entry = shared
            .lock()
            .map_err(|e| CostlensError::Storage(format!("conversation lock poisoned: {}", e)))?;
        entry.turns.extend(turns);
        while entry.turns.len() > self.max_turns {
            entry.turns.pop_front();
        }
        entry.last_active = Instant::now();
        Ok(())
    }
}

fn snapshot(id: &str, shared: &Shared, touch: bool) -> Result<Conversation, CostlensError> {
    let mut entry = shared
        .lock()
        .map_err(|e| CostlensError::Storage(format!("conversation lock poisoned: {}", e)))?;
    if touch {
        entry.last_active = Instant::now();
    }
    Ok(Conversation {
        id: id.to_string(),
        turns: entry.turns.iter().cloned().collect(),
    })
}

impl ConversationStore for InMemoryConversationStore {
    fn get(&self, id: &str) -> Result<Conversation, CostlensError> {
        let shared = self.entry(id)?;
        snapshot(id, &shared, true)
    }

    fn append(&self, id: &str, turn: Turn) -> Result<(), CostlensError> {
        self.push_all(id, vec![turn])
    }

    fn append_all(&self, id: &str, turns: Vec<Turn>) -> Result<(), CostlensError> {
        self.push_all(id, turns)
    }

    fn history(&self, id: &str) -> Result<Option<Conversation>, CostlensError> {
        match self.lookup(id)? {
            Some(shared) => snapshot(id, &shared, false).map(Some),
            None => Ok(None),
        }
    }

    fn evict_idle(&self, max_idle: Duration) -> Result<usize, CostlensError> {
        let mut map = self
            .conversations
            .write()
            .map_err(|e| CostlensError::Storage(format!("conversation map lock poisoned: {}", e)))?;
        let before = map.len();
        // A poisoned entry is evicted as well.
        map.retain(|_, shared| {
            shared
                .lock()
                .map(|entry| entry.last_active.elapsed() <= max_idle)
                .unwrap_or(false)
        });
        Ok(before - map.len())
    }

    fn len(&self) -> usize {
        self.conversations.read().map(|map| map.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for InMemoryConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryConversationStore")
            .field("conversations", &self.len())
            .field("max_turns", &self.max_turns)
            .finish()
    }
}
