use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use nudge_core::types::{Activity, ConversationReference};

/// User id used when an activity carries no sender.
pub const FALLBACK_USER_ID: &str = "user";

struct Entry {
    reference: ConversationReference,
    last_seen: u64,
}

struct Entries {
    by_user: HashMap<String, Entry>,
    seq: u64,
}

/// Latest conversation reference per user, kept for proactive messages.
///
/// In memory only. Unbounded unless built with [`ConversationStore::bounded`],
/// in which case the least recently seen user is evicted first.
pub struct ConversationStore {
    entries: RwLock<Entries>,
    max_entries: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::bounded(0)
    }

    /// `max_entries == 0` means no bound.
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Entries {
                by_user: HashMap::new(),
                seq: 0,
            }),
            max_entries,
        }
    }

    /// Capture the activity's conversation reference under its sender id,
    /// replacing whatever was stored for that user. Returns the user id.
    pub fn upsert(&self, activity: &Activity) -> String {
        let user_id = activity
            .sender_id()
            .unwrap_or(FALLBACK_USER_ID)
            .to_string();
        let reference = activity.conversation_reference();

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.seq += 1;
        let last_seen = entries.seq;

        let is_new = !entries.by_user.contains_key(&user_id);
        if is_new && self.max_entries > 0 && entries.by_user.len() >= self.max_entries {
            evict_oldest(&mut entries.by_user);
        }

        entries.by_user.insert(
            user_id.clone(),
            Entry {
                reference,
                last_seen,
            },
        );
        user_id
    }

    pub fn get(&self, user_id: &str) -> Option<ConversationReference> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_user
            .get(user_id)
            .map(|e| e.reference.clone())
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_user
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_oldest(by_user: &mut HashMap<String, Entry>) {
    let oldest = by_user
        .iter()
        .min_by_key(|(_, e)| e.last_seen)
        .map(|(id, _)| id.clone());
    if let Some(id) = oldest {
        tracing::debug!(user_id = %id, "[REF] evicting least recently seen conversation");
        by_user.remove(&id);
    }
}
