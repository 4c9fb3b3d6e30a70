use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Short-lived lookup of resolved display name by (instance id, phone).
/// Populated opportunistically from inbound-message sender names and read
/// before falling back to a relational query. Process-wide; entries are
/// scoped per key so no coordination between instances is needed.
pub struct ContactCache {
    ttl: Duration,
    entries: DashMap<(String, String), (String, Instant)>,
}

impl ContactCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, instance_id: &str, phone: &str) -> Option<String> {
        let key = (instance_id.to_string(), phone.to_string());
        if let Some(entry) = self.entries.get(&key) {
            let (name, stored_at) = entry.value();
            if stored_at.elapsed() < self.ttl {
                return Some(name.clone());
            }
        }
        // Expired entries are dropped on access.
        self.entries
            .remove_if(&key, |_, (_, stored_at)| stored_at.elapsed() >= self.ttl);
        None
    }

    pub fn insert(&self, instance_id: &str, phone: &str, name: &str) {
        self.entries.insert(
            (instance_id.to_string(), phone.to_string()),
            (name.to_string(), Instant::now()),
        );
    }
}
