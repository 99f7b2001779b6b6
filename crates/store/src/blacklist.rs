//! Per-user blacklist of phone numbers that must never be messaged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub user_id: Uuid,
    pub phone_number: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Upsert: adding an existing number refreshes its reason.
    pub fn blacklist_add(&self, user_id: Uuid, phone_number: &str, reason: Option<&str>) {
        self.blacklist
            .entry((user_id, phone_number.to_string()))
            .and_modify(|entry| entry.reason = reason.map(str::to_string))
            .or_insert_with(|| BlacklistEntry {
                user_id,
                phone_number: phone_number.to_string(),
                reason: reason.map(str::to_string),
                created_at: Utc::now(),
            });
    }

    pub fn is_blacklisted(&self, user_id: Uuid, phone_number: &str) -> bool {
        self.blacklist
            .contains_key(&(user_id, phone_number.to_string()))
    }

    /// A user's entries, newest first.
    pub fn blacklist_for_user(&self, user_id: Uuid) -> Vec<BlacklistEntry> {
        let mut entries: Vec<_> = self
            .blacklist
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.clone())
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }

    pub fn blacklist_remove(&self, user_id: Uuid, phone_number: &str) {
        self.blacklist
            .remove(&(user_id, phone_number.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_upsert_and_scoped_per_user() {
        let store = Store::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        store.blacklist_add(user, "+5511999990000", Some("opted out"));
        store.blacklist_add(user, "+5511999990000", Some("hard bounce"));

        assert!(store.is_blacklisted(user, "+5511999990000"));
        assert!(!store.is_blacklisted(other, "+5511999990000"));

        let entries = store.blacklist_for_user(user);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason.as_deref(), Some("hard bounce"));
    }

    #[test]
    fn remove_clears_the_entry() {
        let store = Store::new();
        let user = Uuid::new_v4();
        store.blacklist_add(user, "+5511888880000", None);
        store.blacklist_remove(user, "+5511888880000");
        assert!(!store.is_blacklisted(user, "+5511888880000"));
        assert!(store.blacklist_for_user(user).is_empty());
    }
}
