//! # Notification List
//!
//! The in-app notification history, newest first. Items pushed by the server
//! are tagged `remote`; items created by the application itself are `local`.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::notifications::normalize::{NotificationKind, NotificationRecord};

/// Where a list item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSource {
    /// Created locally.
    #[default]
    Local,
    /// Pushed by the server.
    Remote,
}

/// # List Item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    /// Unique id.
    pub id: String,
    /// Severity.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Whether the user has seen it.
    pub read: bool,
    /// RFC 3339 creation time.
    pub timestamp: String,
    /// Navigation target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Origin.
    #[serde(default)]
    pub source: ItemSource,
}

/// # Notification List
///
/// Cheap to clone; clones share the same items.
#[derive(Debug, Clone, Default)]
pub struct NotificationList {
    items: Arc<Mutex<Vec<ListItem>>>,
}

impl NotificationList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    fn items_mut(&self) -> MutexGuard<'_, Vec<ListItem>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Prepends a new unread item built from `record`. The server event id is
    /// kept when present; otherwise a fresh UUID is assigned. A re-delivered
    /// event replaces its earlier entry, so ids stay unique.
    pub fn add(&self, record: &NotificationRecord, source: ItemSource) -> ListItem {
        let item = ListItem {
            id: record
                .id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            kind: record.kind,
            title: record.title.clone(),
            message: record.body.clone(),
            read: false,
            timestamp: Utc::now().to_rfc3339(),
            link: record.link.clone(),
            source,
        };
        let mut items = self.items_mut();
        items.retain(|existing| existing.id != item.id);
        items.insert(0, item.clone());
        item
    }

    /// Marks one item read. Returns `false` when the id is unknown.
    pub fn mark_as_read(&self, id: &str) -> bool {
        self.update_item(id, |item| item.read = true)
    }

    /// Marks every item read.
    pub fn mark_all_as_read(&self) {
        for item in self.items_mut().iter_mut() {
            item.read = true;
        }
    }

    /// Removes one item. Returns `false` when the id is unknown.
    pub fn remove(&self, id: &str) -> bool {
        let mut items = self.items_mut();
        let before = items.len();
        items.retain(|item| item.id != id);
        items.len() != before
    }

    /// Removes every item.
    pub fn clear(&self) {
        self.items_mut().clear();
    }

    /// Replaces the list with server history, tagging every item `remote`.
    pub fn set_items(&self, items: Vec<ListItem>) {
        *self.items_mut() = items
            .into_iter()
            .map(|item| ListItem {
                source: ItemSource::Remote,
                ..item
            })
            .collect();
    }

    /// Prepends server items whose ids are not already listed. Returns how many
    /// were added.
    pub fn add_items(&self, items: Vec<ListItem>) -> usize {
        let mut current = self.items_mut();
        let mut fresh: Vec<ListItem> = Vec::with_capacity(items.len());
        for item in items {
            let known = current.iter().chain(fresh.iter()).any(|i| i.id == item.id);
            if !known {
                fresh.push(ListItem {
                    source: ItemSource::Remote,
                    ..item
                });
            }
        }
        let added = fresh.len();
        fresh.append(&mut *current);
        *current = fresh;
        added
    }

    /// Edits one item in place. Returns `false` when the id is unknown.
    pub fn update_item(&self, id: &str, f: impl FnOnce(&mut ListItem)) -> bool {
        match self.items_mut().iter_mut().find(|item| item.id == id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    /// Number of unread items.
    pub fn unread_count(&self) -> usize {
        self.items_mut().iter().filter(|item| !item.read).count()
    }

    /// Snapshot, newest first.
    pub fn items(&self) -> Vec<ListItem> {
        self.items_mut().clone()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items_mut().len()
    }

    /// `true` when the list has no items.
    pub fn is_empty(&self) -> bool {
        self.items_mut().is_empty()
    }
}
