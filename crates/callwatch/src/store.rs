//! UI-facing call display state.
//!
//! The coordinator publishes the latest matched caller through a
//! [`tokio::sync::watch`] channel. Writes are last-write-wins.

use serde::Serialize;
use tokio::sync::watch;

use crate::policy::StudentMatch;

/// Student and parent shown in the caller modal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetails {
    /// Student name(s).
    pub student_name: String,
    /// Parent name.
    pub parent_name: String,
}

impl StudentDetails {
    /// Details from a complete match, `None` otherwise.
    #[must_use]
    pub fn from_match(student: &StudentMatch) -> Option<Self> {
        match (student.student(), student.parent()) {
            (Some(student_name), Some(parent_name)) => Some(Self {
                student_name: student_name.to_string(),
                parent_name: parent_name.to_string(),
            }),
            _ => None,
        }
    }
}

/// What the UI should currently show.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDisplay {
    /// Last matched caller.
    pub student: Option<StudentDetails>,
    /// Whether the caller modal is visible.
    pub modal_visible: bool,
}

/// Writer half of the display state.
#[derive(Debug)]
pub struct CallStore {
    tx: watch::Sender<CallDisplay>,
}

impl CallStore {
    /// Create a store and a receiver for the UI.
    #[must_use]
    pub fn channel() -> (Self, watch::Receiver<CallDisplay>) {
        let (tx, rx) = watch::channel(CallDisplay::default());
        (Self { tx }, rx)
    }

    /// Show the modal for a complete match. Partial matches are ignored.
    ///
    /// Returns whether the display changed.
    pub fn show_match(&self, student: &StudentMatch) -> bool {
        let Some(details) = StudentDetails::from_match(student) else {
            return false;
        };
        self.tx.send_modify(|display| {
            display.student = Some(details);
            display.modal_visible = true;
        });
        true
    }

    /// Hide the modal, keeping the last matched caller.
    pub fn dismiss(&self) {
        self.tx.send_if_modified(|display| {
            let changed = display.modal_visible;
            display.modal_visible = false;
            changed
        });
    }

    /// Subscribe another reader.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CallDisplay> {
        self.tx.subscribe()
    }

    /// A copy of the current display state.
    #[must_use]
    pub fn current(&self) -> CallDisplay {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_match_sets_modal() {
        let (store, rx) = CallStore::channel();
        assert!(store.show_match(&StudentMatch::new("Amit", "Raj")));

        let display = rx.borrow().clone();
        assert!(display.modal_visible);
        assert_eq!(
            display.student,
            Some(StudentDetails {
                student_name: "Amit".to_string(),
                parent_name: "Raj".to_string(),
            })
        );
    }

    #[test]
    fn test_partial_match_is_ignored() {
        let (store, rx) = CallStore::channel();
        let partial = StudentMatch::from_parts(Some("Amit".to_string()), None);
        assert!(!store.show_match(&partial));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.current(), CallDisplay::default());
    }

    #[test]
    fn test_last_write_wins() {
        let (store, _rx) = CallStore::channel();
        store.show_match(&StudentMatch::new("Amit", "Raj"));
        store.show_match(&StudentMatch::new("Priya", "Sunil"));
        assert_eq!(
            store.current().student.map(|s| s.student_name),
            Some("Priya".to_string())
        );
    }

    #[test]
    fn test_dismiss_keeps_student() {
        let (store, mut rx) = CallStore::channel();
        store.show_match(&StudentMatch::new("Amit", "Raj"));
        rx.mark_unchanged();

        store.dismiss();
        assert!(rx.has_changed().unwrap());
        let display = store.current();
        assert!(!display.modal_visible);
        assert!(display.student.is_some());

        rx.mark_unchanged();
        store.dismiss();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_display_serialize() {
        let json = serde_json::to_string(&CallDisplay::default()).unwrap();
        assert_eq!(json, r#"{"student":null,"modalVisible":false}"#);
    }
}
