//! Notification policy and content.
//!
//! Decides whether a settled call event deserves a notification and what the
//! notification says.

use serde::{Deserialize, Serialize};

use crate::call::CallState;

/// Student/parent details returned by a directory lookup.
///
/// Either name may be missing. Only a complete match (both names) is surfaced
/// for answered or ended calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMatch {
    /// Student name(s) linked to the number.
    pub student_name: Option<String>,
    /// Parent name linked to the number.
    pub parent_name: Option<String>,
}

impl StudentMatch {
    /// A match with both names.
    #[must_use]
    pub fn new(student_name: impl Into<String>, parent_name: impl Into<String>) -> Self {
        Self {
            student_name: Some(student_name.into()),
            parent_name: Some(parent_name.into()),
        }
    }

    /// No match.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a match, treating empty or blank names as absent.
    #[must_use]
    pub fn from_parts(student_name: Option<String>, parent_name: Option<String>) -> Self {
        let present = |name: Option<String>| name.filter(|n| !n.trim().is_empty());
        Self {
            student_name: present(student_name),
            parent_name: present(parent_name),
        }
    }

    /// Whether both the student and parent names are known.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.student_name.is_some() && self.parent_name.is_some()
    }

    /// Student name, if known.
    #[must_use]
    pub fn student(&self) -> Option<&str> {
        self.student_name.as_deref()
    }

    /// Parent name, if known.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent_name.as_deref()
    }
}

/// Whether an event in `state` should produce a notification.
///
/// Ringing and outgoing calls always notify. Answered and ended calls only
/// notify when a complete student match was found.
#[must_use]
pub fn should_show_notification_for_event(state: CallState, has_student_data: bool) -> bool {
    match state {
        CallState::Ringing | CallState::Outgoing => true,
        CallState::Offhook | CallState::Idle => has_student_data,
    }
}

/// Title and body of a call notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationContent {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
}

impl NotificationContent {
    /// Render the notification for a call.
    #[must_use]
    pub fn for_call(
        state: CallState,
        phone_number: &str,
        student_name: Option<&str>,
        parent_name: Option<&str>,
    ) -> Self {
        let (prefix, fallback_title, fallback_body) = match state {
            CallState::Ringing => ("Incoming Call", "Incoming Call Detected", "Call from"),
            CallState::Outgoing => ("Outgoing Call", "Outgoing Call Detected", "Calling"),
            CallState::Offhook => ("Call Active", "Call Active", "Call with"),
            CallState::Idle => ("Call Ended", "Call Ended", "Call with"),
        };

        let student_name = student_name.filter(|n| !n.is_empty());
        let parent_name = parent_name.filter(|n| !n.is_empty());

        let (title, body) = match (student_name, parent_name) {
            (Some(student), Some(parent)) => {
                (format!("{prefix} - {student}"), format!("Parent: {parent}"))
            }
            (Some(student), None) => (
                format!("{prefix} - {student}"),
                format!("Phone: {phone_number}"),
            ),
            (None, _) => (
                fallback_title.to_string(),
                format!("{fallback_body}: {phone_number}"),
            ),
        };

        Self { title, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_show_notification_for_event() {
        assert!(should_show_notification_for_event(CallState::Ringing, false));
        assert!(should_show_notification_for_event(CallState::Outgoing, false));
        assert!(!should_show_notification_for_event(CallState::Offhook, false));
        assert!(should_show_notification_for_event(CallState::Offhook, true));
        assert!(!should_show_notification_for_event(CallState::Idle, false));
        assert!(should_show_notification_for_event(CallState::Idle, true));
    }

    #[test]
    fn test_student_match_complete() {
        assert!(StudentMatch::new("Amit", "Raj").is_complete());
        assert!(!StudentMatch::none().is_complete());

        let partial = StudentMatch {
            student_name: Some("Amit".to_string()),
            parent_name: None,
        };
        assert!(!partial.is_complete());
    }

    #[test]
    fn test_student_match_from_parts_drops_blank_names() {
        let m = StudentMatch::from_parts(Some("Amit".to_string()), Some("  ".to_string()));
        assert_eq!(m.student(), Some("Amit"));
        assert_eq!(m.parent(), None);
        assert!(!m.is_complete());
    }

    #[test]
    fn test_content_with_full_match() {
        let content =
            NotificationContent::for_call(CallState::Ringing, "0211234567", Some("Amit"), Some("Raj"));
        assert_eq!(content.title, "Incoming Call - Amit");
        assert_eq!(content.body, "Parent: Raj");
    }

    #[test]
    fn test_content_with_student_only() {
        let content =
            NotificationContent::for_call(CallState::Offhook, "0211234567", Some("Amit"), None);
        assert_eq!(content.title, "Call Active - Amit");
        assert_eq!(content.body, "Phone: 0211234567");
    }

    #[test]
    fn test_content_without_match() {
        let content = NotificationContent::for_call(CallState::Outgoing, "0211234567", None, None);
        assert_eq!(content.title, "Outgoing Call Detected");
        assert_eq!(content.body, "Calling: 0211234567");

        let content = NotificationContent::for_call(CallState::Ringing, "Unknown", None, Some(""));
        assert_eq!(content.title, "Incoming Call Detected");
        assert_eq!(content.body, "Call from: Unknown");
    }

    #[test]
    fn test_content_call_ended() {
        let content =
            NotificationContent::for_call(CallState::Idle, "0211234567", Some("Amit"), Some("Raj"));
        assert_eq!(content.title, "Call Ended - Amit");
        assert_eq!(content.body, "Parent: Raj");
    }

    #[test]
    fn test_student_match_serde_shape() {
        let json = serde_json::to_string(&StudentMatch::new("Amit", "Raj")).unwrap();
        assert_eq!(json, r#"{"studentName":"Amit","parentName":"Raj"}"#);
    }
}
