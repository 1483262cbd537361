//! The platform notification collaborator.
//!
//! The core never talks to an OS notification API directly. It asks a
//! [`NotificationGateway`] to upsert or dismiss notifications in one of three
//! categories; re-using an identifier within a category updates in place.
//!
//! | Category | Behaviour |
//! |---|---|
//! | `ongoing-status` | persistent, low priority, sticky; full snapshot |
//! | `warning` | persistent while a breach is active |
//! | `normal-confirmation` | transient, auto-dismissed |

use aquamon_types::AquaError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Notification channel on the platform side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationCategory {
    OngoingStatus,
    Warning,
    NormalConfirmation,
}

impl NotificationCategory {
    pub fn id(&self) -> &'static str {
        match self {
            NotificationCategory::OngoingStatus => "ongoing-status",
            NotificationCategory::Warning => "warning",
            NotificationCategory::NormalConfirmation => "normal-confirmation",
        }
    }

    /// The single notification the core keeps per category.
    pub fn primary(self) -> NotificationId {
        NotificationId {
            category: self,
            identifier: "primary".into(),
        }
    }
}

/// `(category, identifier within category)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId {
    pub category: NotificationCategory,
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    /// Play sound and vibrate.
    pub sound: bool,
    /// The user cannot swipe it away.
    pub sticky: bool,
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn upsert(
        &self,
        id: &NotificationId,
        content: &NotificationContent,
        options: NotificationOptions,
    ) -> Result<(), AquaError>;

    async fn dismiss(&self, id: &NotificationId) -> Result<(), AquaError>;
}

/// Headless gateway that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogGateway;

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn upsert(
        &self,
        id: &NotificationId,
        content: &NotificationContent,
        options: NotificationOptions,
    ) -> Result<(), AquaError> {
        info!(
            category = id.category.id(),
            identifier = %id.identifier,
            title = %content.title,
            body = %content.body,
            sound = options.sound,
            sticky = options.sticky,
            "notification"
        );
        Ok(())
    }

    async fn dismiss(&self, id: &NotificationId) -> Result<(), AquaError> {
        info!(
            category = id.category.id(),
            identifier = %id.identifier,
            "notification dismissed"
        );
        Ok(())
    }
}
