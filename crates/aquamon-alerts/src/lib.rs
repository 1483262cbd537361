//! `aquamon-alerts` – threshold warnings and platform notifications.
//!
//! # Modules
//!
//! - [`engine`] – [`AlertEngine`]: priority-cascade state machine with a
//!   dwell interval for repeated warnings.
//! - [`gateway`] – [`NotificationGateway`] contract and the headless
//!   [`LogGateway`].
//! - [`notifier`] – [`AlertNotifier`]: applies engine decisions to the
//!   gateway according to the host lifecycle.

pub mod engine;
pub mod gateway;
pub mod notifier;

pub use engine::{ActiveWarning, AlertConfig, AlertDecision, AlertEngine, FamilyState, WarningState};
pub use gateway::{
    LogGateway, NotificationCategory, NotificationContent, NotificationGateway, NotificationId,
    NotificationOptions,
};
pub use notifier::AlertNotifier;
