//! [`AlertNotifier`] – applies [`AlertEngine`] decisions to the platform.
//!
//! Every decision is published on [`Topic::Alerts`]. Platform notifications
//! are only posted while the host is backgrounded; in the foreground the
//! notifier keeps in-memory state only. The lifecycle is read from a
//! [`watch`] channel at every decision point, never cached across an await.
//!
//! | Decision (background) | Gateway calls |
//! |---|---|
//! | raised | upsert `warning` (sound when new, sticky), refresh `ongoing-status` |
//! | cleared | dismiss `warning`, upsert `normal-confirmation`, dismiss it later |
//! | still normal | refresh `ongoing-status`, throttled |
//!
//! Gateway failures are logged and absorbed.

use std::sync::{Arc, Mutex, MutexGuard};

use aquamon_bridge::{EventBus, Topic};
use aquamon_types::{Event, EventPayload, Lifecycle, SensorReading, WarningFamily, WaterQuality};
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::engine::{ActiveWarning, AlertConfig, AlertDecision, AlertEngine};
use crate::gateway::{
    NotificationCategory, NotificationContent, NotificationGateway, NotificationId,
    NotificationOptions,
};

const SOURCE: &str = "aquamon-alerts::engine";

#[derive(Default)]
struct NotifierState {
    latest: Option<SensorReading>,
    last_status_at: Option<Instant>,
    confirmation_timer: Option<JoinHandle<()>>,
    /// A `warning` notification is on screen.
    warning_shown: bool,
}

pub struct AlertNotifier {
    engine: Mutex<AlertEngine>,
    gateway: Arc<dyn NotificationGateway>,
    lifecycle: watch::Receiver<Lifecycle>,
    bus: EventBus,
    state: Mutex<NotifierState>,
}

impl AlertNotifier {
    pub fn new(
        config: AlertConfig,
        gateway: Arc<dyn NotificationGateway>,
        lifecycle: watch::Receiver<Lifecycle>,
        bus: EventBus,
    ) -> Self {
        Self {
            engine: Mutex::new(AlertEngine::new(config)),
            gateway,
            lifecycle,
            bus,
            state: Mutex::new(NotifierState::default()),
        }
    }

    fn engine(&self) -> MutexGuard<'_, AlertEngine> {
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current host lifecycle.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn active_warning(&self) -> Option<ActiveWarning> {
        self.engine().state().active().copied()
    }

    /// Forget every active warning.
    pub fn reset(&self) {
        self.engine().reset();
    }

    /// Evaluate `reading` and apply the decision.
    pub async fn on_reading(&self, reading: &SensorReading) -> AlertDecision {
        let decision = self.engine().evaluate(reading, Utc::now());
        self.state().latest = Some(reading.clone());
        self.publish(decision);

        if self.lifecycle() == Lifecycle::Foreground {
            return decision;
        }

        match decision {
            AlertDecision::Raised {
                family,
                value,
                threshold,
                is_new,
            } => {
                self.withdraw_confirmation().await;
                self.post_warning(family, value, threshold, is_new).await;
                self.refresh_status(true).await;
            }
            AlertDecision::Cleared { family } => {
                self.dismiss_warning().await;
                self.confirm_normal(family).await;
                self.refresh_status(true).await;
            }
            AlertDecision::StillNormal => self.refresh_status(false).await,
        }
        decision
    }

    /// React to a lifecycle transition.
    ///
    /// Entering the background re-posts any active warning silently, removes
    /// a warning that cleared while in the foreground and posts the ongoing
    /// status; entering the foreground removes the status.
    pub async fn on_lifecycle(&self, lifecycle: Lifecycle) {
        match lifecycle {
            Lifecycle::Background => {
                match self.active_warning() {
                    Some(active) => {
                        self.post_warning(active.family, active.value, active.threshold, false)
                            .await;
                    }
                    None if self.state().warning_shown => self.dismiss_warning().await,
                    None => {}
                }
                self.refresh_status(true).await;
            }
            Lifecycle::Foreground => {
                self.state().last_status_at = None;
                self.dismiss(&NotificationCategory::OngoingStatus.primary())
                    .await;
            }
        }
    }

    fn publish(&self, decision: AlertDecision) {
        let payload = match decision {
            AlertDecision::Raised {
                family,
                value,
                threshold,
                is_new,
            } => EventPayload::WarningRaised {
                family,
                value,
                threshold,
                is_new,
            },
            AlertDecision::Cleared { family } => EventPayload::WarningCleared { family },
            AlertDecision::StillNormal => return,
        };
        self.bus.publish_to(Topic::Alerts, Event::new(SOURCE, payload));
    }

    async fn post_warning(&self, family: WarningFamily, value: f64, threshold: f64, sound: bool) {
        let content = NotificationContent {
            title: family.title().to_string(),
            body: format!(
                "{} {} (limit {})",
                channel_label(family),
                with_unit(family, value),
                with_unit(family, threshold)
            ),
        };
        let options = NotificationOptions {
            sound,
            sticky: true,
        };
        self.upsert(&NotificationCategory::Warning.primary(), &content, options)
            .await;
        self.state().warning_shown = true;
    }

    async fn dismiss_warning(&self) {
        self.dismiss(&NotificationCategory::Warning.primary()).await;
        self.state().warning_shown = false;
    }

    /// Cancel a pending "back to normal" confirmation and take it off screen.
    async fn withdraw_confirmation(&self) {
        let Some(timer) = self.state().confirmation_timer.take() else {
            return;
        };
        if timer.is_finished() {
            return;
        }
        timer.abort();
        self.dismiss(&NotificationCategory::NormalConfirmation.primary())
            .await;
    }

    async fn confirm_normal(&self, family: WarningFamily) {
        if let Some(previous) = self.state().confirmation_timer.take() {
            previous.abort();
        }

        let id = NotificationCategory::NormalConfirmation.primary();
        let content = NotificationContent {
            title: "Water quality back to normal".into(),
            body: format!("{} is within the safe range again", channel_label(family)),
        };
        self.upsert(&id, &content, NotificationOptions::default())
            .await;

        let gateway = Arc::clone(&self.gateway);
        let delay = self.engine().config().normal_dismiss_after();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = gateway.dismiss(&id).await {
                warn!(error = %e, "failed to dismiss normal confirmation");
            }
        });
        self.state().confirmation_timer = Some(timer);
    }

    /// Post the ongoing-status snapshot unless a refresh happened within the
    /// throttle window. `force` bypasses the throttle.
    async fn refresh_status(&self, force: bool) {
        if self.lifecycle() != Lifecycle::Background {
            return;
        }
        let active = self.active_warning();
        let refresh = self.engine().config().status_refresh();
        let now = Instant::now();

        let content = {
            let mut state = self.state();
            if !force
                && state
                    .last_status_at
                    .is_some_and(|at| now.duration_since(at) < refresh)
            {
                debug!("ongoing status refresh throttled");
                return;
            }
            state.last_status_at = Some(now);
            status_content(state.latest.as_ref(), active.as_ref())
        };

        let options = NotificationOptions {
            sound: false,
            sticky: true,
        };
        self.upsert(&NotificationCategory::OngoingStatus.primary(), &content, options)
            .await;
    }

    async fn upsert(
        &self,
        id: &NotificationId,
        content: &NotificationContent,
        options: NotificationOptions,
    ) {
        if let Err(e) = self.gateway.upsert(id, content, options).await {
            warn!(category = id.category.id(), error = %e, "notification upsert failed");
        }
    }

    async fn dismiss(&self, id: &NotificationId) {
        if let Err(e) = self.gateway.dismiss(id).await {
            warn!(category = id.category.id(), error = %e, "notification dismiss failed");
        }
    }
}

impl Drop for AlertNotifier {
    fn drop(&mut self) {
        if let Some(timer) = self.state().confirmation_timer.take() {
            timer.abort();
        }
    }
}

fn channel_label(family: WarningFamily) -> &'static str {
    match family {
        WarningFamily::PhAcid | WarningFamily::PhBase => "pH",
        WarningFamily::TurbidityHigh => "Turbidity",
        WarningFamily::TemperatureHigh | WarningFamily::TemperatureLow => "Temperature",
    }
}

fn with_unit(family: WarningFamily, value: f64) -> String {
    match family {
        WarningFamily::PhAcid | WarningFamily::PhBase => format!("{value:.2}"),
        WarningFamily::TurbidityHigh => format!("{value:.1} NTU"),
        WarningFamily::TemperatureHigh | WarningFamily::TemperatureLow => format!("{value:.1} °C"),
    }
}

fn status_content(
    latest: Option<&SensorReading>,
    active: Option<&ActiveWarning>,
) -> NotificationContent {
    let quality = WaterQuality::assess(latest);
    let mut body = match latest {
        Some(r) => format!(
            "pH {:.2} | Turbidity {:.1} NTU | {:.1} °C",
            r.ph, r.turbidity, r.temperature
        ),
        None => "Waiting for data".to_string(),
    };
    if let Some(active) = active {
        body.push_str(" | ");
        body.push_str(active.family.title());
    }
    NotificationContent {
        title: format!("Water quality: {}", quality.label()),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquamon_types::{AquaError, ReadingSource};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Upsert {
            category: NotificationCategory,
            sound: bool,
            sticky: bool,
        },
        Dismiss(NotificationCategory),
    }

    #[derive(Default)]
    struct RecordingGateway {
        calls: Mutex<Vec<Call>>,
        fail: bool,
    }

    impl RecordingGateway {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn dismissals_of(&self, category: NotificationCategory) -> usize {
            self.calls()
                .iter()
                .filter(|c| **c == Call::Dismiss(category))
                .count()
        }
    }

    #[async_trait]
    impl NotificationGateway for RecordingGateway {
        async fn upsert(
            &self,
            id: &NotificationId,
            _content: &NotificationContent,
            options: NotificationOptions,
        ) -> Result<(), AquaError> {
            self.calls.lock().unwrap().push(Call::Upsert {
                category: id.category,
                sound: options.sound,
                sticky: options.sticky,
            });
            if self.fail {
                return Err(AquaError::Gateway("permission denied".into()));
            }
            Ok(())
        }

        async fn dismiss(&self, id: &NotificationId) -> Result<(), AquaError> {
            self.calls.lock().unwrap().push(Call::Dismiss(id.category));
            if self.fail {
                return Err(AquaError::Gateway("permission denied".into()));
            }
            Ok(())
        }
    }

    fn reading(ph: f64, turbidity: f64) -> SensorReading {
        let mut r = SensorReading::with_defaults(Utc::now(), ReadingSource::Push);
        r.ph = ph;
        r.turbidity = turbidity;
        r
    }

    fn notifier(
        lifecycle: Lifecycle,
    ) -> (
        AlertNotifier,
        Arc<RecordingGateway>,
        watch::Sender<Lifecycle>,
        EventBus,
    ) {
        let gateway = Arc::new(RecordingGateway::default());
        let (tx, rx) = watch::channel(lifecycle);
        let bus = EventBus::default();
        let n = AlertNotifier::new(AlertConfig::default(), gateway.clone(), rx, bus.clone());
        (n, gateway, tx, bus)
    }

    fn upsert(category: NotificationCategory, sound: bool, sticky: bool) -> Call {
        Call::Upsert {
            category,
            sound,
            sticky,
        }
    }

    #[tokio::test]
    async fn foreground_keeps_state_in_memory_only() {
        let (n, gateway, _tx, bus) = notifier(Lifecycle::Foreground);
        let mut alerts = bus.subscribe_to(Topic::Alerts);

        let decision = n.on_reading(&reading(5.5, 90.0)).await;
        assert!(matches!(
            decision,
            AlertDecision::Raised {
                family: WarningFamily::PhAcid,
                ..
            }
        ));
        assert!(gateway.calls().is_empty());
        assert!(n.active_warning().is_some());
        assert!(matches!(
            alerts.try_recv().map(|e| e.payload),
            Some(EventPayload::WarningRaised {
                family: WarningFamily::PhAcid,
                is_new: true,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn background_warning_sounds_once_then_updates_silently() {
        let (n, gateway, _tx, _bus) = notifier(Lifecycle::Background);
        n.on_reading(&reading(5.5, 0.0)).await;
        n.on_reading(&reading(5.4, 0.0)).await;

        use NotificationCategory::*;
        assert_eq!(
            gateway.calls(),
            vec![
                upsert(Warning, true, true),
                upsert(OngoingStatus, false, true),
                upsert(Warning, false, true),
                upsert(OngoingStatus, false, true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_dismisses_warning_and_confirms_normal() {
        let (n, gateway, _tx, bus) = notifier(Lifecycle::Background);
        let mut alerts = bus.subscribe_to(Topic::Alerts);
        n.on_reading(&reading(5.5, 0.0)).await;
        let decision = n.on_reading(&reading(7.0, 10.0)).await;
        assert_eq!(
            decision,
            AlertDecision::Cleared {
                family: WarningFamily::PhAcid
            }
        );

        use NotificationCategory::*;
        assert_eq!(
            &gateway.calls()[2..],
            &[
                Call::Dismiss(Warning),
                upsert(NormalConfirmation, false, false),
                upsert(OngoingStatus, false, true),
            ]
        );

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(gateway.dismissals_of(NormalConfirmation), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(gateway.dismissals_of(NormalConfirmation), 1);

        let payloads: Vec<_> = std::iter::from_fn(|| alerts.try_recv())
            .map(|e| e.payload)
            .collect();
        assert_eq!(payloads.len(), 2);
        assert_eq!(
            payloads[1],
            EventPayload::WarningCleared {
                family: WarningFamily::PhAcid
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn newer_confirmation_cancels_older_timer() {
        let (n, gateway, _tx, _bus) = notifier(Lifecycle::Background);
        n.on_reading(&reading(5.5, 0.0)).await;
        n.on_reading(&reading(7.0, 0.0)).await; // confirmation A, due at +10s

        tokio::time::sleep(Duration::from_secs(3)).await;
        n.on_reading(&reading(9.5, 0.0)).await; // A withdrawn
        assert_eq!(gateway.dismissals_of(NotificationCategory::NormalConfirmation), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        n.on_reading(&reading(7.0, 0.0)).await; // confirmation B, due at +15s

        tokio::time::sleep(Duration::from_secs(7)).await; // +12s
        assert_eq!(gateway.dismissals_of(NotificationCategory::NormalConfirmation), 1);
        tokio::time::sleep(Duration::from_secs(4)).await; // +16s
        assert_eq!(gateway.dismissals_of(NotificationCategory::NormalConfirmation), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn breach_during_confirmation_withdraws_it() {
        let (n, gateway, _tx, _bus) = notifier(Lifecycle::Background);
        n.on_reading(&reading(5.5, 0.0)).await;
        n.on_reading(&reading(7.0, 0.0)).await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        let before = gateway.calls().len();

        n.on_reading(&reading(7.0, 95.0)).await;

        use NotificationCategory::*;
        assert_eq!(
            &gateway.calls()[before..],
            &[
                Call::Dismiss(NormalConfirmation),
                upsert(Warning, true, true),
                upsert(OngoingStatus, false, true),
            ]
        );

        // The cancelled timer never fires a second dismissal.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(gateway.dismissals_of(NormalConfirmation), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn breach_after_confirmation_expired_skips_withdrawal() {
        let (n, gateway, _tx, _bus) = notifier(Lifecycle::Background);
        n.on_reading(&reading(5.5, 0.0)).await;
        n.on_reading(&reading(7.0, 0.0)).await;
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(gateway.dismissals_of(NotificationCategory::NormalConfirmation), 1);

        n.on_reading(&reading(5.5, 0.0)).await;
        assert_eq!(gateway.dismissals_of(NotificationCategory::NormalConfirmation), 1);
    }

    #[tokio::test]
    async fn warning_cleared_in_foreground_is_removed_on_return_to_background() {
        let (n, gateway, tx, _bus) = notifier(Lifecycle::Background);
        n.on_reading(&reading(5.5, 0.0)).await;

        tx.send(Lifecycle::Foreground).unwrap();
        n.on_lifecycle(Lifecycle::Foreground).await;
        let decision = n.on_reading(&reading(7.0, 0.0)).await;
        assert_eq!(
            decision,
            AlertDecision::Cleared {
                family: WarningFamily::PhAcid
            }
        );
        assert!(n.active_warning().is_none());

        tx.send(Lifecycle::Background).unwrap();
        n.on_lifecycle(Lifecycle::Background).await;

        use NotificationCategory::*;
        let calls = gateway.calls();
        let posted = calls
            .iter()
            .rposition(|c| *c == upsert(Warning, true, true))
            .unwrap();
        let removed = calls
            .iter()
            .rposition(|c| *c == Call::Dismiss(Warning))
            .expect("stale warning must be dismissed");
        assert!(removed > posted);
        assert_eq!(calls.last(), Some(&upsert(OngoingStatus, false, true)));

        // Nothing left to remove on the next transition.
        tx.send(Lifecycle::Foreground).unwrap();
        n.on_lifecycle(Lifecycle::Foreground).await;
        tx.send(Lifecycle::Background).unwrap();
        n.on_lifecycle(Lifecycle::Background).await;
        assert_eq!(gateway.dismissals_of(Warning), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn still_normal_status_is_throttled() {
        let (n, gateway, _tx, _bus) = notifier(Lifecycle::Background);
        for _ in 0..3 {
            assert_eq!(n.on_reading(&reading(7.0, 5.0)).await, AlertDecision::StillNormal);
        }
        assert_eq!(gateway.calls().len(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        n.on_reading(&reading(7.0, 5.0)).await;
        assert_eq!(
            gateway.calls(),
            vec![
                upsert(NotificationCategory::OngoingStatus, false, true),
                upsert(NotificationCategory::OngoingStatus, false, true),
            ]
        );
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let (n, gateway, tx, _bus) = notifier(Lifecycle::Foreground);
        n.on_reading(&reading(7.0, 95.0)).await;
        assert!(gateway.calls().is_empty());

        tx.send(Lifecycle::Background).unwrap();
        n.on_lifecycle(Lifecycle::Background).await;
        tx.send(Lifecycle::Foreground).unwrap();
        n.on_lifecycle(Lifecycle::Foreground).await;

        use NotificationCategory::*;
        assert_eq!(
            gateway.calls(),
            vec![
                upsert(Warning, false, true),
                upsert(OngoingStatus, false, true),
                Call::Dismiss(OngoingStatus),
            ]
        );
    }

    #[tokio::test]
    async fn gateway_failures_are_absorbed() {
        let gateway = Arc::new(RecordingGateway {
            fail: true,
            ..RecordingGateway::default()
        });
        let (_tx, rx) = watch::channel(Lifecycle::Background);
        let n = AlertNotifier::new(AlertConfig::default(), gateway.clone(), rx, EventBus::default());

        let decision = n.on_reading(&reading(5.5, 0.0)).await;
        assert!(matches!(decision, AlertDecision::Raised { is_new: true, .. }));
        assert_eq!(gateway.calls().len(), 2);
    }

    #[test]
    fn status_snapshot_mentions_active_warning() {
        let r = reading(5.5, 12.0);
        let active = ActiveWarning {
            family: WarningFamily::PhAcid,
            value: 5.5,
            threshold: 6.0,
            last_raised: Utc::now(),
        };
        let content = status_content(Some(&r), Some(&active));
        assert_eq!(content.title, "Water quality: Poor");
        assert!(content.body.starts_with("pH 5.50 | Turbidity 12.0 NTU"));
        assert!(content.body.ends_with("Water too acidic"));

        assert_eq!(status_content(None, None).title, "Water quality: Unknown");
    }
}
