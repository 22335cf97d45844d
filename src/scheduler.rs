//! Recurring-refresh lifecycle: one immediate cycle, then re-triggers on the
//! cron schedule. Triggers are collapsed to strictly sequential execution —
//! an overlapping trigger is dropped and logged, never queued. On shutdown
//! the panel is cleared unconditionally before the process exits.

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error(
        "Schedule expression '{expression}' must have five fields \
         (minute hour day-of-month month weekday), got {fields}"
    )]
    FieldCount { expression: String, fields: usize },

    #[error("Failed to parse schedule expression '{expression}'")]
    Parse {
        expression: String,
        #[source]
        source: cron::error::Error,
    },
}

/// A five-field cron expression, owned for the process lifetime. Fire
/// instants evaluate in local time.
pub struct ScheduleSpec {
    expression: String,
    schedule: cron::Schedule,
}

impl ScheduleSpec {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        let fields = expression.split_whitespace().count();
        if fields != 5 {
            return Err(ScheduleError::FieldCount {
                expression: expression.to_string(),
                fields,
            });
        }

        // The cron crate speaks six-field expressions; the service speaks
        // classic five-field cron, so fires always land on second zero.
        let normalized = format!("0 {expression}");
        let schedule = normalized
            .parse::<cron::Schedule>()
            .map_err(|source| ScheduleError::Parse {
                expression: expression.to_string(),
                source,
            })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn next_after(
        &self,
        now: &chrono::DateTime<chrono::Local>,
    ) -> Option<chrono::DateTime<chrono::Local>> {
        self.schedule.after(now).next()
    }

    /// Fire instants that elapsed in `(start, end]` — triggers that would
    /// have overlapped a running cycle.
    pub fn fires_between(
        &self,
        start: &chrono::DateTime<chrono::Local>,
        end: &chrono::DateTime<chrono::Local>,
    ) -> Vec<chrono::DateTime<chrono::Local>> {
        self.schedule
            .after(start)
            .take_while(|fire| fire <= end)
            .collect()
    }
}

impl std::fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Attempts one refresh; drops the trigger (observable in the log) if the
/// previous cycle has not reached a terminal state yet.
pub async fn try_trigger<C: crate::capture::CaptureSource>(
    coordinator: &tokio::sync::Mutex<crate::cycle::Coordinator<C>>,
    cancel: &tokio_util::sync::CancellationToken,
) -> Option<crate::cycle::RefreshCycle> {
    let Ok(mut guard) = coordinator.try_lock() else {
        tracing::warn!("Dropping overlapping refresh trigger, the previous cycle is still running");
        return None;
    };

    let cycle = guard.run_cycle(cancel).await;
    debug_assert!(cycle.state.is_terminal());
    debug_assert_eq!(
        cycle.error.is_some(),
        cycle.state == crate::cycle::CycleState::Failed
    );
    Some(cycle)
}

pub struct Scheduler<C> {
    coordinator: std::sync::Arc<tokio::sync::Mutex<crate::cycle::Coordinator<C>>>,
    schedule: Option<ScheduleSpec>,
    cancel: tokio_util::sync::CancellationToken,
    grace: std::time::Duration,
}

impl<C: crate::capture::CaptureSource> Scheduler<C> {
    pub fn new(
        coordinator: crate::cycle::Coordinator<C>,
        schedule: Option<ScheduleSpec>,
        cancel: tokio_util::sync::CancellationToken,
        grace: std::time::Duration,
    ) -> Self {
        Self {
            coordinator: std::sync::Arc::new(tokio::sync::Mutex::new(coordinator)),
            schedule,
            cancel,
            grace,
        }
    }

    /// Runs one refresh immediately, then follows the schedule (if any) until
    /// cancelled. Always ends by clearing the panel.
    pub async fn run(self) -> Result<(), crate::error::Error> {
        if !self.cancel.is_cancelled() {
            try_trigger(&self.coordinator, &self.cancel).await;
        }

        if let Some(spec) = &self.schedule {
            tracing::info!(schedule = %spec, "Scheduling recurring refreshes");

            loop {
                let now = chrono::Local::now();
                let Some(next) = spec.next_after(&now) else {
                    tracing::warn!("Schedule has no upcoming fire times, stopping");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
                tracing::debug!(fire = %next, "Waiting for the next scheduled refresh");

                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(wait) => {
                        let started = chrono::Local::now();
                        try_trigger(&self.coordinator, &self.cancel).await;

                        for dropped in spec.fires_between(&started, &chrono::Local::now()) {
                            tracing::warn!(
                                fire = %dropped,
                                "Dropped scheduled refresh, a cycle was still running"
                            );
                        }
                    }
                }
            }
        }

        self.shutdown().await
    }

    async fn shutdown(self) -> Result<(), crate::error::Error> {
        let mut coordinator =
            match tokio::time::timeout(self.grace, self.coordinator.lock()).await {
                Ok(guard) => guard,
                Err(_elapsed) => {
                    tracing::error!(
                        grace = ?self.grace,
                        "A refresh cycle was still running after the grace period"
                    );
                    return Err(crate::error::Error::CleanupTimeout);
                }
            };

        tracing::info!("Clearing the panel before exit");
        match coordinator.panel_mut().shutdown(self.grace).await {
            Ok(()) => Ok(()),
            Err(error) => {
                tracing::error!(?error, "Panel cleanup failed");
                Err(crate::error::Error::Cleanup(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{Behavior, StubCapture};
    use crate::device::testing::{profile, CallLog, RecordingDevice};
    use std::sync::atomic::Ordering;

    fn coordinator(capture: StubCapture, width: u32, height: u32) -> (crate::cycle::Coordinator<StubCapture>, CallLog) {
        let (device, log) = RecordingDevice::new(profile(width, height));
        let panel =
            crate::panel::PanelController::new(Box::new(device), std::time::Duration::from_secs(5));
        let geometry = crate::compose::PanelGeometry {
            width,
            height,
            orientation: crate::compose::Orientation::Landscape,
            color_mode: crate::quantize::ColorMode::Grayscale { levels: 16 },
        };
        let policy = crate::compose::ComposePolicy {
            alignment: crate::compose::Alignment::BottomLeft,
            quantize_at: crate::compose::QuantizePhase::Scaled,
        };
        (crate::cycle::Coordinator::new(capture, panel, geometry, policy), log)
    }

    #[test]
    fn five_field_expressions_parse() {
        let spec = ScheduleSpec::parse("*/5 * * * *").unwrap();
        assert_eq!(spec.to_string(), "*/5 * * * *");

        let now = chrono::Local::now();
        let first = spec.next_after(&now).unwrap();
        let second = spec.next_after(&first).unwrap();
        assert!(first > now);
        assert_eq!(second - first, chrono::TimeDelta::minutes(5));
    }

    #[test]
    fn six_field_expressions_are_rejected() {
        assert!(matches!(
            ScheduleSpec::parse("0 */5 * * * *"),
            Err(ScheduleError::FieldCount { fields: 6, .. })
        ));
    }

    #[test]
    fn malformed_fields_are_rejected() {
        assert!(matches!(
            ScheduleSpec::parse("61 * * * *"),
            Err(ScheduleError::Parse { .. })
        ));
    }

    #[test]
    fn fires_between_counts_elapsed_instants() {
        let spec = ScheduleSpec::parse("* * * * *").unwrap();
        let start = chrono::Local::now();
        let end = start + chrono::TimeDelta::minutes(3);
        let fires = spec.fires_between(&start, &end);
        assert!((3..=4).contains(&fires.len()), "got {} fires", fires.len());
    }

    #[tokio::test]
    async fn scheduled_run_completes_one_cycle_and_clears_on_cancel() {
        let capture = StubCapture::new(Behavior::Succeed, std::time::Duration::ZERO);
        let calls = capture.calls.clone();
        let (coordinator, log) = coordinator(capture, 1200, 825);

        let cancel = tokio_util::sync::CancellationToken::new();
        let scheduler = Scheduler::new(
            coordinator,
            Some(ScheduleSpec::parse("*/5 * * * *").unwrap()),
            cancel.clone(),
            std::time::Duration::from_secs(2),
        );
        let run = tokio::spawn(scheduler.run());

        // Wait for the immediate first cycle, then interrupt.
        for _ in 0..100 {
            if log.count("sleep") >= 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        cancel.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let recorded = log.calls();
        assert_eq!(
            &recorded[..4],
            &["init", "load_frame", "refresh:full", "sleep"]
        );
        // Shutdown cleanup after the cycle.
        assert_eq!(&recorded[4..], &["init", "clear", "sleep"]);
    }

    #[tokio::test]
    async fn interrupt_during_a_cycle_still_clears_the_panel() {
        // Capture holds long enough for the cancellation to land mid-cycle.
        let capture = StubCapture::new(Behavior::Succeed, std::time::Duration::from_millis(200));
        let (coordinator, log) = coordinator(capture, 64, 48);

        let cancel = tokio_util::sync::CancellationToken::new();
        let scheduler = Scheduler::new(
            coordinator,
            None,
            cancel.clone(),
            std::time::Duration::from_secs(2),
        );
        let run = tokio::spawn(scheduler.run());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        // The cycle was interrupted before driving; cleanup still ran.
        assert_eq!(log.calls(), vec!["init", "clear", "sleep"]);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_dropped_not_queued() {
        let capture = StubCapture::new(Behavior::Succeed, std::time::Duration::from_millis(100));
        let calls = capture.calls.clone();
        let (coordinator, _log) = coordinator(capture, 32, 16);
        let coordinator = std::sync::Arc::new(tokio::sync::Mutex::new(coordinator));
        let cancel = tokio_util::sync::CancellationToken::new();

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            async move { try_trigger(&coordinator, &cancel).await.is_some() }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = try_trigger(&coordinator, &cancel).await;

        assert!(second.is_none(), "overlapping trigger must be dropped");
        assert!(first.await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

        /// Under concurrent trigger injection with randomized timing, at most
        /// one refresh cycle is ever non-terminal.
        #[test]
        fn at_most_one_cycle_in_flight(
            delays in proptest::collection::vec(0u64..50, 1..10)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            runtime.block_on(async move {
                let capture =
                    StubCapture::new(Behavior::Succeed, std::time::Duration::from_millis(30));
                let max_active = capture.max_active.clone();
                let calls = capture.calls.clone();
                let (coordinator, _log) = coordinator(capture, 32, 16);
                let coordinator = std::sync::Arc::new(tokio::sync::Mutex::new(coordinator));
                let cancel = tokio_util::sync::CancellationToken::new();

                let mut triggers = Vec::new();
                for delay in delays {
                    let coordinator = coordinator.clone();
                    let cancel = cancel.clone();
                    triggers.push(tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                        try_trigger(&coordinator, &cancel).await.is_some()
                    }));
                }

                let mut completed = 0usize;
                for trigger in triggers {
                    if trigger.await.unwrap() {
                        completed += 1;
                    }
                }

                assert!(completed >= 1);
                assert_eq!(calls.load(Ordering::SeqCst), completed);
                assert_eq!(max_active.load(Ordering::SeqCst), 1);
            });
        }
    }
}
