//! One end-to-end refresh cycle: capture, compose, quantize, drive the panel.
//!
//! Exactly one cycle is non-terminal at any instant; the scheduler enforces
//! that by construction. A failed step terminates the cycle without retries;
//! the next scheduled trigger is the retry mechanism.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Capturing,
    Composing,
    Driving,
    Complete,
    Failed,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Complete | CycleState::Failed)
    }
}

/// Outcome record of one refresh cycle.
#[derive(Debug)]
pub struct RefreshCycle {
    pub id: u64,
    pub started_at: std::time::Instant,
    pub state: CycleState,
    pub error: Option<CycleError>,
}

impl RefreshCycle {
    fn new(id: u64) -> Self {
        Self {
            id,
            started_at: std::time::Instant::now(),
            state: CycleState::Idle,
            error: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Capture(#[from] crate::capture::CaptureError),

    #[error(transparent)]
    Compose(#[from] crate::compose::ComposeError),

    #[error(transparent)]
    Quantize(#[from] crate::quantize::QuantizeError),

    #[error(transparent)]
    Panel(#[from] crate::panel::PanelError),

    #[error("Refresh cycle interrupted by shutdown")]
    Interrupted,
}

/// Orchestrates refresh cycles over the capture collaborator and the panel
/// controller. Owns the panel for the lifetime of the process.
pub struct Coordinator<C> {
    capture: C,
    panel: crate::panel::PanelController,
    geometry: crate::compose::PanelGeometry,
    policy: crate::compose::ComposePolicy,
    next_id: u64,
}

impl<C: crate::capture::CaptureSource> Coordinator<C> {
    pub fn new(
        capture: C,
        panel: crate::panel::PanelController,
        geometry: crate::compose::PanelGeometry,
        policy: crate::compose::ComposePolicy,
    ) -> Self {
        Self {
            capture,
            panel,
            geometry,
            policy,
            next_id: 1,
        }
    }

    pub fn panel_mut(&mut self) -> &mut crate::panel::PanelController {
        &mut self.panel
    }

    /// Runs one refresh cycle to a terminal state and records the outcome.
    pub async fn run_cycle(
        &mut self,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> RefreshCycle {
        let mut cycle = RefreshCycle::new(self.next_id);
        self.next_id += 1;

        tracing::info!(cycle = cycle.id, "Starting refresh");
        match self.drive(&mut cycle, cancel).await {
            Ok(()) => {
                cycle.state = CycleState::Complete;
                tracing::info!(
                    cycle = cycle.id,
                    elapsed = ?cycle.started_at.elapsed(),
                    "Refresh finished"
                );
            }
            Err(error) => {
                cycle.state = CycleState::Failed;
                tracing::error!(cycle = cycle.id, %error, "Refresh cycle failed");
                cycle.error = Some(error);
            }
        }

        cycle
    }

    async fn drive(
        &mut self,
        cycle: &mut RefreshCycle,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<(), CycleError> {
        if cancel.is_cancelled() {
            return Err(CycleError::Interrupted);
        }

        cycle.state = CycleState::Capturing;
        let page = self.capture.capture(self.geometry.viewport()).await?;

        cycle.state = CycleState::Composing;
        let bitmap = crate::compose::decode(page.path())?;
        let canvas = crate::compose::compose(&bitmap, &self.geometry, self.policy)?;
        let frame = crate::quantize::quantize(&canvas, self.geometry.color_mode)?;

        // Checkpoint between composing and the hardware sequence: a shutdown
        // requested during the capture must not start driving the panel.
        if cancel.is_cancelled() {
            return Err(CycleError::Interrupted);
        }

        cycle.state = CycleState::Driving;
        self.panel.wake().await?;
        self.panel.load_frame(frame).await?;
        self.panel.refresh(crate::device::RefreshMode::Full).await?;
        self.panel.sleep().await?;

        Ok(())
        // `page` drops here; the temporary screenshot file is deleted with it.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{Behavior, StubCapture};
    use crate::device::testing::{profile, RecordingDevice};

    fn coordinator(
        capture: StubCapture,
        width: u32,
        height: u32,
    ) -> (Coordinator<StubCapture>, crate::device::testing::CallLog) {
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
        (Coordinator::new(capture, panel, geometry, policy), log)
    }

    #[tokio::test]
    async fn successful_cycle_drives_the_panel_exactly_once() {
        let capture = StubCapture::new(Behavior::Succeed, std::time::Duration::ZERO);
        let (mut coordinator, log) = coordinator(capture, 1200, 825);
        let cancel = tokio_util::sync::CancellationToken::new();

        let cycle = coordinator.run_cycle(&cancel).await;

        assert_eq!(cycle.state, CycleState::Complete);
        assert_eq!(cycle.id, 1);
        assert_eq!(log.calls(), vec!["init", "load_frame", "refresh:full", "sleep"]);
    }

    #[tokio::test]
    async fn capture_timeout_fails_the_cycle_without_touching_the_panel() {
        let capture = StubCapture::new(Behavior::TimeOut, std::time::Duration::ZERO);
        let (mut coordinator, log) = coordinator(capture, 64, 48);
        let cancel = tokio_util::sync::CancellationToken::new();

        let cycle = coordinator.run_cycle(&cancel).await;

        assert_eq!(cycle.state, CycleState::Failed);
        assert!(matches!(
            cycle.error,
            Some(CycleError::Capture(
                crate::capture::CaptureError::Timeout { .. }
            ))
        ));
        assert_eq!(log.count("load_frame"), 0);
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn cycle_ids_are_sequential() {
        let capture = StubCapture::new(Behavior::Succeed, std::time::Duration::ZERO);
        let (mut coordinator, _log) = coordinator(capture, 64, 48);
        let cancel = tokio_util::sync::CancellationToken::new();

        assert_eq!(coordinator.run_cycle(&cancel).await.id, 1);
        assert_eq!(coordinator.run_cycle(&cancel).await.id, 2);
    }

    #[tokio::test]
    async fn cancelled_token_interrupts_before_the_hardware_sequence() {
        let capture = StubCapture::new(Behavior::Succeed, std::time::Duration::ZERO);
        let (mut coordinator, log) = coordinator(capture, 64, 48);
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();

        let cycle = coordinator.run_cycle(&cancel).await;

        assert_eq!(cycle.state, CycleState::Failed);
        assert!(matches!(cycle.error, Some(CycleError::Interrupted)));
        assert!(log.calls().is_empty());
    }
}
