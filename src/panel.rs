//! Panel controller: sequences the hardware lifecycle over the opaque panel
//! device.
//!
//! State machine:
//! `Uninitialized -> Awake -> (FrameLoaded -> Refreshing -> Awake)* -> Sleeping`,
//! with `Cleared` reachable from any awake state via the explicit reset
//! command.
//!
//! Hardware calls block until the panel settles, so they run on the blocking
//! pool. A refresh that exceeds its timeout is never aborted mid-write (an
//! interrupted waveform ghosts the panel); the in-flight task is parked and
//! the device reclaimed later, bounded by the shutdown grace period.

use crate::device::{DeviceError, PanelDevice, PanelProfile, RefreshMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Awake,
    FrameLoaded,
    Refreshing,
    Cleared,
    Sleeping,
}

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("Panel device is not ready for {operation} (state {state:?})")]
    DeviceNotReady {
        operation: &'static str,
        state: DeviceState,
    },

    #[error("Panel refresh did not complete within {timeout:?}")]
    RefreshTimeout { timeout: std::time::Duration },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Panel task failed")]
    Join(#[source] tokio::task::JoinError),
}

type ParkedOperation = tokio::task::JoinHandle<(Box<dyn PanelDevice>, Result<(), DeviceError>)>;

pub struct PanelController {
    device: Option<Box<dyn PanelDevice>>,
    parked: Option<ParkedOperation>,
    state: DeviceState,
    profile: PanelProfile,
    refresh_timeout: std::time::Duration,
}

impl PanelController {
    pub fn new(device: Box<dyn PanelDevice>, refresh_timeout: std::time::Duration) -> Self {
        let profile = device.profile();
        Self {
            device: Some(device),
            parked: None,
            state: DeviceState::Uninitialized,
            profile,
            refresh_timeout,
        }
    }

    pub fn profile(&self) -> PanelProfile {
        self.profile
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Initializes the device. No-op while the device is already awake.
    pub async fn wake(&mut self) -> Result<(), PanelError> {
        self.harvest_finished().await;
        match self.state {
            DeviceState::Awake | DeviceState::FrameLoaded | DeviceState::Cleared => Ok(()),
            DeviceState::Uninitialized | DeviceState::Sleeping | DeviceState::Refreshing => {
                self.run_blocking("init", |device| device.init()).await?;
                self.state = DeviceState::Awake;
                Ok(())
            }
        }
    }

    /// Transfers the composed frame into device memory. Takes ownership; the
    /// buffer is never reused after this call.
    pub async fn load_frame(&mut self, frame: crate::quantize::FrameBuffer) -> Result<(), PanelError> {
        if !matches!(self.state, DeviceState::Awake | DeviceState::Cleared) {
            return Err(PanelError::DeviceNotReady {
                operation: "load_frame",
                state: self.state,
            });
        }

        self.run_blocking("load_frame", move |device| device.load_frame(&frame))
            .await?;
        self.state = DeviceState::FrameLoaded;
        Ok(())
    }

    /// Triggers a redraw and waits for the hardware, bounded by the refresh
    /// timeout. On timeout the device stays parked with its in-flight write.
    pub async fn refresh(&mut self, mode: RefreshMode) -> Result<(), PanelError> {
        if self.state != DeviceState::FrameLoaded {
            return Err(PanelError::DeviceNotReady {
                operation: "refresh",
                state: self.state,
            });
        }
        let Some(mut device) = self.device.take() else {
            return Err(PanelError::DeviceNotReady {
                operation: "refresh",
                state: self.state,
            });
        };

        self.state = DeviceState::Refreshing;
        let mut handle = tokio::task::spawn_blocking(move || {
            let result = device.refresh(mode);
            (device, result)
        });

        match tokio::time::timeout(self.refresh_timeout, &mut handle).await {
            Ok(Ok((device, result))) => {
                self.device = Some(device);
                match result {
                    Ok(()) => {
                        self.state = DeviceState::Awake;
                        Ok(())
                    }
                    Err(source) => {
                        self.state = DeviceState::Uninitialized;
                        Err(PanelError::Device(source))
                    }
                }
            }
            Ok(Err(source)) => {
                self.state = DeviceState::Uninitialized;
                Err(PanelError::Join(source))
            }
            Err(_elapsed) => {
                self.parked = Some(handle);
                Err(PanelError::RefreshTimeout {
                    timeout: self.refresh_timeout,
                })
            }
        }
    }

    /// Writes an all-background frame and performs a full refresh. Safe from
    /// any state: reclaims a parked device (bounded by `grace`) and forces a
    /// wake first if needed.
    pub async fn clear(&mut self, grace: std::time::Duration) -> Result<(), PanelError> {
        if self.device.is_none() && !self.reacquire(grace).await {
            return Err(PanelError::DeviceNotReady {
                operation: "clear",
                state: self.state,
            });
        }

        if !matches!(
            self.state,
            DeviceState::Awake | DeviceState::FrameLoaded | DeviceState::Cleared
        ) {
            self.run_blocking("init", |device| device.init()).await?;
            self.state = DeviceState::Awake;
        }

        self.run_blocking("clear", |device| device.clear()).await?;
        self.state = DeviceState::Cleared;
        Ok(())
    }

    /// Lowest-power state; called at the end of every successful cycle and on
    /// the clear/reset path.
    pub async fn sleep(&mut self) -> Result<(), PanelError> {
        if self.state == DeviceState::Sleeping {
            return Ok(());
        }

        self.run_blocking("sleep", |device| device.sleep()).await?;
        self.state = DeviceState::Sleeping;
        Ok(())
    }

    /// Shutdown cleanup: clear unconditionally, then sleep. The panel must
    /// never be left mid-refresh or showing a stale image when the process
    /// stops.
    pub async fn shutdown(&mut self, grace: std::time::Duration) -> Result<(), PanelError> {
        match self.clear(grace).await {
            Ok(()) => self.sleep().await,
            Err(error) => {
                if let Err(sleep_error) = self.sleep().await {
                    tracing::debug!(
                        error = ?sleep_error,
                        "Could not sleep the panel after a failed clear"
                    );
                }
                Err(error)
            }
        }
    }

    async fn run_blocking<F>(&mut self, operation: &'static str, op: F) -> Result<(), PanelError>
    where
        F: FnOnce(&mut dyn PanelDevice) -> Result<(), DeviceError> + Send + 'static,
    {
        let Some(mut device) = self.device.take() else {
            return Err(PanelError::DeviceNotReady {
                operation,
                state: self.state,
            });
        };

        let handle = tokio::task::spawn_blocking(move || {
            let result = op(&mut *device);
            (device, result)
        });

        match handle.await {
            Ok((device, result)) => {
                self.device = Some(device);
                if result.is_err() {
                    // Hardware condition unknown after a failed command.
                    self.state = DeviceState::Uninitialized;
                }
                result.map_err(PanelError::Device)
            }
            Err(source) => {
                self.state = DeviceState::Uninitialized;
                Err(PanelError::Join(source))
            }
        }
    }

    async fn harvest_finished(&mut self) {
        if self.parked.as_ref().is_some_and(|handle| handle.is_finished()) {
            self.reacquire(std::time::Duration::ZERO).await;
        }
    }

    async fn reacquire(&mut self, wait: std::time::Duration) -> bool {
        let Some(mut handle) = self.parked.take() else {
            return self.device.is_some();
        };

        match tokio::time::timeout(wait, &mut handle).await {
            Ok(Ok((device, result))) => {
                if let Err(error) = result {
                    tracing::warn!(?error, "Parked panel operation finished with an error");
                }
                self.device = Some(device);
                self.state = DeviceState::Uninitialized;
                true
            }
            Ok(Err(error)) => {
                tracing::error!(?error, "Parked panel operation panicked");
                self.state = DeviceState::Uninitialized;
                false
            }
            Err(_elapsed) => {
                self.parked = Some(handle);
                tracing::warn!(?wait, "Panel device still busy, could not reclaim it");
                false
            }
        }
    }
}
