#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Setting up error reporting failed")]
    InstallingColorEyre(#[source] color_eyre::Report),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Schedule(#[from] crate::scheduler::ScheduleError),

    #[error("Failed to open the panel device")]
    OpenDevice(#[source] crate::device::DeviceError),

    #[error("Panel cleanup failed on shutdown")]
    Cleanup(#[source] crate::panel::PanelError),

    #[error("A refresh cycle was still running after the shutdown grace period; the panel may not be cleared")]
    CleanupTimeout,
}
