mod capture;
mod cli;
mod compose;
mod config;
mod cycle;
mod device;
mod error;
mod logging;
mod panel;
mod quantize;
mod scheduler;
mod systemd;

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::eyre::Result<()> {
    setup_panic();
    color_eyre::install().map_err(crate::error::Error::InstallingColorEyre)?;
    let cli = <crate::cli::Cli as clap::Parser>::parse();
    crate::logging::setup(cli.verbosity);
    let config = crate::config::Config::load(&cli.config).await?;

    match cli.command {
        cli::Command::Run { schedule } => {
            run(config, schedule).await?;
        }
        cli::Command::Reset => {
            reset(config).await?;
        }
        cli::Command::VerifyConfig => {
            verify(&config)?;
        }
    }

    Ok(())
}

fn setup_panic() {
    human_panic::setup_panic!(human_panic::Metadata::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    ));
}

async fn run(
    config: crate::config::Config,
    schedule_override: Option<String>,
) -> Result<(), crate::error::Error> {
    let process_state = crate::systemd::ProcessState::new();
    process_state.set_starting();

    let expression = schedule_override.or_else(|| config.schedule.cron.clone());
    let schedule = expression
        .as_deref()
        .map(crate::scheduler::ScheduleSpec::parse)
        .transpose()?;

    let device = crate::device::open(&config.panel).map_err(crate::error::Error::OpenDevice)?;
    let panel = crate::panel::PanelController::new(device, config.panel.refresh_timeout);
    let profile = panel.profile();
    tracing::info!(
        panel = profile.name,
        width = profile.width,
        height = profile.height,
        color_mode = ?profile.color_mode,
        "Panel attached"
    );

    let geometry = crate::compose::PanelGeometry {
        width: profile.width,
        height: profile.height,
        orientation: config.panel.orientation.into(),
        color_mode: profile.color_mode,
    };
    let policy = crate::compose::ComposePolicy {
        alignment: config.panel.alignment.into(),
        quantize_at: config.panel.quantize_at.into(),
    };

    let capture = crate::capture::ChromiumCapture::new(config.capture.clone());
    let coordinator = crate::cycle::Coordinator::new(capture, panel, geometry, policy);

    let cancel = tokio_util::sync::CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    process_state.set_running();
    let scheduler = crate::scheduler::Scheduler::new(
        coordinator,
        schedule,
        cancel,
        config.schedule.grace_period,
    );
    let result = scheduler.run().await;

    match &result {
        Ok(()) => process_state.set_finished(),
        Err(_) => process_state.set_failed(),
    }
    result
}

async fn reset(config: crate::config::Config) -> Result<(), crate::error::Error> {
    let device = crate::device::open(&config.panel).map_err(crate::error::Error::OpenDevice)?;
    let mut panel = crate::panel::PanelController::new(device, config.panel.refresh_timeout);

    tracing::info!("Resetting the panel");
    panel
        .shutdown(config.schedule.grace_period)
        .await
        .map_err(crate::error::Error::Cleanup)?;
    tracing::debug!(state = ?panel.state(), "Panel reset complete");
    Ok(())
}

fn verify(config: &crate::config::Config) -> Result<(), crate::error::Error> {
    if let Some(expression) = &config.schedule.cron {
        crate::scheduler::ScheduleSpec::parse(expression)?;
    }
    tracing::info!("Configuration verified");
    Ok(())
}

fn spawn_signal_watcher(cancel: tokio_util::sync::CancellationToken) {
    tokio::task::spawn(async move {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(stream) => Some(stream),
                Err(error) => {
                    tracing::error!(?error, "Failed to install the SIGTERM handler");
                    None
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, shutting down");
            }
            _ = recv_terminate(terminate.as_mut()) => {
                tracing::info!("Termination requested, shutting down");
            }
        }

        cancel.cancel();
    });
}

async fn recv_terminate(stream: Option<&mut tokio::signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
