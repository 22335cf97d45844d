use clap::Parser;

#[derive(Debug, Parser)]
pub struct Cli {
    #[command(flatten)]
    pub verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Path of the configuration file
    #[clap(long, short)]
    pub config: camino::Utf8PathBuf,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Refresh the panel once, then follow the configured schedule if one is
    /// set
    Run {
        /// Override the configured cron expression
        /// ("minute hour day-of-month month weekday")
        #[clap(long)]
        schedule: Option<String>,
    },

    /// Ignore everything else and just clear the panel
    Reset,

    /// Validate the configuration and exit
    VerifyConfig,
}
