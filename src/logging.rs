use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

/// Structured logs to stderr. `RUST_LOG` directives refine the level the
/// `-v`/`-q` flags select.
pub fn setup<Level>(verbosity: clap_verbosity_flag::Verbosity<Level>)
where
    Level: clap_verbosity_flag::LogLevel,
{
    let directive =
        tracing_subscriber::filter::Directive::from(verbosity.tracing_level_filter());
    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(directive);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let subscriber = tracing_subscriber::registry::Registry::default().with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber).expect("Setting up logger works");
}
