use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

use crate::settings::Logging;

/// Builds the filter from `RUST_LOG` if it is set, otherwise from the configured directives.
pub fn env_filter(settings: &Logging) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
	match std::env::var(EnvFilter::DEFAULT_ENV) {
		Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
		_ => EnvFilter::try_new(&settings.filter),
	}
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(settings: &Logging) -> anyhow::Result<()> {
	let builder =
		tracing_subscriber::FmtSubscriber::builder().with_env_filter(env_filter(settings)?);
	let result = if settings.json { builder.json().try_init() } else { builder.try_init() };
	result.map_err(|error| anyhow!("Failed to set the default tracing subscriber: {error}"))
}
