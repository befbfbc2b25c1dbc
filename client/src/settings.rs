use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	time::Duration,
};

use clap::Args;
use config::{Config, ConfigError, Environment, File, Map, Source, Value};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::constants::{
	CONFIG_ROOT, DEFAULT_FINALITY_TIMEOUT, DEFAULT_STATUS_REPORT_INTERVAL,
	MAX_EXTRINSIC_RETRY_ATTEMPTS, SIGNED_EXTRINSIC_LIFETIME,
};

pub const DEFAULT_CONFIG_PATH: &str = "config/Default.toml";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct StateChain {
	pub ws_endpoint: String,
	pub signing_key_file: Option<PathBuf>,
	pub vaccine_pallet_index: u8,
	pub account_pallet_index: u8,
}

impl StateChain {
	pub fn validate_settings(&self) -> Result<(), ConfigError> {
		parse_websocket_url(&self.ws_endpoint).map_err(|e| ConfigError::Message(e.to_string()))?;
		Ok(())
	}
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Submission {
	/// Mortality of signed extrinsics, in blocks.
	pub extrinsic_lifetime: u32,
	#[serde(deserialize_with = "deser_secs")]
	pub finality_timeout: Duration,
	#[serde(deserialize_with = "deser_secs")]
	pub status_report_interval: Duration,
	pub max_retry_attempts: u32,
}

impl Submission {
	pub fn validate_settings(&self) -> Result<(), ConfigError> {
		if self.finality_timeout.is_zero() {
			return Err(ConfigError::Message("submission.finality_timeout must be non zero".into()))
		}
		if self.status_report_interval.is_zero() {
			return Err(ConfigError::Message(
				"submission.status_report_interval must be non zero".into(),
			))
		}
		if self.extrinsic_lifetime == 0 {
			return Err(ConfigError::Message(
				"submission.extrinsic_lifetime must be non zero".into(),
			))
		}
		Ok(())
	}
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Logging {
	/// `EnvFilter` directives, overridden by `RUST_LOG`.
	pub filter: String,
	pub json: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
	pub state_chain: StateChain,
	pub submission: Submission,
	pub logging: Logging,
}

fn deser_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
	D: Deserializer<'de>,
{
	u64::deserialize(deserializer).map(Duration::from_secs)
}

#[derive(Args, Debug, Clone, Default)]
pub struct StateChainOptions {
	#[clap(long = "state_chain.ws_endpoint")]
	pub state_chain_ws_endpoint: Option<String>,
	#[clap(long = "state_chain.signing_key_file")]
	pub state_chain_signing_key_file: Option<PathBuf>,
	#[clap(long = "state_chain.vaccine_pallet_index")]
	pub state_chain_vaccine_pallet_index: Option<u8>,
	#[clap(long = "state_chain.account_pallet_index")]
	pub state_chain_account_pallet_index: Option<u8>,
}

impl StateChainOptions {
	pub fn insert_all(&self, map: &mut HashMap<String, Value>) {
		insert_command_line_option(map, "state_chain.ws_endpoint", &self.state_chain_ws_endpoint);
		insert_command_line_option(
			map,
			"state_chain.signing_key_file",
			&self
				.state_chain_signing_key_file
				.as_ref()
				.map(|path| path.to_string_lossy().into_owned()),
		);
		insert_command_line_option(
			map,
			"state_chain.vaccine_pallet_index",
			&self.state_chain_vaccine_pallet_index.map(u64::from),
		);
		insert_command_line_option(
			map,
			"state_chain.account_pallet_index",
			&self.state_chain_account_pallet_index.map(u64::from),
		);
	}
}

#[derive(Args, Debug, Clone, Default)]
pub struct SubmissionOptions {
	#[clap(long = "submission.extrinsic_lifetime")]
	pub submission_extrinsic_lifetime: Option<u32>,
	#[clap(long = "submission.finality_timeout", help = "Seconds to wait for finality")]
	pub submission_finality_timeout: Option<u64>,
	#[clap(long = "submission.status_report_interval", help = "Seconds between progress reports")]
	pub submission_status_report_interval: Option<u64>,
	#[clap(long = "submission.max_retry_attempts")]
	pub submission_max_retry_attempts: Option<u32>,
}

impl SubmissionOptions {
	pub fn insert_all(&self, map: &mut HashMap<String, Value>) {
		insert_command_line_option(
			map,
			"submission.extrinsic_lifetime",
			&self.submission_extrinsic_lifetime.map(u64::from),
		);
		insert_command_line_option(
			map,
			"submission.finality_timeout",
			&self.submission_finality_timeout,
		);
		insert_command_line_option(
			map,
			"submission.status_report_interval",
			&self.submission_status_report_interval,
		);
		insert_command_line_option(
			map,
			"submission.max_retry_attempts",
			&self.submission_max_retry_attempts.map(u64::from),
		);
	}
}

#[derive(Args, Debug, Clone, Default)]
pub struct LoggingOptions {
	#[clap(long = "logging.filter")]
	pub logging_filter: Option<String>,
	#[clap(long = "logging.json")]
	pub logging_json: Option<bool>,
}

impl LoggingOptions {
	pub fn insert_all(&self, map: &mut HashMap<String, Value>) {
		insert_command_line_option(map, "logging.filter", &self.logging_filter);
		insert_command_line_option(map, "logging.json", &self.logging_json);
	}
}

/// Configuration that can be set on the command line. Takes precedence over the config file and
/// the environment.
#[derive(Args, Debug, Clone, Default)]
pub struct CommandLineOptions {
	#[clap(short = 'c', long = "config-path")]
	pub config_path: Option<PathBuf>,

	#[clap(flatten)]
	pub state_chain_opts: StateChainOptions,

	#[clap(flatten)]
	pub submission_opts: SubmissionOptions,

	#[clap(flatten)]
	pub logging_opts: LoggingOptions,
}

impl Source for CommandLineOptions {
	fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
		Box::new((*self).clone())
	}

	fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
		let mut map: HashMap<String, Value> = HashMap::new();

		self.state_chain_opts.insert_all(&mut map);
		self.submission_opts.insert_all(&mut map);
		self.logging_opts.insert_all(&mut map);

		Ok(map)
	}
}

pub fn insert_command_line_option<T>(
	map: &mut HashMap<String, Value>,
	key: &str,
	option: &Option<T>,
) where
	T: Into<Value> + Clone,
{
	if let Some(value) = option {
		map.insert(key.to_string(), value.clone().into());
	}
}

impl Settings {
	/// Loads the config file (`config/Default.toml` unless another path is given), then
	/// `VACCINE__SECTION__KEY` environment variables, then the command line options.
	pub fn new(opts: CommandLineOptions) -> Result<Self, ConfigError> {
		let config_path =
			opts.config_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
		Self::load(&config_path, Some(environment()), opts)
	}

	fn load(
		config_path: &Path,
		environment: Option<Environment>,
		opts: CommandLineOptions,
	) -> Result<Self, ConfigError> {
		let mut builder = Config::builder()
			.set_default("submission.extrinsic_lifetime", u64::from(SIGNED_EXTRINSIC_LIFETIME))?
			.set_default("submission.finality_timeout", DEFAULT_FINALITY_TIMEOUT.as_secs())?
			.set_default(
				"submission.status_report_interval",
				DEFAULT_STATUS_REPORT_INTERVAL.as_secs(),
			)?
			.set_default("submission.max_retry_attempts", u64::from(MAX_EXTRINSIC_RETRY_ATTEMPTS))?
			.set_default("logging.filter", "info")?
			.set_default("logging.json", false)?
			.add_source(File::from(config_path));
		if let Some(environment) = environment {
			builder = builder.add_source(environment);
		}
		let settings: Settings = builder.add_source(opts).build()?.try_deserialize()?;

		settings.validate_settings()?;

		Ok(settings)
	}

	pub fn validate_settings(&self) -> Result<(), ConfigError> {
		self.state_chain.validate_settings()?;
		self.submission.validate_settings()?;
		Ok(())
	}
}

fn environment() -> Environment {
	Environment::with_prefix(CONFIG_ROOT).prefix_separator("__").separator("__")
}

/// Parse the URL and check that it is a valid websocket url
pub fn parse_websocket_url(url: &str) -> anyhow::Result<Url> {
	let url = Url::parse(url)?;
	if url.scheme() != "ws" && url.scheme() != "wss" {
		return Err(anyhow::Error::msg("Wrong scheme"))
	}
	if url.host().is_none() ||
		!url.username().is_empty() ||
		url.password().is_some() ||
		url.query().is_some() ||
		url.fragment().is_some() ||
		url.cannot_be_a_base()
	{
		return Err(anyhow::Error::msg("Invalid URL data"))
	}

	Ok(url)
}
