use clap::{Parser, Subcommand};
use config::ConfigError;
use vaccine_chain_client::{
	constants::SECRET_PHRASE_ENV,
	driver::VaccineType,
	settings::{CommandLineOptions, Settings},
};
use zeroize::Zeroizing;

#[derive(Parser)]
#[clap(version, about = "Submit signed extrinsics to the vaccine chain and follow them to finality")]
pub struct CLICommandLineOptions {
	#[clap(flatten)]
	pub settings_opts: CommandLineOptions,

	#[clap(
		long = "secret-phrase",
		env = SECRET_PHRASE_ENV,
		hide_env_values = true,
		help = "Mnemonic, secret URI (e.g. //Alice) or hex seed of the signing account. Takes precedence over state_chain.signing_key_file"
	)]
	pub secret_phrase: Option<String>,

	#[clap(subcommand)]
	pub cmd: CLICommand,
}

impl CLICommandLineOptions {
	/// Moves the phrase into a buffer that is wiped on drop.
	pub fn take_secret_phrase(&mut self) -> Option<Zeroizing<String>> {
		self.secret_phrase.take().map(Zeroizing::new)
	}
}

#[derive(Subcommand, Clone, Debug)]
pub enum CLICommand {
	#[clap(about = "Register vaccine information")]
	RegisterVacInfo {
		#[clap(
			long = "vaccine-type",
			value_enum,
			ignore_case = true,
			help = "Leave unset to register without a type"
		)]
		vaccine_type: Option<VaccineType>,
	},
	#[clap(about = "Submit any call known to the client, e.g. `submit Vaccine approve_vaccine 3`")]
	Submit {
		#[clap(help = "Pallet name, e.g. Vaccine or Account")]
		pallet: String,
		#[clap(help = "Call name, e.g. transfer_vaccine")]
		call: String,
		#[clap(help = "Call arguments in declaration order. Use `none` for an empty optional")]
		args: Vec<String>,
	},
}

pub fn load_settings(opts: &CLICommandLineOptions) -> Result<Settings, ConfigError> {
	Settings::new(opts.settings_opts.clone())
}
