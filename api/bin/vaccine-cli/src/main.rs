use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use sp_core::crypto::Ss58Codec;
use vaccine_chain_client::{
	client::{
		base_rpc_api::connect,
		extrinsic_api::signed::{call_builder::CallCatalog, lifecycle::Outcome, signer::PairSigner},
	},
	constants::SECRET_PHRASE_ENV,
	driver::{register_vac_info_call, Driver, Report},
	logging,
};

use crate::settings::{load_settings, CLICommand::*, CLICommandLineOptions};

mod settings;

#[tokio::main]
async fn main() {
	std::process::exit(match run_cli().await {
		Ok(Report { outcome: Outcome::Finalized(_), .. }) => 0,
		Ok(_) => 1,
		Err(err) => {
			eprintln!("Error: {:?}", err);
			1
		},
	})
}

async fn run_cli() -> Result<Report> {
	let mut command_line_opts = CLICommandLineOptions::parse();
	let secret_phrase = command_line_opts.take_secret_phrase();
	let cli_settings = load_settings(&command_line_opts).map_err(|err| {
		anyhow!(
			"Please ensure your config file path is configured correctly and the file is valid. \
			 You can also just set all configurations required command line arguments.\n{}",
			err
		)
	})?;
	logging::init(&cli_settings.logging)?;

	let signer = match (secret_phrase, &cli_settings.state_chain.signing_key_file) {
		(Some(secret_phrase), _) => PairSigner::from_secret_phrase(&secret_phrase)?,
		(None, Some(signing_key_file)) => PairSigner::from_secret_file(signing_key_file)?,
		(None, None) => bail!(
			"No signing key. Pass --secret-phrase, set {SECRET_PHRASE_ENV} or configure state_chain.signing_key_file"
		),
	};

	let catalog = CallCatalog::vaccine_chain(
		cli_settings.state_chain.vaccine_pallet_index,
		cli_settings.state_chain.account_pallet_index,
	);
	let call = match command_line_opts.cmd {
		RegisterVacInfo { vaccine_type } => register_vac_info_call(vaccine_type),
		Submit { pallet, call, args } => catalog.parse_call(&pallet, &call, &args)?,
	};

	println!(
		"Connecting to state chain node at: `{}` and signing as: `{}`",
		cli_settings.state_chain.ws_endpoint,
		signer.account_id.to_ss58check()
	);
	let client = connect(&cli_settings.state_chain.ws_endpoint).await?;

	let report = Driver::new(Arc::new(client), signer, catalog, cli_settings.submission)
		.submit_and_await(&call, shutdown_signal())
		.await?;

	println!("{call} ({:?}): {}", report.tx_hash, report.outcome);
	Ok(report)
}

async fn shutdown_signal() {
	if tokio::signal::ctrl_c().await.is_err() {
		// Without a signal handler the submission can still time out.
		std::future::pending::<()>().await
	}
}
