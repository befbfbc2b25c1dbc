use std::{future::Future, sync::Arc};

use sp_core::H256;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
	client::{
		base_rpc_api::{BaseRpcApi, Rejection, TransportError},
		chain_context,
		extrinsic_api::signed::{
			call_builder::{ArgValue, BuildError, CallCatalog, CallSpec, SignedCallBuilder},
			lifecycle::Outcome,
			signer::ExtrinsicSigner,
			submission_watcher::{SubmissionHandle, SubmissionTracker, TimeoutError},
		},
	},
	settings::Submission,
};

/// Vaccine types understood by the `Vaccine` pallet, by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum VaccineType {
	Covid19 = 0,
	Flu = 1,
	Hpv = 2,
	Rubella = 3,
}

pub fn register_vac_info_call(vaccine_type: Option<VaccineType>) -> CallSpec {
	CallSpec::new(
		"Vaccine",
		"register_vac_info",
		vec![match vaccine_type {
			Some(vaccine_type) => ArgValue::some(ArgValue::U32(vaccine_type as u32)),
			None => ArgValue::none(),
		}],
	)
}

#[derive(Error, Debug)]
pub enum DriverError {
	#[error(transparent)]
	Build(#[from] BuildError),
	#[error(transparent)]
	Transport(#[from] TransportError),
	#[error("The extrinsic was still rejected after {attempts} resubmissions: {last_error}")]
	RetriesExhausted { attempts: u32, last_error: TransportError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
	pub tx_hash: H256,
	pub outcome: Outcome,
}

/// Builds, signs and submits one call, then follows it until it resolves.
pub struct Driver<C, S> {
	client: Arc<C>,
	signer: S,
	catalog: CallCatalog,
	settings: Submission,
}

impl<C, S> Driver<C, S>
where
	C: BaseRpcApi + Send + Sync + 'static,
	S: ExtrinsicSigner,
{
	pub fn new(client: Arc<C>, signer: S, catalog: CallCatalog, settings: Submission) -> Self {
		Self { client, signer, catalog, settings }
	}

	/// Resolves to [`Outcome::Cancelled`] if `shutdown` completes first or finality is not reached
	/// within the configured timeout.
	pub async fn submit_and_await(
		&self,
		call: &CallSpec,
		shutdown: impl Future<Output = ()>,
	) -> Result<Report, DriverError> {
		let builder = SignedCallBuilder::new(&self.catalog);
		// Malformed calls never reach the node.
		builder.encode_call(call).map_err(BuildError::from)?;

		let handle = self.submit(call, &builder).await?;
		Ok(self.await_finality(handle, shutdown).await)
	}

	async fn submit(
		&self,
		call: &CallSpec,
		builder: &SignedCallBuilder<'_>,
	) -> Result<SubmissionHandle<C>, DriverError> {
		let tracker = SubmissionTracker::new(self.client.clone());
		let account_id = self.signer.account_id();
		let mut context =
			chain_context(&*self.client, &account_id, self.settings.extrinsic_lifetime).await?;
		let mut resubmissions = 0;

		loop {
			let extrinsic = builder.build(call, &self.signer, &context)?;
			info!("Submitting {call} as {:?} with nonce {}", extrinsic.tx_hash(), context.nonce);

			let error = match tracker.submit(extrinsic).await {
				Ok(handle) => return Ok(handle),
				Err(error) => error,
			};

			match error.rejection() {
				Rejection::StaleNonce => {
					warn!(
						"Nonce {} is already used, resubmitting with a fresh nonce",
						context.nonce
					);
				},
				Rejection::BadProof => {
					let runtime_version = self.client.runtime_version().await?;
					if runtime_version == context.runtime_version {
						return Err(error.into())
					}
					warn!(
						"Runtime version changed from {} to {}, resubmitting",
						context.runtime_version.spec_version, runtime_version.spec_version
					);
				},
				Rejection::Other => return Err(error.into()),
			}

			if resubmissions == self.settings.max_retry_attempts {
				return Err(DriverError::RetriesExhausted {
					attempts: resubmissions,
					last_error: error,
				})
			}
			resubmissions += 1;

			let stale_nonce = context.nonce;
			context =
				chain_context(&*self.client, &account_id, self.settings.extrinsic_lifetime).await?;
			if matches!(error.rejection(), Rejection::StaleNonce) {
				// The node may not have seen the pooled extrinsic using the old nonce yet.
				context.nonce = context.nonce.max(stale_nonce + 1);
			}
		}
	}

	async fn await_finality(
		&self,
		mut handle: SubmissionHandle<C>,
		shutdown: impl Future<Output = ()>,
	) -> Report {
		let finality_deadline = Instant::now() + self.settings.finality_timeout;
		tokio::pin!(shutdown);

		let outcome = loop {
			let deadline = std::cmp::min(
				Instant::now() + self.settings.status_report_interval,
				finality_deadline,
			);
			tokio::select! {
				result = handle.await_outcome(deadline) => match result {
					Ok(outcome) => break outcome,
					Err(TimeoutError { state }) if Instant::now() >= finality_deadline => {
						warn!(
							"{:?} was not finalized within {:?}, giving up while it is {state}",
							handle.tx_hash(),
							self.settings.finality_timeout
						);
						handle.cancel();
						break Outcome::Cancelled
					},
					Err(TimeoutError { state }) => info!(
						"Waiting for finality of {:?}, current status is {state}",
						handle.tx_hash()
					),
				},
				_ = &mut shutdown => {
					info!("Shutdown requested, cancelling {:?}", handle.tx_hash());
					handle.cancel();
					break Outcome::Cancelled
				},
			}
		};

		Report { tx_hash: handle.tx_hash(), outcome }
	}
}
