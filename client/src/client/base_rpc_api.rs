use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use jsonrpsee::{
	core::{
		client::{ClientT, Subscription, SubscriptionClientT},
		ClientError,
	},
	rpc_params,
	types::{ErrorObject, ErrorObjectOwned},
	ws_client::{WsClient, WsClientBuilder},
};
use serde::Deserialize;
use sp_core::{crypto::Ss58Codec, Bytes, H256};
use sp_runtime::{transaction_validity::InvalidTransaction, AccountId32};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

#[cfg(test)]
use mockall::automock;

use super::extrinsic_api::signed::call_builder::{BlockNumber, Nonce};

/// Locally generated key of a status subscription.
pub type CorrelationId = u64;

/// The subset of the node's runtime version needed to sign extrinsics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
	pub spec_name: String,
	pub spec_version: u32,
	pub transaction_version: u32,
}

/// Status notifications of `author_submitAndWatchExtrinsic`, as serialized by the node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
	Future,
	Ready,
	Broadcast(Vec<String>),
	InBlock(H256),
	Retracted(H256),
	FinalityTimeout(H256),
	Finalized(H256),
	Usurped(H256),
	Dropped,
	Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
	/// The nonce was already used, or another extrinsic with the same nonce is in the pool.
	StaleNonce,
	/// The signature did not verify, usually because the runtime version changed.
	BadProof,
	Other,
}

#[derive(Error, Debug)]
pub enum TransportError {
	#[error("The node rejected the request: {0}")]
	Rejected(ErrorObjectOwned),
	#[error("Connection to the node failed: {0}")]
	Connection(ClientError),
	#[error("The node sent an unexpected response: {0}")]
	Malformed(#[from] serde_json::Error),
}

impl From<ClientError> for TransportError {
	fn from(error: ClientError) -> Self {
		match error {
			ClientError::Call(error_object) => TransportError::Rejected(error_object),
			ClientError::ParseError(error) => TransportError::Malformed(error),
			error => TransportError::Connection(error),
		}
	}
}

fn invalid_transaction_error(reason: InvalidTransaction) -> ErrorObjectOwned {
	ErrorObject::owned(1010, "Invalid Transaction", Some(<&'static str>::from(reason)))
}

impl TransportError {
	pub fn rejection(&self) -> Rejection {
		match self {
			// 1014: Priority is too low / a transaction with the same nonce is already in the pool
			TransportError::Rejected(error_object) if error_object.code() == 1014 =>
				Rejection::StaleNonce,
			TransportError::Rejected(error_object)
				if *error_object == invalid_transaction_error(InvalidTransaction::Stale) =>
				Rejection::StaleNonce,
			TransportError::Rejected(error_object)
				if *error_object == invalid_transaction_error(InvalidTransaction::BadProof) =>
				Rejection::BadProof,
			_ => Rejection::Other,
		}
	}
}

#[derive(Error, Debug)]
#[error("Failed to connect to {endpoint}")]
pub struct ConnectionError {
	pub endpoint: String,
	#[source]
	pub source: ClientError,
}

pub type StatusStream = BoxStream<'static, Result<TransactionStatus, TransportError>>;

/// The status notifications of one submitted extrinsic. Must be released with
/// [`BaseRpcApi::unsubscribe`] once it is no longer needed.
pub struct StatusSubscription {
	pub correlation_id: CorrelationId,
	pub status_stream: StatusStream,
}

/// Wraps the node RPC methods used to sign, submit and watch extrinsics. This trait allows us to
/// mock the node.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BaseRpcApi {
	async fn next_account_nonce(&self, account_id: AccountId32) -> Result<Nonce, TransportError>;

	async fn runtime_version(&self) -> Result<RuntimeVersion, TransportError>;

	async fn genesis_hash(&self) -> Result<H256, TransportError>;

	async fn latest_finalized_block(&self) -> Result<(H256, BlockNumber), TransportError>;

	/// Sends the extrinsic and opens its status subscription. If the node rejects the extrinsic
	/// no subscription is created.
	async fn submit_and_watch_extrinsic(
		&self,
		extrinsic: Vec<u8>,
	) -> Result<StatusSubscription, TransportError>;

	/// Stops delivery for the subscription and tells the node to stop watching. Does not wait for
	/// the node's acknowledgement. Unknown or already released ids are ignored.
	fn unsubscribe(&self, correlation_id: CorrelationId);
}

#[derive(Deserialize)]
struct Header {
	number: String,
}

fn parse_block_number(hex_number: &str) -> Result<BlockNumber, serde_json::Error> {
	BlockNumber::from_str_radix(hex_number.trim_start_matches("0x"), 16).map_err(|error| {
		<serde_json::Error as serde::de::Error>::custom(format!(
			"invalid block number {hex_number}: {error}"
		))
	})
}

fn missing(what: &str) -> TransportError {
	TransportError::Malformed(<serde_json::Error as serde::de::Error>::custom(format!(
		"the node returned no {what}"
	)))
}

type ReleaseSignals = Arc<Mutex<HashMap<CorrelationId, oneshot::Sender<()>>>>;

/// A node connection shared by every submission. Each status subscription is forwarded by its own
/// task into its own queue, so a slow consumer never holds up the others.
pub struct BaseRpcClient<RawRpcClient> {
	pub raw_rpc_client: Arc<RawRpcClient>,
	next_correlation_id: AtomicU64,
	release_signals: ReleaseSignals,
}

impl<RawRpcClient> BaseRpcClient<RawRpcClient> {
	pub fn new(raw_rpc_client: RawRpcClient) -> Self {
		Self {
			raw_rpc_client: Arc::new(raw_rpc_client),
			next_correlation_id: AtomicU64::new(0),
			release_signals: Default::default(),
		}
	}

	fn forward_statuses(
		&self,
		mut subscription: Subscription<TransactionStatus>,
	) -> StatusSubscription {
		let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);
		let (release_sender, mut release_receiver) = oneshot::channel::<()>();
		let (status_sender, status_receiver) = mpsc::unbounded_channel();
		self.release_signals.lock().unwrap().insert(correlation_id, release_sender);

		let release_signals = self.release_signals.clone();
		tokio::spawn(async move {
			loop {
				tokio::select! {
					biased;
					// Resolves on an explicit release and when the signal is dropped.
					_ = &mut release_receiver => break,
					status = subscription.next() => match status {
						Some(status) => {
							trace!("Subscription {correlation_id} received {status:?}");
							if status_sender
								.send(status.map_err(TransportError::Malformed))
								.is_err()
							{
								break
							}
						},
						None => {
							debug!("Subscription {correlation_id} was closed by the node");
							release_signals.lock().unwrap().remove(&correlation_id);
							return
						},
					},
				}
			}
			if let Err(error) = subscription.unsubscribe().await {
				debug!("Failed to unwatch subscription {correlation_id}: {error}");
			}
		});

		StatusSubscription {
			correlation_id,
			status_stream: Box::pin(UnboundedReceiverStream::new(status_receiver)),
		}
	}
}

#[async_trait]
impl<RawRpcClient: ClientT + SubscriptionClientT + Send + Sync + 'static> BaseRpcApi
	for BaseRpcClient<RawRpcClient>
{
	async fn next_account_nonce(&self, account_id: AccountId32) -> Result<Nonce, TransportError> {
		Ok(self
			.raw_rpc_client
			.request("system_accountNextIndex", rpc_params![account_id.to_ss58check()])
			.await?)
	}

	async fn runtime_version(&self) -> Result<RuntimeVersion, TransportError> {
		Ok(self.raw_rpc_client.request("state_getRuntimeVersion", rpc_params![]).await?)
	}

	async fn genesis_hash(&self) -> Result<H256, TransportError> {
		self.raw_rpc_client
			.request::<Option<H256>, _>("chain_getBlockHash", rpc_params![0u32])
			.await?
			.ok_or_else(|| missing("genesis hash"))
	}

	async fn latest_finalized_block(&self) -> Result<(H256, BlockNumber), TransportError> {
		let block_hash: H256 =
			self.raw_rpc_client.request("chain_getFinalizedHead", rpc_params![]).await?;
		let header = self
			.raw_rpc_client
			.request::<Option<Header>, _>("chain_getHeader", rpc_params![block_hash])
			.await?
			.ok_or_else(|| missing("header for the finalized head"))?;
		Ok((block_hash, parse_block_number(&header.number)?))
	}

	async fn submit_and_watch_extrinsic(
		&self,
		extrinsic: Vec<u8>,
	) -> Result<StatusSubscription, TransportError> {
		let subscription = self
			.raw_rpc_client
			.subscribe::<TransactionStatus, _>(
				"author_submitAndWatchExtrinsic",
				rpc_params![Bytes::from(extrinsic)],
				"author_unwatchExtrinsic",
			)
			.await?;
		Ok(self.forward_statuses(subscription))
	}

	fn unsubscribe(&self, correlation_id: CorrelationId) {
		if let Some(release_sender) = self.release_signals.lock().unwrap().remove(&correlation_id) {
			// The forwarding task may already have finished.
			let _ = release_sender.send(());
		}
	}
}

pub async fn connect(endpoint: &str) -> Result<BaseRpcClient<WsClient>, ConnectionError> {
	let raw_rpc_client = WsClientBuilder::default()
		.build(endpoint)
		.await
		.map_err(|source| ConnectionError { endpoint: endpoint.to_owned(), source })?;
	debug!("Connected to {endpoint}");
	Ok(BaseRpcClient::new(raw_rpc_client))
}
