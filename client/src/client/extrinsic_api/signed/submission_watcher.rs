use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use futures::{FutureExt, StreamExt};
use sp_core::H256;
use thiserror::Error;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, trace, warn};

use crate::client::base_rpc_api::{
	BaseRpcApi, CorrelationId, StatusStream, StatusSubscription, TransactionStatus, TransportError,
};

use super::{
	call_builder::{Nonce, SignedExtrinsic},
	lifecycle::{Lifecycle, LifecycleState, Outcome, StatusEvent, Transition},
};

#[cfg(test)]
mod tests;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Timed out waiting for the submission to resolve, it is currently {state}")]
pub struct TimeoutError {
	pub state: LifecycleState,
}

/// Submits signed extrinsics over a shared connection and hands out one [`SubmissionHandle`] per
/// submission.
pub struct SubmissionTracker<C> {
	client: Arc<C>,
}

impl<C> Clone for SubmissionTracker<C> {
	fn clone(&self) -> Self {
		Self { client: self.client.clone() }
	}
}

impl<C: BaseRpcApi + Send + Sync + 'static> SubmissionTracker<C> {
	pub fn new(client: Arc<C>) -> Self {
		Self { client }
	}

	/// Sends the extrinsic and starts watching it. A rejected extrinsic never opens a subscription,
	/// so there is nothing to release on error.
	pub async fn submit(
		&self,
		extrinsic: SignedExtrinsic,
	) -> Result<SubmissionHandle<C>, TransportError> {
		let tx_hash = extrinsic.tx_hash();
		let nonce = extrinsic.nonce();
		let StatusSubscription { correlation_id, status_stream } = self
			.client
			.submit_and_watch_extrinsic(extrinsic.into_encoded())
			.await
			.inspect_err(|error| {
				debug!("Submission of {tx_hash:?} at nonce {nonce} failed: {error}")
			})?;
		debug!(
			"Submitted {tx_hash:?} at nonce {nonce}, watching it as subscription {correlation_id}"
		);

		let (cancel_sender, cancel_receiver) = watch::channel(false);
		Ok(SubmissionHandle {
			correlation_id,
			tx_hash,
			nonce,
			lifecycle: Lifecycle::default(),
			status_stream: Some(status_stream),
			lease: Arc::new(SubscriptionLease {
				client: self.client.clone(),
				correlation_id,
				released: AtomicBool::new(false),
				cancel_sender,
			}),
			cancel_receiver,
		})
	}
}

/// The right to one node subscription. Whoever releases it first unsubscribes, later releases do
/// nothing.
struct SubscriptionLease<C: BaseRpcApi> {
	client: Arc<C>,
	correlation_id: CorrelationId,
	released: AtomicBool,
	cancel_sender: watch::Sender<bool>,
}

impl<C: BaseRpcApi> SubscriptionLease<C> {
	fn release(&self) {
		if !self.released.swap(true, Ordering::AcqRel) {
			trace!("Releasing subscription {}", self.correlation_id);
			self.client.unsubscribe(self.correlation_id);
		}
	}
}

/// Cancels a submission from outside the task awaiting it.
pub struct Canceller<C: BaseRpcApi> {
	lease: Arc<SubscriptionLease<C>>,
}

impl<C: BaseRpcApi> Clone for Canceller<C> {
	fn clone(&self) -> Self {
		Self { lease: self.lease.clone() }
	}
}

impl<C: BaseRpcApi> Canceller<C> {
	/// Releases the subscription immediately. The handle reports [`Outcome::Cancelled`] unless it
	/// had already resolved.
	pub fn cancel(&self) {
		self.lease.cancel_sender.send_replace(true);
		self.lease.release();
	}
}

enum Next {
	Cancelled,
	Status(Option<Result<TransactionStatus, TransportError>>),
}

/// Tracks a single submitted extrinsic until it resolves. Dropping the handle releases its
/// subscription.
pub struct SubmissionHandle<C: BaseRpcApi> {
	correlation_id: CorrelationId,
	tx_hash: H256,
	nonce: Nonce,
	lifecycle: Lifecycle,
	status_stream: Option<StatusStream>,
	lease: Arc<SubscriptionLease<C>>,
	cancel_receiver: watch::Receiver<bool>,
}

impl<C: BaseRpcApi> SubmissionHandle<C> {
	pub fn correlation_id(&self) -> CorrelationId {
		self.correlation_id
	}

	pub fn tx_hash(&self) -> H256 {
		self.tx_hash
	}

	pub fn nonce(&self) -> Nonce {
		self.nonce
	}

	/// A cancel through any [`Canceller`] shows as [`LifecycleState::Cancelled`] straight away,
	/// unless the submission had already resolved.
	pub fn state(&self) -> LifecycleState {
		let state = self.lifecycle.state();
		if !state.is_terminal() && *self.cancel_receiver.borrow() {
			LifecycleState::Cancelled
		} else {
			state.clone()
		}
	}

	pub fn canceller(&self) -> Canceller<C> {
		Canceller { lease: self.lease.clone() }
	}

	/// Waits until the submission resolves or `deadline` passes. A timeout leaves the subscription
	/// live, so this can be called again. Once resolved, always returns the same outcome.
	pub async fn await_outcome(&mut self, deadline: Instant) -> Result<Outcome, TimeoutError> {
		tokio::time::timeout_at(deadline, self.next_outcome())
			.await
			.map_err(|_| TimeoutError { state: self.lifecycle.state().clone() })
	}

	/// Stops tracking the submission. Has no effect if it already resolved.
	pub fn cancel(&mut self) {
		if self.lifecycle.cancel() {
			info!("Submission {:?} was cancelled", self.tx_hash);
		}
		self.status_stream = None;
		self.lease.release();
	}

	async fn next_outcome(&mut self) -> Outcome {
		loop {
			if let Some(outcome) = self.lifecycle.outcome() {
				return outcome
			}

			let next = match self.status_stream.as_mut() {
				Some(status_stream) => {
					let cancel_receiver = &mut self.cancel_receiver;
					tokio::select! {
						biased;
						_ = cancel_receiver.wait_for(|cancelled| *cancelled) => Next::Cancelled,
						status = status_stream.next() => Next::Status(status),
					}
				},
				None => Next::Cancelled,
			};

			match next {
				Next::Cancelled => self.cancel(),
				Next::Status(Some(Ok(status))) => self.apply(StatusEvent::from(status)),
				Next::Status(Some(Err(error))) =>
					self.apply(StatusEvent::TransportFault(error.to_string())),
				Next::Status(None) => self.apply(StatusEvent::TransportFault(
					"the status subscription closed unexpectedly".to_owned(),
				)),
			}
		}
	}

	fn apply(&mut self, event: StatusEvent) {
		self.record(event);
		if self.lifecycle.state().is_terminal() {
			// Anything already queued is observed before the subscription goes away.
			if let Some(mut status_stream) = self.status_stream.take() {
				while let Some(Some(status)) = status_stream.next().now_or_never() {
					if let Ok(status) = status {
						self.record(StatusEvent::from(status));
					}
				}
			}
			self.lease.release();
		}
	}

	fn record(&mut self, event: StatusEvent) {
		trace!("Submission {:?} received {event:?}", self.tx_hash);
		match self.lifecycle.on_event(event) {
			Transition::Moved { from, to } => {
				info!("Current status is {to} (was {from}) for {:?}", self.tx_hash)
			},
			Transition::Anomaly(anomaly) =>
				warn!("Inconsistent status for {:?}: {anomaly}", self.tx_hash),
			Transition::Unchanged | Transition::Ignored => {},
		}
	}
}

impl<C: BaseRpcApi> Drop for SubmissionHandle<C> {
	fn drop(&mut self) {
		self.lease.release();
	}
}
