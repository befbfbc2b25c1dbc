use std::fmt;

use sp_core::H256;

use crate::client::base_rpc_api::TransactionStatus;

pub type BlockHash = H256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
	/// Removed from the pool, e.g. because the pool was full.
	Dropped,
	/// The node found the extrinsic invalid, e.g. because its nonce was already used.
	Invalid,
	/// Another extrinsic with the same nonce was finalized instead.
	Usurped(H256),
	/// The node gave up waiting for the block containing the extrinsic to be finalized.
	FinalityTimeout(BlockHash),
}

impl fmt::Display for DropReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DropReason::Dropped => write!(f, "dropped from the transaction pool"),
			DropReason::Invalid => write!(f, "invalid"),
			DropReason::Usurped(tx_hash) => write!(f, "usurped by {tx_hash:?}"),
			DropReason::FinalityTimeout(block_hash) =>
				write!(f, "finality timed out for block {block_hash:?}"),
		}
	}
}

/// One lifecycle transition reported for a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
	Queued,
	Broadcast(Vec<String>),
	InBlock(BlockHash),
	Retracted(BlockHash),
	Finalized(BlockHash),
	Dropped(DropReason),
	TransportFault(String),
}

impl From<TransactionStatus> for StatusEvent {
	fn from(status: TransactionStatus) -> Self {
		match status {
			TransactionStatus::Future | TransactionStatus::Ready => StatusEvent::Queued,
			TransactionStatus::Broadcast(peers) => StatusEvent::Broadcast(peers),
			TransactionStatus::InBlock(block_hash) => StatusEvent::InBlock(block_hash),
			TransactionStatus::Retracted(block_hash) => StatusEvent::Retracted(block_hash),
			TransactionStatus::Finalized(block_hash) => StatusEvent::Finalized(block_hash),
			TransactionStatus::FinalityTimeout(block_hash) =>
				StatusEvent::Dropped(DropReason::FinalityTimeout(block_hash)),
			TransactionStatus::Usurped(tx_hash) =>
				StatusEvent::Dropped(DropReason::Usurped(tx_hash)),
			TransactionStatus::Dropped => StatusEvent::Dropped(DropReason::Dropped),
			TransactionStatus::Invalid => StatusEvent::Dropped(DropReason::Invalid),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
	Submitting,
	Pending,
	InBlock(BlockHash),
	Finalized(BlockHash),
	Dropped(DropReason),
	Errored(String),
	/// Local only: the caller stopped watching before the chain reported a terminal status.
	Cancelled,
}

impl LifecycleState {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			LifecycleState::Finalized(_) |
				LifecycleState::Dropped(_) |
				LifecycleState::Errored(_) |
				LifecycleState::Cancelled
		)
	}

	pub fn outcome(&self) -> Option<Outcome> {
		match self {
			LifecycleState::Finalized(block_hash) => Some(Outcome::Finalized(*block_hash)),
			LifecycleState::Dropped(reason) =>
				Some(Outcome::Failed(FailureReason::Dropped(reason.clone()))),
			LifecycleState::Errored(reason) =>
				Some(Outcome::Failed(FailureReason::Errored(reason.clone()))),
			LifecycleState::Cancelled => Some(Outcome::Cancelled),
			LifecycleState::Submitting | LifecycleState::Pending | LifecycleState::InBlock(_) =>
				None,
		}
	}
}

impl fmt::Display for LifecycleState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LifecycleState::Submitting => write!(f, "Submitting"),
			LifecycleState::Pending => write!(f, "Pending"),
			LifecycleState::InBlock(block_hash) => write!(f, "InBlock({block_hash:?})"),
			LifecycleState::Finalized(block_hash) => write!(f, "Finalized({block_hash:?})"),
			LifecycleState::Dropped(reason) => write!(f, "Dropped({reason})"),
			LifecycleState::Errored(reason) => write!(f, "Errored({reason})"),
			LifecycleState::Cancelled => write!(f, "Cancelled"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
	Dropped(DropReason),
	Errored(String),
}

impl fmt::Display for FailureReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FailureReason::Dropped(reason) => write!(f, "{reason}"),
			FailureReason::Errored(reason) => write!(f, "transport error: {reason}"),
		}
	}
}

/// How a submission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Finalized(BlockHash),
	Failed(FailureReason),
	Cancelled,
}

impl fmt::Display for Outcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Outcome::Finalized(block_hash) => write!(f, "finalized in block {block_hash:?}"),
			Outcome::Failed(reason) => write!(f, "failed, {reason}"),
			Outcome::Cancelled => write!(f, "cancelled before it was finalized"),
		}
	}
}

/// Events that contradict an already reported finality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
	RetractedAfterFinality { finalized: BlockHash, retracted: BlockHash },
	ConflictingFinality { finalized: BlockHash, reported: BlockHash },
}

impl fmt::Display for Anomaly {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Anomaly::RetractedAfterFinality { finalized, retracted } => write!(
				f,
				"block {retracted:?} was retracted after the extrinsic was finalized in {finalized:?}"
			),
			Anomaly::ConflictingFinality { finalized, reported } => write!(
				f,
				"finality was reported in {reported:?} after the extrinsic was finalized in {finalized:?}"
			),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
	Moved { from: LifecycleState, to: LifecycleState },
	/// The event carried information but did not change the state, e.g. a broadcast to more peers.
	Unchanged,
	/// The event did not apply to the current state and was discarded.
	Ignored,
	Anomaly(Anomaly),
}

/// The lifecycle of a single submission. Only [`StatusEvent`]s and a local cancel move it; once a
/// terminal state is reached it never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
	state: LifecycleState,
}

impl Default for Lifecycle {
	fn default() -> Self {
		Self { state: LifecycleState::Submitting }
	}
}

impl Lifecycle {
	pub fn state(&self) -> &LifecycleState {
		&self.state
	}

	pub fn outcome(&self) -> Option<Outcome> {
		self.state.outcome()
	}

	pub fn on_event(&mut self, event: StatusEvent) -> Transition {
		use LifecycleState as S;
		use StatusEvent as E;

		let next = match (&self.state, event) {
			(S::Finalized(finalized), E::Retracted(retracted)) if *finalized == retracted =>
				return Transition::Anomaly(Anomaly::RetractedAfterFinality {
					finalized: *finalized,
					retracted,
				}),
			(S::Finalized(finalized), E::Finalized(reported)) if *finalized != reported =>
				return Transition::Anomaly(Anomaly::ConflictingFinality {
					finalized: *finalized,
					reported,
				}),
			(state, _) if state.is_terminal() => return Transition::Ignored,

			(_, E::TransportFault(reason)) => S::Errored(reason),
			(_, E::Finalized(block_hash)) => S::Finalized(block_hash),
			(_, E::Dropped(reason)) => S::Dropped(reason),
			(_, E::InBlock(block_hash)) => S::InBlock(block_hash),
			(S::InBlock(in_block), E::Retracted(retracted)) if *in_block == retracted => S::Pending,
			(_, E::Retracted(_)) => return Transition::Ignored,
			(S::Submitting, E::Queued | E::Broadcast(_)) => S::Pending,
			(S::Pending | S::InBlock(_), E::Queued | E::Broadcast(_)) =>
				return Transition::Unchanged,
			(S::Finalized(_) | S::Dropped(_) | S::Errored(_) | S::Cancelled, _) =>
				return Transition::Ignored,
		};

		if next == self.state {
			Transition::Unchanged
		} else {
			let from = std::mem::replace(&mut self.state, next.clone());
			Transition::Moved { from, to: next }
		}
	}

	/// Marks a non-terminal lifecycle as cancelled. Returns false if it had already terminated.
	pub fn cancel(&mut self) -> bool {
		if self.state.is_terminal() {
			false
		} else {
			self.state = LifecycleState::Cancelled;
			true
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const B1: H256 = H256::repeat_byte(1);
	const B2: H256 = H256::repeat_byte(2);

	fn lifecycle_after(events: impl IntoIterator<Item = StatusEvent>) -> Lifecycle {
		let mut lifecycle = Lifecycle::default();
		for event in events {
			lifecycle.on_event(event);
		}
		lifecycle
	}

	fn non_terminal_states() -> Vec<Lifecycle> {
		vec![
			Lifecycle::default(),
			lifecycle_after([StatusEvent::Queued]),
			lifecycle_after([StatusEvent::Queued, StatusEvent::InBlock(B1)]),
			lifecycle_after([StatusEvent::InBlock(B1), StatusEvent::Retracted(B1)]),
		]
	}

	fn terminal_events() -> Vec<StatusEvent> {
		vec![
			StatusEvent::Finalized(B2),
			StatusEvent::Dropped(DropReason::Dropped),
			StatusEvent::Dropped(DropReason::Invalid),
			StatusEvent::Dropped(DropReason::Usurped(B2)),
			StatusEvent::Dropped(DropReason::FinalityTimeout(B1)),
			StatusEvent::TransportFault("connection reset".to_owned()),
		]
	}

	#[test]
	fn happy_path_reaches_finality() {
		let mut lifecycle = Lifecycle::default();
		assert_eq!(lifecycle.state(), &LifecycleState::Submitting);

		assert_eq!(
			lifecycle.on_event(StatusEvent::Queued),
			Transition::Moved { from: LifecycleState::Submitting, to: LifecycleState::Pending }
		);
		assert_eq!(
			lifecycle.on_event(StatusEvent::Broadcast(vec!["peer".to_owned()])),
			Transition::Unchanged
		);
		assert_eq!(
			lifecycle.on_event(StatusEvent::InBlock(B1)),
			Transition::Moved { from: LifecycleState::Pending, to: LifecycleState::InBlock(B1) }
		);
		assert_eq!(
			lifecycle.on_event(StatusEvent::Finalized(B1)),
			Transition::Moved {
				from: LifecycleState::InBlock(B1),
				to: LifecycleState::Finalized(B1)
			}
		);
		assert_eq!(lifecycle.outcome(), Some(Outcome::Finalized(B1)));
	}

	#[test]
	fn retraction_returns_to_pending() {
		let mut lifecycle = lifecycle_after([StatusEvent::Queued, StatusEvent::InBlock(B1)]);
		assert_eq!(
			lifecycle.on_event(StatusEvent::Retracted(B1)),
			Transition::Moved { from: LifecycleState::InBlock(B1), to: LifecycleState::Pending }
		);
		assert!(!lifecycle.state().is_terminal());

		lifecycle.on_event(StatusEvent::InBlock(B2));
		lifecycle.on_event(StatusEvent::Finalized(B2));
		assert_eq!(lifecycle.outcome(), Some(Outcome::Finalized(B2)));
	}

	#[test]
	fn retraction_of_another_block_is_ignored() {
		let mut lifecycle = lifecycle_after([StatusEvent::InBlock(B1)]);
		assert_eq!(lifecycle.on_event(StatusEvent::Retracted(B2)), Transition::Ignored);
		assert_eq!(lifecycle.state(), &LifecycleState::InBlock(B1));

		let mut lifecycle = lifecycle_after([StatusEvent::Queued]);
		assert_eq!(lifecycle.on_event(StatusEvent::Retracted(B1)), Transition::Ignored);
		assert_eq!(lifecycle.state(), &LifecycleState::Pending);
	}

	#[test]
	fn dropped_while_pending_fails() {
		let lifecycle =
			lifecycle_after([StatusEvent::Queued, StatusEvent::Dropped(DropReason::Dropped)]);
		assert_eq!(
			lifecycle.outcome(),
			Some(Outcome::Failed(FailureReason::Dropped(DropReason::Dropped)))
		);
	}

	#[test]
	fn every_non_terminal_state_can_terminate() {
		for lifecycle in non_terminal_states() {
			assert!(!lifecycle.state().is_terminal());
			for event in terminal_events() {
				let mut lifecycle = lifecycle.clone();
				lifecycle.on_event(event.clone());
				assert!(
					lifecycle.state().is_terminal(),
					"{event:?} did not terminate {:?}",
					lifecycle
				);
			}
			let mut lifecycle = lifecycle.clone();
			assert!(lifecycle.cancel());
			assert_eq!(lifecycle.outcome(), Some(Outcome::Cancelled));
		}
	}

	#[test]
	fn finality_is_one_way() {
		let finalized = lifecycle_after([StatusEvent::InBlock(B1), StatusEvent::Finalized(B1)]);

		let later_events = [
			StatusEvent::Queued,
			StatusEvent::Broadcast(vec![]),
			StatusEvent::InBlock(B2),
			StatusEvent::Retracted(B1),
			StatusEvent::Retracted(B2),
			StatusEvent::Finalized(B1),
			StatusEvent::Finalized(B2),
			StatusEvent::Dropped(DropReason::Invalid),
			StatusEvent::TransportFault("closed".to_owned()),
		];
		for event in later_events {
			let mut lifecycle = finalized.clone();
			lifecycle.on_event(event);
			assert_eq!(lifecycle.outcome(), Some(Outcome::Finalized(B1)));
		}

		let mut lifecycle = finalized;
		assert!(!lifecycle.cancel());
		assert_eq!(lifecycle.outcome(), Some(Outcome::Finalized(B1)));
	}

	#[test]
	fn contradictions_after_finality_are_anomalies() {
		let mut lifecycle = lifecycle_after([StatusEvent::InBlock(B1), StatusEvent::Finalized(B1)]);
		assert_eq!(
			lifecycle.on_event(StatusEvent::Retracted(B1)),
			Transition::Anomaly(Anomaly::RetractedAfterFinality { finalized: B1, retracted: B1 })
		);
		assert_eq!(
			lifecycle.on_event(StatusEvent::Finalized(B2)),
			Transition::Anomaly(Anomaly::ConflictingFinality { finalized: B1, reported: B2 })
		);
		assert_eq!(lifecycle.on_event(StatusEvent::Finalized(B1)), Transition::Ignored);
	}

	#[test]
	fn other_terminal_states_ignore_events() {
		let mut lifecycle = lifecycle_after([StatusEvent::Dropped(DropReason::Invalid)]);
		assert_eq!(lifecycle.on_event(StatusEvent::Finalized(B1)), Transition::Ignored);

		let mut lifecycle = Lifecycle::default();
		lifecycle.cancel();
		assert_eq!(lifecycle.on_event(StatusEvent::InBlock(B1)), Transition::Ignored);
		assert_eq!(lifecycle.outcome(), Some(Outcome::Cancelled));
	}

	#[test]
	fn maps_node_statuses() {
		assert_eq!(StatusEvent::from(TransactionStatus::Ready), StatusEvent::Queued);
		assert_eq!(StatusEvent::from(TransactionStatus::Future), StatusEvent::Queued);
		assert_eq!(
			StatusEvent::from(TransactionStatus::Usurped(B2)),
			StatusEvent::Dropped(DropReason::Usurped(B2))
		);
		assert_eq!(
			StatusEvent::from(TransactionStatus::FinalityTimeout(B1)),
			StatusEvent::Dropped(DropReason::FinalityTimeout(B1))
		);
		assert_eq!(StatusEvent::from(TransactionStatus::Finalized(B1)), StatusEvent::Finalized(B1));
	}
}
