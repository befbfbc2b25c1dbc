use std::{sync::Mutex, time::Duration};

use futures::channel::mpsc;
use jsonrpsee::types::ErrorObject;
use mockall::predicate::eq;
use sp_core::H256;

use crate::client::{
	base_rpc_api::{MockBaseRpcApi, RuntimeVersion, TransactionStatus},
	extrinsic_api::signed::{
		call_builder::{ArgValue, CallCatalog, CallSpec, ChainContext, SignedCallBuilder},
		lifecycle::{DropReason, FailureReason},
		signer::PairSigner,
	},
};

use super::*;

const B1: H256 = H256::repeat_byte(1);
const B2: H256 = H256::repeat_byte(2);
const FAR_FUTURE: Duration = Duration::from_secs(3600);

type StatusSender = mpsc::UnboundedSender<Result<TransactionStatus, TransportError>>;

fn signed_extrinsic(nonce: Nonce) -> SignedExtrinsic {
	let catalog = CallCatalog::vaccine_chain(10, 9);
	let signer = PairSigner::from_secret_phrase("//Alice").unwrap();
	SignedCallBuilder::new(&catalog)
		.build(
			&CallSpec::new("Vaccine", "register_vac_info", vec![ArgValue::some(ArgValue::U32(1))]),
			&signer,
			&ChainContext {
				nonce,
				genesis_hash: H256::repeat_byte(0xee),
				runtime_version: RuntimeVersion {
					spec_name: "vaccine-chain".to_owned(),
					spec_version: 100,
					transaction_version: 1,
				},
				checkpoint_block_hash: B1,
				checkpoint_block_number: 10,
				extrinsic_lifetime: 128,
			},
		)
		.unwrap()
}

fn status_subscription(correlation_id: CorrelationId) -> (StatusSender, StatusSubscription) {
	let (sender, receiver) = mpsc::unbounded();
	(sender, StatusSubscription { correlation_id, status_stream: receiver.boxed() })
}

/// A node that accepts one extrinsic and expects its subscription to be released exactly once.
fn mock_accepting_one(correlation_id: CorrelationId) -> (StatusSender, MockBaseRpcApi) {
	let (sender, subscription) = status_subscription(correlation_id);
	let mut mock = MockBaseRpcApi::new();
	mock.expect_submit_and_watch_extrinsic()
		.times(1)
		.return_once(move |_| Ok(subscription));
	mock.expect_unsubscribe().with(eq(correlation_id)).times(1).return_const(());
	(sender, mock)
}

fn send(sender: &StatusSender, statuses: impl IntoIterator<Item = TransactionStatus>) {
	for status in statuses {
		sender.unbounded_send(Ok(status)).unwrap();
	}
}

fn far_deadline() -> Instant {
	Instant::now() + FAR_FUTURE
}

#[tokio::test]
async fn resolves_to_finalized_block() {
	let (sender, mock) = mock_accepting_one(7);
	let tracker = SubmissionTracker::new(Arc::new(mock));

	let extrinsic = signed_extrinsic(0);
	let tx_hash = extrinsic.tx_hash();
	let mut handle = tracker.submit(extrinsic).await.unwrap();
	assert_eq!(handle.correlation_id(), 7);
	assert_eq!(handle.tx_hash(), tx_hash);
	assert_eq!(handle.state(), LifecycleState::Submitting);

	send(
		&sender,
		[
			TransactionStatus::Ready,
			TransactionStatus::Broadcast(vec!["peer".to_owned()]),
			TransactionStatus::InBlock(B1),
			TransactionStatus::Finalized(B1),
		],
	);

	assert_eq!(handle.await_outcome(far_deadline()).await, Ok(Outcome::Finalized(B1)));
	assert_eq!(handle.state(), LifecycleState::Finalized(B1));
	// Asking again gives the same answer without touching the node.
	assert_eq!(handle.await_outcome(far_deadline()).await, Ok(Outcome::Finalized(B1)));
}

#[tokio::test]
async fn retracted_block_is_followed_to_the_finalized_one() {
	let (sender, mock) = mock_accepting_one(1);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();

	send(
		&sender,
		[
			TransactionStatus::Ready,
			TransactionStatus::InBlock(B1),
			TransactionStatus::Retracted(B1),
			TransactionStatus::InBlock(B2),
			TransactionStatus::Finalized(B2),
		],
	);

	assert_eq!(handle.await_outcome(far_deadline()).await, Ok(Outcome::Finalized(B2)));
}

#[tokio::test]
async fn dropped_extrinsic_fails_and_releases_once() {
	let (sender, mock) = mock_accepting_one(3);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();

	send(&sender, [TransactionStatus::Ready, TransactionStatus::Dropped]);

	assert_eq!(
		handle.await_outcome(far_deadline()).await,
		Ok(Outcome::Failed(FailureReason::Dropped(DropReason::Dropped)))
	);
	// Neither cancelling nor dropping after resolution releases again.
	handle.cancel();
	drop(handle);
}

#[tokio::test]
async fn usurped_extrinsic_fails() {
	let (sender, mock) = mock_accepting_one(3);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();

	send(&sender, [TransactionStatus::Ready, TransactionStatus::Usurped(B2)]);

	assert_eq!(
		handle.await_outcome(far_deadline()).await,
		Ok(Outcome::Failed(FailureReason::Dropped(DropReason::Usurped(B2))))
	);
}

#[tokio::test]
async fn cancel_is_idempotent() {
	let (_sender, mock) = mock_accepting_one(5);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();

	for _ in 0..3 {
		handle.cancel();
	}
	assert_eq!(handle.state(), LifecycleState::Cancelled);
	assert_eq!(handle.await_outcome(far_deadline()).await, Ok(Outcome::Cancelled));
}

#[tokio::test]
async fn events_after_cancel_are_not_dispatched() {
	let (sender, mock) = mock_accepting_one(5);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();

	handle.cancel();
	// The stream has been dropped, so the node's late notifications go nowhere.
	assert!(sender.unbounded_send(Ok(TransactionStatus::Finalized(B1))).is_err());
	assert_eq!(handle.await_outcome(far_deadline()).await, Ok(Outcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn timeout_keeps_the_subscription_live() {
	let (sender, mock) = mock_accepting_one(9);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();

	send(&sender, [TransactionStatus::Ready, TransactionStatus::InBlock(B1)]);

	assert_eq!(
		handle.await_outcome(Instant::now() + Duration::from_secs(10)).await,
		Err(TimeoutError { state: LifecycleState::InBlock(B1) })
	);

	send(&sender, [TransactionStatus::Finalized(B1)]);
	assert_eq!(
		handle.await_outcome(Instant::now() + Duration::from_secs(20)).await,
		Ok(Outcome::Finalized(B1))
	);
}

#[tokio::test(start_paused = true)]
async fn deadline_in_the_past_times_out_immediately() {
	let (_sender, mock) = mock_accepting_one(9);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();

	assert_eq!(
		handle.await_outcome(Instant::now()).await,
		Err(TimeoutError { state: LifecycleState::Submitting })
	);
}

#[tokio::test]
async fn rejected_submission_opens_no_subscription() {
	let mut mock = MockBaseRpcApi::new();
	mock.expect_submit_and_watch_extrinsic().times(1).returning(|_| {
		Err(TransportError::Rejected(ErrorObject::owned(
			1010,
			"Invalid Transaction",
			Some("Transaction has a bad signature"),
		)))
	});
	mock.expect_unsubscribe().never();
	let tracker = SubmissionTracker::new(Arc::new(mock));

	assert!(matches!(
		tracker.submit(signed_extrinsic(0)).await,
		Err(TransportError::Rejected(_))
	));
}

#[tokio::test]
async fn queued_retraction_after_finality_does_not_reopen() {
	let (sender, mock) = mock_accepting_one(2);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();

	send(
		&sender,
		[
			TransactionStatus::InBlock(B1),
			TransactionStatus::Finalized(B1),
			TransactionStatus::Retracted(B1),
			TransactionStatus::Finalized(B2),
		],
	);

	assert_eq!(handle.await_outcome(far_deadline()).await, Ok(Outcome::Finalized(B1)));
	assert_eq!(handle.state(), LifecycleState::Finalized(B1));
}

#[tokio::test]
async fn closed_stream_is_a_transport_fault() {
	let (sender, mock) = mock_accepting_one(4);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();

	send(&sender, [TransactionStatus::Ready]);
	drop(sender);

	assert!(matches!(
		handle.await_outcome(far_deadline()).await,
		Ok(Outcome::Failed(FailureReason::Errored(_)))
	));
}

#[tokio::test]
async fn undecodable_status_is_a_transport_fault() {
	let (sender, mock) = mock_accepting_one(4);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();

	sender
		.unbounded_send(Err(TransportError::Malformed(
			serde_json::from_str::<TransactionStatus>("\"pending\"").unwrap_err(),
		)))
		.unwrap();

	assert!(matches!(
		handle.await_outcome(far_deadline()).await,
		Ok(Outcome::Failed(FailureReason::Errored(_)))
	));
}

#[tokio::test]
async fn dropping_a_live_handle_releases_once() {
	let (sender, mock) = mock_accepting_one(6);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let handle = tracker.submit(signed_extrinsic(0)).await.unwrap();
	let canceller = handle.canceller();

	send(&sender, [TransactionStatus::Ready]);
	drop(handle);
	// A canceller outliving its handle does not release a second time.
	canceller.cancel();
}

#[tokio::test]
async fn handles_sharing_a_connection_are_independent() {
	let (first_sender, first_subscription) = status_subscription(1);
	let (second_sender, second_subscription) = status_subscription(2);
	let subscriptions = Mutex::new(vec![second_subscription, first_subscription]);

	let mut mock = MockBaseRpcApi::new();
	mock.expect_submit_and_watch_extrinsic()
		.times(2)
		.returning(move |_| Ok(subscriptions.lock().unwrap().pop().unwrap()));
	mock.expect_unsubscribe().with(eq(1)).times(1).return_const(());
	mock.expect_unsubscribe().with(eq(2)).times(1).return_const(());
	let tracker = SubmissionTracker::new(Arc::new(mock));

	let mut first = tracker.submit(signed_extrinsic(0)).await.unwrap();
	let mut second = tracker.submit(signed_extrinsic(1)).await.unwrap();
	assert_ne!(first.tx_hash(), second.tx_hash());
	assert_eq!(second.nonce(), 1);

	send(&second_sender, [TransactionStatus::InBlock(B2), TransactionStatus::Finalized(B2)]);
	send(&first_sender, [TransactionStatus::Ready]);

	assert_eq!(second.await_outcome(far_deadline()).await, Ok(Outcome::Finalized(B2)));
	assert_eq!(first.state(), LifecycleState::Submitting);

	let first_outcome = tokio::spawn(async move { first.await_outcome(far_deadline()).await });
	send(&first_sender, [TransactionStatus::Invalid]);
	assert_eq!(
		first_outcome.await.unwrap(),
		Ok(Outcome::Failed(FailureReason::Dropped(DropReason::Invalid)))
	);
}

#[tokio::test(start_paused = true)]
async fn canceller_interrupts_a_pending_await() {
	let (sender, mock) = mock_accepting_one(8);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();
	send(&sender, [TransactionStatus::Ready, TransactionStatus::InBlock(B1)]);

	let canceller = handle.canceller();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_secs(5)).await;
		canceller.cancel();
	});

	assert_eq!(handle.await_outcome(far_deadline()).await, Ok(Outcome::Cancelled));
	assert_eq!(handle.state(), LifecycleState::Cancelled);
	handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn cancel_from_another_task_is_visible_without_awaiting() {
	let (sender, mock) = mock_accepting_one(12);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();
	send(&sender, [TransactionStatus::Ready, TransactionStatus::InBlock(B1)]);

	assert_eq!(
		handle.await_outcome(Instant::now() + Duration::from_secs(1)).await,
		Err(TimeoutError { state: LifecycleState::InBlock(B1) })
	);
	assert_eq!(handle.state(), LifecycleState::InBlock(B1));

	let canceller = handle.canceller();
	tokio::spawn(async move { canceller.cancel() }).await.unwrap();

	assert_eq!(handle.state(), LifecycleState::Cancelled);
	assert_eq!(handle.await_outcome(far_deadline()).await, Ok(Outcome::Cancelled));
}

#[tokio::test]
async fn cancel_after_finality_changes_nothing() {
	let (sender, mock) = mock_accepting_one(11);
	let tracker = SubmissionTracker::new(Arc::new(mock));
	let mut handle = tracker.submit(signed_extrinsic(0)).await.unwrap();
	let canceller = handle.canceller();

	send(&sender, [TransactionStatus::InBlock(B1), TransactionStatus::Finalized(B1)]);
	assert_eq!(handle.await_outcome(far_deadline()).await, Ok(Outcome::Finalized(B1)));

	canceller.cancel();
	assert_eq!(handle.state(), LifecycleState::Finalized(B1));
	handle.cancel();
	assert_eq!(handle.await_outcome(far_deadline()).await, Ok(Outcome::Finalized(B1)));
}
