pub mod base_rpc_api;
pub mod extrinsic_api;

use futures::try_join;
use sp_runtime::AccountId32;

use base_rpc_api::{BaseRpcApi, TransportError};
use extrinsic_api::signed::call_builder::{BlockNumber, ChainContext};

/// Fetches what is needed to sign an extrinsic for `account_id`, anchoring its mortality at the
/// latest finalized block.
pub async fn chain_context<C: BaseRpcApi + ?Sized + Sync>(
	client: &C,
	account_id: &AccountId32,
	extrinsic_lifetime: BlockNumber,
) -> Result<ChainContext, TransportError> {
	let (nonce, runtime_version, genesis_hash, (checkpoint_block_hash, checkpoint_block_number)) =
		try_join!(
			client.next_account_nonce(account_id.clone()),
			client.runtime_version(),
			client.genesis_hash(),
			client.latest_finalized_block(),
		)?;

	Ok(ChainContext {
		nonce,
		genesis_hash,
		runtime_version,
		checkpoint_block_hash,
		checkpoint_block_number,
		extrinsic_lifetime,
	})
}
