use std::path::Path;

use anyhow::Context;
use sp_core::{crypto::Ss58Codec, sr25519, Pair};
use sp_runtime::{
	traits::{IdentifyAccount, Verify},
	AccountId32, MultiSignature,
};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Error, Debug)]
#[error("The secret phrase is not a valid mnemonic, secret URI or hex seed")]
pub struct InvalidPhraseError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
	#[error("The signing key is not available")]
	KeyUnavailable,
	#[error("The produced signature does not verify against the signer's public key")]
	InvalidSignature,
}

/// The signing capability used to authorise extrinsics. Implementors never expose their key
/// material, only the account it controls and signatures over payloads.
#[cfg_attr(test, mockall::automock)]
pub trait ExtrinsicSigner {
	fn account_id(&self) -> AccountId32;

	fn sign(&self, payload: &[u8]) -> Result<MultiSignature, SigningError>;
}

/// A wrapper around a substrate [`Pair`] that can be used for signing.
#[derive(Clone)]
pub struct PairSigner<P: Pair> {
	pub account_id: AccountId32,
	signer: P,
}

impl<P: Pair> std::fmt::Debug for PairSigner<P> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PairSigner")
			.field("account_id", &self.account_id.to_ss58check())
			.finish_non_exhaustive()
	}
}

impl<P> PairSigner<P>
where
	MultiSignature: From<P::Signature>,
	<MultiSignature as Verify>::Signer: From<P::Public> + IdentifyAccount<AccountId = AccountId32>,
	P: Pair,
{
	/// Creates a new [`PairSigner`] from a [`Pair`].
	pub fn new(signer: P) -> Self {
		let account_id = <MultiSignature as Verify>::Signer::from(signer.public()).into_account();
		Self { account_id, signer }
	}
}

impl PairSigner<sr25519::Pair> {
	/// Derives an sr25519 identity from a BIP-39 mnemonic, a secret URI (e.g. `//Alice` or
	/// `<mnemonic>//hard/soft`) or a `0x` prefixed hex seed.
	/// An empty phrase is rejected rather than falling back to the public development phrase.
	pub fn from_secret_phrase(secret_phrase: &str) -> Result<Self, InvalidPhraseError> {
		let secret_phrase = secret_phrase.trim();
		if secret_phrase.is_empty() {
			return Err(InvalidPhraseError)
		}
		sr25519::Pair::from_string(secret_phrase, None)
			.map(Self::new)
			.map_err(|_| InvalidPhraseError)
	}

	/// Reads a secret phrase from a file. Surrounding whitespace and quotes are ignored.
	pub fn from_secret_file(path: &Path) -> anyhow::Result<Self> {
		let secret = read_clean_secret_file(path)?;
		Self::from_secret_phrase(&secret)
			.with_context(|| format!("Failed to derive a signing key from {}", path.display()))
	}
}

impl<P> ExtrinsicSigner for PairSigner<P>
where
	MultiSignature: From<P::Signature>,
	P: Pair,
{
	fn account_id(&self) -> AccountId32 {
		self.account_id.clone()
	}

	fn sign(&self, payload: &[u8]) -> Result<MultiSignature, SigningError> {
		let signature = self.signer.sign(payload);
		if P::verify(&signature, payload, &self.signer.public()) {
			Ok(signature.into())
		} else {
			Err(SigningError::InvalidSignature)
		}
	}
}

fn read_clean_secret_file(path: &Path) -> anyhow::Result<Zeroizing<String>> {
	let contents = Zeroizing::new(
		std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read secret file {}", path.display()))?,
	);
	let cleaned = Zeroizing::new(contents.trim().trim_matches('"').to_owned());
	if cleaned.is_empty() {
		anyhow::bail!("Secret file {} is empty", path.display());
	}
	Ok(cleaned)
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	const ALICE_SS58: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

	#[test]
	fn derives_dev_account_from_secret_uri() {
		let signer = PairSigner::from_secret_phrase("//Alice").unwrap();
		assert_eq!(signer.account_id.to_ss58check(), ALICE_SS58);
	}

	#[test]
	fn derives_same_account_from_mnemonic_each_time() {
		let (_, phrase, _) = sr25519::Pair::generate_with_phrase(None);
		let first = PairSigner::from_secret_phrase(&phrase).unwrap();
		let second = PairSigner::from_secret_phrase(&format!("  {phrase}\n")).unwrap();
		assert_eq!(first.account_id, second.account_id);
	}

	#[test]
	fn rejects_malformed_phrase() {
		assert!(PairSigner::from_secret_phrase("not a real mnemonic phrase").is_err());
		assert!(PairSigner::from_secret_phrase("").is_err());
	}

	#[test]
	fn blank_phrase_is_rejected() {
		for phrase in ["", "   ", "\n\t"] {
			assert!(matches!(PairSigner::from_secret_phrase(phrase), Err(InvalidPhraseError)));
		}
	}

	#[test]
	fn signatures_verify_against_account() {
		let signer = PairSigner::from_secret_phrase("//Bob").unwrap();
		let payload = b"register vaccine";
		let signature = signer.sign(payload).unwrap();
		assert!(signature.verify(&payload[..], &signer.account_id));
	}

	#[test]
	fn debug_output_hides_key_material() {
		let signer = PairSigner::from_secret_phrase("//Alice").unwrap();
		let debug = format!("{signer:?}");
		assert_eq!(debug, format!("PairSigner {{ account_id: \"{ALICE_SS58}\", .. }}"));
	}

	#[test]
	fn reads_quoted_secret_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(b"\"//Alice\"\n").unwrap();
		let signer = PairSigner::from_secret_file(file.path()).unwrap();
		assert_eq!(signer.account_id.to_ss58check(), ALICE_SS58);
	}

	#[test]
	fn empty_secret_file_is_an_error() {
		let file = tempfile::NamedTempFile::new().unwrap();
		assert!(PairSigner::from_secret_file(file.path()).is_err());
	}
}
