use std::{collections::BTreeMap, fmt, str::FromStr};

use codec::{Compact, Encode};
use sp_core::{blake2_256, H256};
use sp_runtime::{generic::Era, AccountId32, MultiAddress};
use thiserror::Error;

use crate::{
	client::base_rpc_api::RuntimeVersion,
	constants::{MAX_UNHASHED_SIGNING_PAYLOAD_LEN, SIGNED_EXTRINSIC_VERSION},
};

use super::signer::{ExtrinsicSigner, SigningError};

pub type Nonce = u32;
pub type BlockNumber = u32;

/// The declared shape of a call parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
	Bool,
	U8,
	U16,
	U32,
	U64,
	U128,
	Bytes,
	Text,
	AccountId,
	/// A fieldless enum, encoded as its variant index.
	Variant(Vec<String>),
	Optional(Box<ParamType>),
}

impl fmt::Display for ParamType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ParamType::Bool => write!(f, "bool"),
			ParamType::U8 => write!(f, "u8"),
			ParamType::U16 => write!(f, "u16"),
			ParamType::U32 => write!(f, "u32"),
			ParamType::U64 => write!(f, "u64"),
			ParamType::U128 => write!(f, "u128"),
			ParamType::Bytes => write!(f, "bytes"),
			ParamType::Text => write!(f, "text"),
			ParamType::AccountId => write!(f, "account id"),
			ParamType::Variant(variants) => write!(f, "one of [{}]", variants.join(", ")),
			ParamType::Optional(inner) => write!(f, "optional {inner}"),
		}
	}
}

/// A primitive or binary call argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
	Bool(bool),
	U8(u8),
	U16(u16),
	U32(u32),
	U64(u64),
	U128(u128),
	Bytes(Vec<u8>),
	Text(String),
	AccountId(AccountId32),
	Variant(u8),
	Optional(Option<Box<ArgValue>>),
}

impl ArgValue {
	pub fn some(value: ArgValue) -> Self {
		ArgValue::Optional(Some(Box::new(value)))
	}

	pub fn none() -> Self {
		ArgValue::Optional(None)
	}

	fn kind(&self) -> &'static str {
		match self {
			ArgValue::Bool(_) => "bool",
			ArgValue::U8(_) => "u8",
			ArgValue::U16(_) => "u16",
			ArgValue::U32(_) => "u32",
			ArgValue::U64(_) => "u64",
			ArgValue::U128(_) => "u128",
			ArgValue::Bytes(_) => "bytes",
			ArgValue::Text(_) => "text",
			ArgValue::AccountId(_) => "account id",
			ArgValue::Variant(_) => "variant index",
			ArgValue::Optional(None) => "none",
			ArgValue::Optional(Some(_)) => "optional value",
		}
	}

	/// Parses a command line argument into the value expected by `param_type`.
	pub fn parse(param_type: &ParamType, raw: &str) -> Result<Self, EncodingError> {
		let unparsable =
			|| EncodingError::Unparsable { raw: raw.to_owned(), expected: param_type.clone() };
		let raw = raw.trim();

		Ok(match param_type {
			ParamType::Bool => ArgValue::Bool(raw.parse().map_err(|_| unparsable())?),
			ParamType::U8 => ArgValue::U8(raw.parse().map_err(|_| unparsable())?),
			ParamType::U16 => ArgValue::U16(raw.parse().map_err(|_| unparsable())?),
			ParamType::U32 => ArgValue::U32(raw.parse().map_err(|_| unparsable())?),
			ParamType::U64 => ArgValue::U64(raw.parse().map_err(|_| unparsable())?),
			ParamType::U128 => ArgValue::U128(raw.parse().map_err(|_| unparsable())?),
			ParamType::Bytes => ArgValue::Bytes(match raw.strip_prefix("0x") {
				Some(hex_str) => hex::decode(hex_str).map_err(|_| unparsable())?,
				None => raw.as_bytes().to_vec(),
			}),
			ParamType::Text => ArgValue::Text(raw.to_owned()),
			ParamType::AccountId =>
				ArgValue::AccountId(AccountId32::from_str(raw).map_err(|_| unparsable())?),
			ParamType::Variant(variants) => ArgValue::Variant(
				match variants.iter().position(|variant| variant.eq_ignore_ascii_case(raw)) {
					Some(index) => index as u8,
					None => raw
						.parse::<u8>()
						.ok()
						.filter(|index| (*index as usize) < variants.len())
						.ok_or_else(unparsable)?,
				},
			),
			ParamType::Optional(inner) =>
				if raw.is_empty() || raw.eq_ignore_ascii_case("none") || raw == "null" {
					ArgValue::none()
				} else {
					ArgValue::some(ArgValue::parse(inner, raw)?)
				},
		})
	}
}

/// A call to a pallet dispatchable with its arguments, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
	pallet: String,
	call: String,
	args: Vec<ArgValue>,
}

impl CallSpec {
	pub fn new(pallet: impl Into<String>, call: impl Into<String>, args: Vec<ArgValue>) -> Self {
		Self { pallet: pallet.into(), call: call.into(), args }
	}

	pub fn pallet(&self) -> &str {
		&self.pallet
	}

	pub fn call(&self) -> &str {
		&self.call
	}

	pub fn args(&self) -> &[ArgValue] {
		&self.args
	}
}

impl fmt::Display for CallSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}::{}", self.pallet, self.call)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
	pub pallet_index: u8,
	pub call_index: u8,
	pub params: Vec<(String, ParamType)>,
}

/// The call declarations of the runtime that the builder can encode against.
#[derive(Debug, Clone, Default)]
pub struct CallCatalog {
	calls: BTreeMap<(String, String), CallDescriptor>,
}

impl CallCatalog {
	/// Declares the dispatchables of a pallet. Call indices follow declaration order, as they do in
	/// FRAME.
	pub fn with_pallet<'a>(
		mut self,
		pallet: &str,
		pallet_index: u8,
		calls: impl IntoIterator<Item = (&'a str, Vec<(&'a str, ParamType)>)>,
	) -> Self {
		for (call_index, (call, params)) in calls.into_iter().enumerate() {
			self.calls.insert(
				(pallet.to_owned(), call.to_owned()),
				CallDescriptor {
					pallet_index,
					call_index: call_index as u8,
					params: params.into_iter().map(|(name, ty)| (name.to_owned(), ty)).collect(),
				},
			);
		}
		self
	}

	pub fn descriptor(&self, pallet: &str, call: &str) -> Option<&CallDescriptor> {
		self.calls.get(&(pallet.to_owned(), call.to_owned()))
	}

	/// Parses textual arguments against the declared parameters of `pallet::call`.
	pub fn parse_call(
		&self,
		pallet: &str,
		call: &str,
		raw_args: &[String],
	) -> Result<CallSpec, EncodingError> {
		let descriptor = self.descriptor(pallet, call).ok_or_else(|| EncodingError::UnknownCall {
			pallet: pallet.to_owned(),
			call: call.to_owned(),
		})?;
		if descriptor.params.len() != raw_args.len() {
			return Err(EncodingError::ArityMismatch {
				call: format!("{pallet}::{call}"),
				expected: descriptor.params.len(),
				found: raw_args.len(),
			})
		}
		let args = descriptor
			.params
			.iter()
			.zip(raw_args)
			.map(|((_, param_type), raw)| ArgValue::parse(param_type, raw))
			.collect::<Result<Vec<_>, _>>()?;
		Ok(CallSpec::new(pallet, call, args))
	}

	/// The `Vaccine` and `Account` pallets of the vaccine chain runtime.
	pub fn vaccine_chain(vaccine_pallet_index: u8, account_pallet_index: u8) -> Self {
		let role = || {
			ParamType::Variant(
				["SYSMAN", "VM", "VAO", "VAD", "USER"].into_iter().map(String::from).collect(),
			)
		};
		let vac_id = || ("vac_id", ParamType::Optional(Box::new(ParamType::U32)));
		// Role ids are opaque byte strings, usually a UUID.
		let role_id = |name: &'static str| (name, ParamType::Bytes);

		Self::default()
			.with_pallet(
				"Vaccine",
				vaccine_pallet_index,
				[
					(
						"register_vac_info",
						vec![("vac_type_id", ParamType::Optional(Box::new(ParamType::U32)))],
					),
					("transfer_vaccine", vec![("buyer_id", ParamType::AccountId), vac_id()]),
					("receive_vaccine", vec![("sender", ParamType::AccountId), vac_id()]),
					("approve_vaccine", vec![vac_id()]),
					(
						"transfer_get_vaccine_right",
						vec![("user_id", ParamType::AccountId), vac_id()],
					),
					(
						"confirm_vaccine",
						vec![
							("vac_owner", ParamType::Optional(Box::new(ParamType::AccountId))),
							vac_id(),
						],
					),
				],
			)
			.with_pallet(
				"Account",
				account_pallet_index,
				[
					("approve_role", vec![role_id("system"), role_id("target")]),
					("register_account", vec![role_id("role_id"), ("role", role())]),
					("add_system", vec![role_id("system"), role_id("user")]),
					("remove_system", vec![role_id("system"), role_id("user")]),
				],
			)
	}
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
	#[error("Unknown call {pallet}::{call}")]
	UnknownCall { pallet: String, call: String },
	#[error("{call} takes {expected} arguments but {found} were supplied")]
	ArityMismatch { call: String, expected: usize, found: usize },
	#[error("Argument `{name}` of {call} expects {expected} but got {found}")]
	ArgumentMismatch { call: String, name: String, expected: ParamType, found: &'static str },
	#[error("Cannot parse `{raw}` as {expected}")]
	Unparsable { raw: String, expected: ParamType },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
	#[error(transparent)]
	Encoding(#[from] EncodingError),
	#[error(transparent)]
	Signing(#[from] SigningError),
}

/// Chain state a signed extrinsic is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainContext {
	pub nonce: Nonce,
	pub genesis_hash: H256,
	pub runtime_version: RuntimeVersion,
	/// The block the extrinsic's mortality is anchored at, usually the latest finalized block.
	pub checkpoint_block_hash: H256,
	pub checkpoint_block_number: BlockNumber,
	pub extrinsic_lifetime: BlockNumber,
}

/// An encoded, signed extrinsic. It can be submitted once; a resubmission needs a rebuild.
#[derive(Debug, PartialEq, Eq)]
pub struct SignedExtrinsic {
	encoded: Vec<u8>,
	tx_hash: H256,
	nonce: Nonce,
	lifetime: std::ops::RangeTo<BlockNumber>,
}

impl SignedExtrinsic {
	pub fn encoded(&self) -> &[u8] {
		&self.encoded
	}

	pub fn tx_hash(&self) -> H256 {
		self.tx_hash
	}

	pub fn nonce(&self) -> Nonce {
		self.nonce
	}

	/// Blocks in which the extrinsic may be included.
	pub fn lifetime(&self) -> std::ops::RangeTo<BlockNumber> {
		self.lifetime
	}

	pub fn into_encoded(self) -> Vec<u8> {
		self.encoded
	}
}

pub struct SignedCallBuilder<'a> {
	catalog: &'a CallCatalog,
}

impl<'a> SignedCallBuilder<'a> {
	pub fn new(catalog: &'a CallCatalog) -> Self {
		Self { catalog }
	}

	/// Checks the arguments against the declared parameters and returns the SCALE encoded call.
	pub fn encode_call(&self, call: &CallSpec) -> Result<Vec<u8>, EncodingError> {
		let descriptor = self.catalog.descriptor(call.pallet(), call.call()).ok_or_else(|| {
			EncodingError::UnknownCall { pallet: call.pallet.clone(), call: call.call.clone() }
		})?;

		if descriptor.params.len() != call.args.len() {
			return Err(EncodingError::ArityMismatch {
				call: call.to_string(),
				expected: descriptor.params.len(),
				found: call.args.len(),
			})
		}

		let mut encoded = vec![descriptor.pallet_index, descriptor.call_index];
		for ((name, param_type), arg) in descriptor.params.iter().zip(&call.args) {
			encode_arg(param_type, arg, &mut encoded).map_err(|found| {
				EncodingError::ArgumentMismatch {
					call: call.to_string(),
					name: name.clone(),
					expected: param_type.clone(),
					found,
				}
			})?;
		}
		Ok(encoded)
	}

	/// Returns a signed extrinsic that matches the provided call
	pub fn build<Signer: ExtrinsicSigner + ?Sized>(
		&self,
		call: &CallSpec,
		signer: &Signer,
		context: &ChainContext,
	) -> Result<SignedExtrinsic, BuildError> {
		let call_data = self.encode_call(call)?;

		let era = Era::mortal(
			context.extrinsic_lifetime as u64,
			context.checkpoint_block_number as u64,
		);
		let lifetime = ..era.death(context.checkpoint_block_number as u64) as BlockNumber;

		// (CheckMortality, CheckNonce, ChargeTransactionPayment). The tip is always zero.
		let extra = (era, Compact(context.nonce), Compact(0u128));
		let additional_signed = (
			context.runtime_version.spec_version,
			context.runtime_version.transaction_version,
			context.genesis_hash,
			context.checkpoint_block_hash,
		);

		let mut signing_payload = call_data.clone();
		extra.encode_to(&mut signing_payload);
		additional_signed.encode_to(&mut signing_payload);

		let signature = if signing_payload.len() > MAX_UNHASHED_SIGNING_PAYLOAD_LEN {
			signer.sign(&blake2_256(&signing_payload))
		} else {
			signer.sign(&signing_payload)
		}?;

		let mut body = vec![SIGNED_EXTRINSIC_VERSION];
		MultiAddress::<AccountId32, ()>::Id(signer.account_id()).encode_to(&mut body);
		signature.encode_to(&mut body);
		extra.encode_to(&mut body);
		body.extend_from_slice(&call_data);

		let encoded = body.encode();
		let tx_hash = H256::from(blake2_256(&encoded));

		Ok(SignedExtrinsic { encoded, tx_hash, nonce: context.nonce, lifetime })
	}
}

fn encode_arg(
	param_type: &ParamType,
	arg: &ArgValue,
	dest: &mut Vec<u8>,
) -> Result<(), &'static str> {
	match (param_type, arg) {
		(ParamType::Bool, ArgValue::Bool(value)) => value.encode_to(dest),
		(ParamType::U8, ArgValue::U8(value)) => value.encode_to(dest),
		(ParamType::U16, ArgValue::U16(value)) => value.encode_to(dest),
		(ParamType::U32, ArgValue::U32(value)) => value.encode_to(dest),
		(ParamType::U64, ArgValue::U64(value)) => value.encode_to(dest),
		(ParamType::U128, ArgValue::U128(value)) => value.encode_to(dest),
		(ParamType::Bytes, ArgValue::Bytes(value)) => value.encode_to(dest),
		(ParamType::Text, ArgValue::Text(value)) => value.as_bytes().encode_to(dest),
		(ParamType::AccountId, ArgValue::AccountId(value)) => value.encode_to(dest),
		(ParamType::Variant(variants), ArgValue::Variant(index))
			if (*index as usize) < variants.len() =>
			index.encode_to(dest),
		(ParamType::Optional(_), ArgValue::Optional(None)) => 0u8.encode_to(dest),
		(ParamType::Optional(inner), ArgValue::Optional(Some(value))) => {
			1u8.encode_to(dest);
			encode_arg(inner, value, dest)?;
		},
		(_, arg) => return Err(arg.kind()),
	}
	Ok(())
}
