use std::time::Duration;

// ======= State chain client =======

/// Number of times an extrinsic is rebuilt after the node rejected it for a stale nonce or a bad
/// proof.
pub const MAX_EXTRINSIC_RETRY_ATTEMPTS: u32 = 10;

/// Mortality of signed extrinsics, in blocks.
pub const SIGNED_EXTRINSIC_LIFETIME: u32 = 128;

/// Signing payloads longer than this are hashed before being signed.
pub const MAX_UNHASHED_SIGNING_PAYLOAD_LEN: usize = 256;

/// Extrinsic format version 4 with the "signed" bit set.
pub const SIGNED_EXTRINSIC_VERSION: u8 = 0b1000_0000 | 4;

// ======= Submission tracking =======

pub const DEFAULT_FINALITY_TIMEOUT: Duration = Duration::from_secs(120);

pub const DEFAULT_STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(15);

// ======= Settings environment variables =======

pub const CONFIG_ROOT: &str = "VACCINE";

pub const SECRET_PHRASE_ENV: &str = "VACCINE_SECRET_PHRASE";
