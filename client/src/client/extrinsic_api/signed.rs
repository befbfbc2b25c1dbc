pub mod call_builder;
pub mod lifecycle;
pub mod signer;
pub mod submission_watcher;
