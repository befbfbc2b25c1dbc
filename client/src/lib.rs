pub mod client;
pub mod constants;
pub mod driver;
pub mod logging;
pub mod settings;
