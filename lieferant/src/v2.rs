pub mod client;
pub mod domain;
pub mod token;
pub mod transport;
