pub mod chain;
pub mod derivative;
pub mod message;
pub mod position;
pub mod quote;
pub(crate) mod serde_str;
