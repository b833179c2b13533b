pub mod callable;
pub mod error;
pub mod fanout;
pub mod identity;
pub mod notifications;
pub mod push;
pub mod registry;
pub mod sweeper;
pub mod triggers;

pub use error::RelayError;

#[cfg(test)]
pub(crate) mod test_support;
