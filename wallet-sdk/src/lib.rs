//! Shared wire objects and clients for the currency-wallet platform.
//!
//! This crate holds everything that crosses a process boundary:
//!
//! - [`objects`] - currencies, transfer kinds, and the JSON payload of a
//!   `large-transfers` log record
//! - [`rpc`] - the binary-framed request/response protocol of the
//!   exchange-rate service
//! - [`client`] - the [`RateClient`](client::RateClient) used by the wallet
//!   service to talk to the exchange-rate service
//! - [`shutdown`] - the signal wait both service binaries block on

pub mod client;
pub mod objects;
pub mod rpc;
pub mod shutdown;
