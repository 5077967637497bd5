//! Row types and database commands of the wallet store.
//!
//! Commands follow the processor pattern: each query or mutation is a
//! small command struct handled through
//! [`Processor`](crate::framework::Processor). Single-statement commands
//! are generic over [`DatabaseAccessor`](crate::framework::DatabaseAccessor)
//! and run against either the pool or an open transaction; commands that
//! span multiple statements own their transaction and are implemented for
//! the pool-backed processor only.

pub mod balances;
pub mod transactions;
pub mod users;
