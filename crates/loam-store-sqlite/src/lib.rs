//! SQLite-backed data access for the loam hub.
//!
//! Two stores share one access layer: the POS store, which belongs to the
//! point-of-sale software and is read for catalog, customer, promotion and
//! document state, and the middleware store, which this system owns and which
//! maps POS identifiers to storefront identifiers. The durable lead queue
//! lives here as well.

mod encode;
mod schema;

pub mod dal;
pub mod error;
pub mod middleware;
pub mod pos;
pub mod queue;
pub mod records;

pub use dal::{Dal, QueryBuilder};
pub use error::{Error, Result};
pub use middleware::MiddlewareDb;
pub use pos::PosDb;
pub use queue::SqliteQueue;
pub use records::{SmsDirection, SmsRecord, StockRequest};

#[cfg(test)]
mod tests;
