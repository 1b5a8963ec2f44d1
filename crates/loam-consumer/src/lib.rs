//! Durable-queue consumer for design-service leads.
//!
//! [`Consumer`] leases lead messages one at a time and hands them to the
//! [`LeadProcessor`], which logs, notifies, prints and files each lead. A
//! message is acknowledged only after every step succeeded; otherwise it is
//! released and the broker redelivers it.

pub mod csv;
pub mod error;
pub mod lead;
pub mod supervisor;

pub use error::{Error, Result};
pub use lead::{LeadProcessor, Settings, Step};
pub use supervisor::{Consumer, ConsumerSettings};
