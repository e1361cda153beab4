//! Shared protocol infrastructure the drivers build on.
//!
//! - [`expectations`] - the ordered match-and-consume table a message
//!   codec dispatches incoming messages through
//! - [`codec`] - the per-protocol [`Codec`](codec::Codec) contract and
//!   the reader-fiber worker loop
//! - [`transaction`] - the bounded per-connection transaction scheduler

pub mod codec;
pub mod expectations;
pub mod transaction;

pub use codec::{send_request, start_worker, Codec, CodecWorker};
pub use expectations::{ExpectationHandle, ExpectationManager};
pub use transaction::{RequestTransactionManager, TransactionHandle};
