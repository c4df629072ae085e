//! Transaction-visibility tracking for snapshot cutover.
//!
//! A bulk-loaded snapshot is taken at an arbitrary point inside an actively
//! mutating source database. The [`window::TransactionWindow`] published with a
//! completed snapshot records exactly which transactions that snapshot already
//! reflects, and [`catchup::CatchupProgress`] tracks when the live stream has
//! advanced far enough that the window can be discarded.

pub mod catchup;
pub mod window;

pub use catchup::CatchupProgress;
pub use window::{TransactionWindow, TxId};
