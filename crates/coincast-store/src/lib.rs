//! # coincast-store
//!
//! The ledger store and settlement engine: the sole holder of mutable
//! business state (users, streams, transactions, chat, join sessions).
//!
//! Everything lives in keyed in-memory maps behind a single `RwLock`.
//! There are no multi-record transactions; instead, every multi-step
//! mutation the settlement engine performs runs inside one continuously
//! held write guard, so it is atomic as observed by any other task.

pub mod ledger;
pub mod models;
pub mod settlement;

mod error;

pub use error::{Result, StoreError};
pub use ledger::{Ledger, NewStream, StreamFilter};
pub use models::*;
pub use settlement::{JoinReceipt, SettlementEngine};
