pub mod entities;
pub mod interfaces;
pub mod sqlite;

pub use interfaces::{
    Fill, HistoryEntry, Holding, LedgerStore, Settlement, StoreError, User, UserId,
};
pub use sqlite::SqliteLedgerStore;
