//! Presence ledger: cross-process connection counts and the published
//! presence record of each user.

mod ledger;

pub use ledger::{
    LedgerError, LedgerResult, MemoryPresenceLedger, PresenceLedger, RedisPresenceLedger,
};
