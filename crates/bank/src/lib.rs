//! Bank account bounded context (event-sourced).
//!
//! A small example event producer for the kernel: deterministic domain
//! logic only (no IO, no storage).

pub mod account;
pub mod events;

pub use account::{Account, AccountState};
pub use events::{
    AccountClosed, AccountOpened, AmountAdded, AmountWithdrawn, BankEvent, bank_registry,
    register_events,
};
