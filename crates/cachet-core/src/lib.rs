//! Core services for the encrypted file-storage backend: accounts and
//! sessions, file and folder lifecycle with quota accounting, anonymous
//! shares, and the audit sink. The HTTP layer in `cachet-server` is a thin
//! translation over these managers.

pub mod audit;
pub mod auth;
pub mod cache;
pub mod error;
pub mod files;
pub mod folders;
pub mod ledger;
pub mod password;
pub mod sealed;
pub mod shares;
pub mod storage;
pub mod totp;

#[cfg(test)]
mod testutil;
