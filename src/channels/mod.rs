//! Mailbox sources. All access is read-only.

pub mod gmail;
pub mod imap;

pub use gmail::{GmailConfig, GmailSource};
pub use imap::{ImapConfig, ImapSource};
