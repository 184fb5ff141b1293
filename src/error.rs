//! Error types for the VulnBank core.
//!
//! Internally everything is a typed [`BankError`]; the `#[tauri::command]`
//! layer flattens it to a `String` for the frontend.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BankError {
    #[error("invalid username or password")]
    BadCredentials,

    #[error("a valid session token is required")]
    Unauthorized,

    #[error("admin privileges required")]
    AdminRequired,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("username is already taken")]
    UsernameTaken,

    #[error("password must be at least 8 characters")]
    WeakPassword,

    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("card is frozen")]
    CardFrozen,

    #[error("amount is outside the biller's allowed range")]
    AmountOutOfRange,

    #[error("invalid or expired reset PIN")]
    BadResetPin,

    #[error("loan is not pending")]
    LoanNotPending,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("store error: {0}")]
    Store(#[from] tauri_plugin_store::Error),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}
