//! Registration, login, and the session tokens behind them.
//!
//! Passwords are stored and compared in plaintext, tokens are signed with a
//! constant from `secrets`, and claims are read back without verifying the
//! signature. Each of those is a lesson, not an accident.

use base64::Engine as _;
use jsonwebtoken::{encode, EncodingKey, Header as JwtHeader};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{self, Db, User};
use crate::error::BankError;
use crate::secrets;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub username: String,
    pub account_number: String,
    pub is_admin: bool,
    pub token: String,
}

/// Claims carried by tokens issued at login.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    pub is_admin: bool,
    pub iat: i64,
}

/// Claims as read back from a presented token. The payload is decoded
/// directly; the signature is never checked.
#[derive(Debug, Default, Deserialize)]
pub struct UnverifiedClaims {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Starting balance for self-registered demo accounts.
const WELCOME_BALANCE: f64 = 1000.0;

pub fn register(db: &Db, username: &str, password: &str) -> Result<User, BankError> {
    create_user(db, username, password, false)
}

/// Create a user that passes the admin gate. Only reachable through the
/// admin command surface.
pub fn create_admin(db: &Db, username: &str, password: &str) -> Result<User, BankError> {
    create_user(db, username, password, true)
}

fn create_user(db: &Db, username: &str, password: &str, is_admin: bool) -> Result<User, BankError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(BankError::BadCredentials);
    }
    if password.len() < 8 {
        return Err(BankError::WeakPassword);
    }
    if db.users_find_by_username(username)?.is_some() {
        return Err(BankError::UsernameTaken);
    }

    let account_number = generate_account_number();
    let user = db.users_create(username, password, &account_number, WELCOME_BALANCE, is_admin)?;
    info!(username, account_number = %account_number, is_admin, "user registered");
    Ok(user)
}

pub fn login(db: &Db, username: &str, password: &str) -> Result<Session, BankError> {
    let user = db
        .users_find_by_username(username.trim())?
        .ok_or(BankError::BadCredentials)?;

    // Plaintext comparison against the stored password.
    if user.password != password {
        warn!(username, "failed login attempt");
        return Err(BankError::BadCredentials);
    }

    let token = issue_token(&user)?;
    info!(username = %user.username, account_number = %user.account_number, "login ok");
    Ok(Session {
        username: user.username,
        account_number: user.account_number,
        is_admin: user.is_admin,
        token,
    })
}

pub fn issue_token(user: &User) -> Result<String, BankError> {
    let claims = Claims {
        user_id: user.id.clone(),
        username: user.username.clone(),
        is_admin: user.is_admin,
        iat: db::now_epoch_secs(),
    };
    let token = encode(
        &JwtHeader::default(),
        &claims,
        &EncodingKey::from_secret(secrets::JWT_SECRET.as_bytes()),
    )?;
    Ok(token)
}

/// Decode a token's payload segment without verifying its signature.
///
/// Any well-formed token works here, including the hardcoded admin one.
pub fn peek_claims(token: &str) -> Option<UnverifiedClaims> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Resolve the user a presented token claims to be.
pub fn current_user(db: &Db, token: &str) -> Result<User, BankError> {
    let claims = peek_claims(token).ok_or(BankError::Unauthorized)?;
    db.users_find_by_username(&claims.username)?
        .ok_or(BankError::Unauthorized)
}

/// Gate for admin commands: trusts the `is_admin` claim as presented.
pub fn require_admin(token: &str) -> Result<UnverifiedClaims, BankError> {
    let claims = peek_claims(token).ok_or(BankError::Unauthorized)?;
    if !claims.is_admin {
        return Err(BankError::AdminRequired);
    }
    Ok(claims)
}

pub fn request_reset_pin(db: &Db, username: &str) -> Result<String, BankError> {
    let user = db
        .users_find_by_username(username.trim())?
        .ok_or(BankError::NotFound("user"))?;

    let pin = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
    db.users_set_reset_pin(&user.id, Some(&pin))?;
    info!(username = %user.username, "reset PIN issued");
    // Returned straight to the caller; there is no mail delivery in the demo.
    Ok(pin)
}

pub fn reset_password(
    db: &Db,
    username: &str,
    reset_pin: &str,
    new_password: &str,
) -> Result<(), BankError> {
    let user = db
        .users_find_by_username(username.trim())?
        .ok_or(BankError::NotFound("user"))?;

    if user.reset_pin.as_deref() != Some(reset_pin) {
        return Err(BankError::BadResetPin);
    }
    if new_password.len() < 8 {
        return Err(BankError::WeakPassword);
    }

    db.users_set_password(&user.id, new_password)?;
    db.users_set_reset_pin(&user.id, None)?;
    info!(username = %user.username, "password reset");
    Ok(())
}

fn generate_account_number() -> String {
    format!("ACC{:08}", rand::thread_rng().gen_range(0..100_000_000u32))
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    use super::*;
    use crate::db::testutil::open_db;

    fn lenient_validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        validation
    }

    #[test]
    fn register_then_login_round_trips() {
        let (db, _dir) = open_db();
        register(&db, "carol", "hunter2hunter2").expect("register");

        let session = login(&db, "carol", "hunter2hunter2").expect("login");
        assert_eq!(session.username, "carol");
        assert!(session.account_number.starts_with("ACC"));
        assert!(!session.is_admin);
        assert!(!session.token.is_empty());
    }

    #[test]
    fn login_rejects_wrong_password_and_unknown_user() {
        let (db, _dir) = open_db();
        register(&db, "carol", "hunter2hunter2").expect("register");

        assert!(matches!(
            login(&db, "carol", "wrong"),
            Err(BankError::BadCredentials)
        ));
        assert!(matches!(
            login(&db, "nobody", "whatever"),
            Err(BankError::BadCredentials)
        ));
    }

    #[test]
    fn register_rejects_duplicates_and_weak_passwords() {
        let (db, _dir) = open_db();

        // The admin account is seeded at open.
        assert!(matches!(
            register(&db, "admin", "longenough123"),
            Err(BankError::UsernameTaken)
        ));
        assert!(matches!(
            register(&db, "dave", "short"),
            Err(BankError::WeakPassword)
        ));
    }

    #[test]
    fn issued_token_decodes_with_the_hardcoded_secret() {
        let (db, _dir) = open_db();
        let user = register(&db, "carol", "hunter2hunter2").expect("register");
        let token = issue_token(&user).expect("token");

        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secrets::JWT_SECRET.as_bytes()),
            &lenient_validation(),
        )
        .expect("decode");
        assert_eq!(decoded.claims.username, "carol");
        assert_eq!(decoded.claims.user_id, user.id);
        assert!(!decoded.claims.is_admin);
        assert!(decoded.claims.iat > 0);
    }

    #[test]
    fn peek_reads_claims_without_any_key() {
        let (db, _dir) = open_db();
        let session = login(&db, "admin", "admin123").expect("admin login");

        let claims = peek_claims(&session.token).expect("peek");
        assert_eq!(claims.username, "admin");
        assert!(claims.is_admin);
    }

    #[test]
    fn hardcoded_admin_token_passes_the_admin_gate() {
        let claims = require_admin(secrets::HARDCODED_ADMIN_JWT).expect("admin gate");
        assert_eq!(claims.username, "admin");

        let (db, _dir) = open_db();
        let user = register(&db, "carol", "hunter2hunter2").expect("register");
        let token = issue_token(&user).expect("token");
        assert!(matches!(
            require_admin(&token),
            Err(BankError::AdminRequired)
        ));
        assert!(matches!(
            require_admin("not-a-token"),
            Err(BankError::Unauthorized)
        ));
    }

    #[test]
    fn reset_pin_flow_changes_the_password() {
        let (db, _dir) = open_db();
        register(&db, "carol", "hunter2hunter2").expect("register");

        let pin = request_reset_pin(&db, "carol").expect("pin");
        assert_eq!(pin.len(), 6);

        let wrong_pin = if pin == "000000" { "000001" } else { "000000" };
        assert!(matches!(
            reset_password(&db, "carol", wrong_pin, "newpassword1"),
            Err(BankError::BadResetPin)
        ));

        reset_password(&db, "carol", &pin, "newpassword1").expect("reset");
        assert!(matches!(
            login(&db, "carol", "hunter2hunter2"),
            Err(BankError::BadCredentials)
        ));
        login(&db, "carol", "newpassword1").expect("login with new password");

        // The PIN is single-use.
        assert!(matches!(
            reset_password(&db, "carol", &pin, "anotherpass1"),
            Err(BankError::BadResetPin)
        ));
    }
}
