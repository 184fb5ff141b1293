//! App-scoped persistent key-value stores.
//!
//! Two named JSON stores live under the app data directory: `VulnBankPrefs`,
//! seeded with plaintext credentials at startup, and the session store that
//! carries the logged-in user between launches. Neither is encrypted; both
//! are part of the demonstration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tauri::{AppHandle, Runtime};
use tauri_plugin_store::{Store, StoreBuilder, StoreExt};
use tracing::{debug, warn};

use crate::auth::Session;
use crate::error::BankError;

pub const PREFS_STORE: &str = "VulnBankPrefs.json";
pub const SESSION_STORE: &str = "VulnBankSession.json";

/// Writes are committed by a debounced background save; callers return
/// before anything reaches disk.
const AUTO_SAVE_DEBOUNCE: Duration = Duration::from_millis(100);

const SESSION_KEYS: [&str; 4] = ["jwt_token", "username", "account_number", "is_admin"];

/// Seed the `VulnBankPrefs` store with plaintext credentials.
///
/// No result is surfaced to the caller: a store that cannot be opened is
/// logged and skipped, and the write itself is fire-and-forget.
pub fn store_secrets<R: Runtime>(app: &AppHandle<R>) {
    write_secret_prefs(app, PREFS_STORE);
}

/// Open the store at `path`, reusing the loaded instance if there is one.
fn obtain_store<R: Runtime>(
    app: &AppHandle<R>,
    path: impl AsRef<Path>,
) -> Result<Arc<Store<R>>, tauri_plugin_store::Error> {
    if let Some(store) = app.get_store(&path) {
        return Ok(store);
    }
    StoreBuilder::new(app, path)
        .auto_save(AUTO_SAVE_DEBOUNCE)
        .build()
}

fn write_secret_prefs<R: Runtime>(
    app: &AppHandle<R>,
    path: impl AsRef<Path>,
) -> Option<Arc<Store<R>>> {
    let store = match obtain_store(app, path) {
        Ok(store) => store,
        Err(e) => {
            // Swallowing this is intentional, but at least leave a trace.
            warn!("prefs store unavailable, secrets not written: {e}");
            return None;
        }
    };

    store.set("username", "admin");
    store.set("password", "admin123");
    store.set("balance", "$999999");
    store.set("debug_flag", "FLAG{HardcodedSecretsAreBad}");
    debug!("seeded plaintext credential entries into the prefs store");

    Some(store)
}

pub fn session_save<R: Runtime>(app: &AppHandle<R>, session: &Session) -> Result<(), BankError> {
    session_save_at(app, SESSION_STORE, session)
}

pub fn session_load<R: Runtime>(app: &AppHandle<R>) -> Result<Option<Session>, BankError> {
    session_load_at(app, SESSION_STORE)
}

pub fn session_clear<R: Runtime>(app: &AppHandle<R>) -> Result<(), BankError> {
    session_clear_at(app, SESSION_STORE)
}

fn session_save_at<R: Runtime>(
    app: &AppHandle<R>,
    path: impl AsRef<Path>,
    session: &Session,
) -> Result<(), BankError> {
    let store = obtain_store(app, path)?;
    store.set("jwt_token", session.token.clone());
    store.set("username", session.username.clone());
    store.set("account_number", session.account_number.clone());
    // Booleans are stored in string form, and trusted in string form on load.
    store.set("is_admin", if session.is_admin { "true" } else { "false" });
    store.save()?;
    Ok(())
}

fn session_load_at<R: Runtime>(
    app: &AppHandle<R>,
    path: impl AsRef<Path>,
) -> Result<Option<Session>, BankError> {
    let store = obtain_store(app, path)?;

    let get_str = |key: &str| -> Option<String> {
        store.get(key).and_then(|v| v.as_str().map(String::from))
    };

    let (Some(token), Some(username), Some(account_number)) = (
        get_str("jwt_token"),
        get_str("username"),
        get_str("account_number"),
    ) else {
        return Ok(None);
    };

    // Whatever is on disk wins; the token is not re-validated here.
    let is_admin = get_str("is_admin").as_deref() == Some("true");

    Ok(Some(Session {
        username,
        account_number,
        is_admin,
        token,
    }))
}

fn session_clear_at<R: Runtime>(
    app: &AppHandle<R>,
    path: impl AsRef<Path>,
) -> Result<(), BankError> {
    let store = obtain_store(app, path)?;
    for key in SESSION_KEYS {
        store.delete(key);
    }
    store.save()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_app() -> tauri::App<tauri::test::MockRuntime> {
        tauri::test::mock_builder()
            .plugin(tauri_plugin_store::Builder::default().build())
            .build(tauri::test::mock_context(tauri::test::noop_assets()))
            .expect("mock app")
    }

    #[test]
    fn writes_exactly_the_four_seeded_pairs() {
        let app = mock_app();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(PREFS_STORE);

        let store = write_secret_prefs(app.handle(), &path).expect("store");

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["balance", "debug_flag", "password", "username"]);

        let get = |key: &str| {
            store
                .get(key)
                .and_then(|v| v.as_str().map(String::from))
                .expect("string entry")
        };
        assert_eq!(get("username"), "admin");
        assert_eq!(get("password"), "admin123");
        assert_eq!(get("balance"), "$999999");
        assert_eq!(get("debug_flag"), "FLAG{HardcodedSecretsAreBad}");
    }

    #[test]
    fn seeding_twice_leaves_the_same_values() {
        let app = mock_app();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(PREFS_STORE);

        write_secret_prefs(app.handle(), &path).expect("first write");
        let store = write_secret_prefs(app.handle(), &path).expect("second write");

        assert_eq!(store.keys().len(), 4);
        assert_eq!(
            store.get("debug_flag").and_then(|v| v.as_str().map(String::from)),
            Some("FLAG{HardcodedSecretsAreBad}".to_string())
        );
    }

    #[test]
    fn session_round_trips_and_clears() {
        let app = mock_app();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SESSION_STORE);

        let session = Session {
            username: "alice".into(),
            account_number: "ACC10000001".into(),
            is_admin: false,
            token: "header.payload.sig".into(),
        };
        session_save_at(app.handle(), &path, &session).expect("save");

        let loaded = session_load_at(app.handle(), &path)
            .expect("load")
            .expect("session present");
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.account_number, "ACC10000001");
        assert!(!loaded.is_admin);
        assert_eq!(loaded.token, "header.payload.sig");

        session_clear_at(app.handle(), &path).expect("clear");
        assert!(session_load_at(app.handle(), &path).expect("load").is_none());
    }

    #[test]
    fn session_trusts_the_stored_admin_string() {
        let app = mock_app();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SESSION_STORE);

        let session = Session {
            username: "mallory".into(),
            account_number: "ACC99999999".into(),
            is_admin: false,
            token: "t".into(),
        };
        session_save_at(app.handle(), &path, &session).expect("save");

        // Flip the flag the way a local attacker editing the file would.
        let store = obtain_store(app.handle(), &path).expect("store");
        store.set("is_admin", "true");

        let loaded = session_load_at(app.handle(), &path)
            .expect("load")
            .expect("session present");
        assert!(loaded.is_admin);
    }
}
