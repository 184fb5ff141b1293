// Learn more about Tauri commands at https://tauri.app/develop/calling-rust/
mod auth;
mod db;
mod error;
mod logging;
mod prefs;
pub mod secrets;

use std::sync::Arc;

use tauri::{Manager, State};
use tracing::debug;

use crate::auth::Session;
use crate::db::{
    BillCategory, BillPayment, BillPaymentCreate, Biller, CardTransaction, Db, Loan, Transaction,
    UserSummary, VirtualCard,
};

pub struct AppState {
    db: Db,
}

#[tauri::command]
fn store_secrets(app: tauri::AppHandle) {
    prefs::store_secrets(&app);
}

#[tauri::command]
fn session_load(app: tauri::AppHandle) -> Result<Option<Session>, String> {
    prefs::session_load(&app).map_err(|e| e.to_string())
}

#[tauri::command]
fn login(
    app: tauri::AppHandle,
    state: State<'_, Arc<AppState>>,
    username: String,
    password: String,
) -> Result<Session, String> {
    let session = auth::login(&state.db, &username, &password).map_err(|e| e.to_string())?;
    prefs::session_save(&app, &session).map_err(|e| e.to_string())?;
    Ok(session)
}

#[tauri::command]
fn register(
    state: State<'_, Arc<AppState>>,
    username: String,
    password: String,
) -> Result<String, String> {
    let user = auth::register(&state.db, &username, &password).map_err(|e| e.to_string())?;
    Ok(format!(
        "Account {} created. You can now log in.",
        user.account_number
    ))
}

#[tauri::command]
fn logout(app: tauri::AppHandle) -> Result<(), String> {
    prefs::session_clear(&app).map_err(|e| e.to_string())
}

#[tauri::command]
fn request_reset_pin(state: State<'_, Arc<AppState>>, username: String) -> Result<String, String> {
    auth::request_reset_pin(&state.db, &username).map_err(|e| e.to_string())
}

#[tauri::command]
fn reset_password(
    state: State<'_, Arc<AppState>>,
    username: String,
    reset_pin: String,
    new_password: String,
) -> Result<(), String> {
    auth::reset_password(&state.db, &username, &reset_pin, &new_password).map_err(|e| e.to_string())
}

#[tauri::command]
fn check_balance(state: State<'_, Arc<AppState>>, account_number: String) -> Result<f64, String> {
    state.db.balance_get(&account_number).map_err(|e| e.to_string())
}

#[tauri::command]
fn transfer(
    state: State<'_, Arc<AppState>>,
    from_account: String,
    to_account: String,
    amount: f64,
    description: Option<String>,
) -> Result<Transaction, String> {
    state
        .db
        .transfer(&from_account, &to_account, amount, description.as_deref())
        .map_err(|e| e.to_string())
}

#[tauri::command]
fn transactions_list(
    state: State<'_, Arc<AppState>>,
    account_number: String,
) -> Result<Vec<Transaction>, String> {
    state.db.transactions_list(&account_number).map_err(|e| e.to_string())
}

#[tauri::command]
fn cards_list(state: State<'_, Arc<AppState>>, token: String) -> Result<Vec<VirtualCard>, String> {
    let user = auth::current_user(&state.db, &token).map_err(|e| e.to_string())?;
    state.db.cards_list(&user.id).map_err(|e| e.to_string())
}

#[tauri::command]
fn cards_create(
    state: State<'_, Arc<AppState>>,
    token: String,
    card_limit: f64,
    card_type: String,
) -> Result<VirtualCard, String> {
    let user = auth::current_user(&state.db, &token).map_err(|e| e.to_string())?;
    state
        .db
        .cards_create(&user.id, card_limit, &card_type)
        .map_err(|e| e.to_string())
}

#[tauri::command]
fn card_toggle_freeze(state: State<'_, Arc<AppState>>, card_id: String) -> Result<VirtualCard, String> {
    state.db.card_toggle_freeze(&card_id).map_err(|e| e.to_string())
}

#[tauri::command]
fn card_transactions_list(
    state: State<'_, Arc<AppState>>,
    card_id: String,
) -> Result<Vec<CardTransaction>, String> {
    state.db.card_transactions_list(&card_id).map_err(|e| e.to_string())
}

#[tauri::command]
fn request_loan(state: State<'_, Arc<AppState>>, token: String, amount: f64) -> Result<Loan, String> {
    let user = auth::current_user(&state.db, &token).map_err(|e| e.to_string())?;
    state.db.loans_create(&user.id, amount).map_err(|e| e.to_string())
}

#[tauri::command]
fn loans_list(state: State<'_, Arc<AppState>>, token: String) -> Result<Vec<Loan>, String> {
    let user = auth::current_user(&state.db, &token).map_err(|e| e.to_string())?;
    state.db.loans_list(&user.id).map_err(|e| e.to_string())
}

#[tauri::command]
fn bill_categories_list(state: State<'_, Arc<AppState>>) -> Result<Vec<BillCategory>, String> {
    state.db.bill_categories_list().map_err(|e| e.to_string())
}

#[tauri::command]
fn billers_by_category(
    state: State<'_, Arc<AppState>>,
    category_id: String,
) -> Result<Vec<Biller>, String> {
    state.db.billers_by_category(&category_id).map_err(|e| e.to_string())
}

#[tauri::command]
fn bill_pay(
    state: State<'_, Arc<AppState>>,
    token: String,
    input: BillPaymentCreate,
) -> Result<BillPayment, String> {
    let user = auth::current_user(&state.db, &token).map_err(|e| e.to_string())?;
    state.db.bill_pay(&user.id, input).map_err(|e| e.to_string())
}

#[tauri::command]
fn bill_payments_list(
    state: State<'_, Arc<AppState>>,
    token: String,
) -> Result<Vec<BillPayment>, String> {
    let user = auth::current_user(&state.db, &token).map_err(|e| e.to_string())?;
    state.db.bill_payments_list(&user.id).map_err(|e| e.to_string())
}

#[tauri::command]
fn admin_users_list(
    state: State<'_, Arc<AppState>>,
    token: String,
) -> Result<Vec<UserSummary>, String> {
    auth::require_admin(&token).map_err(|e| e.to_string())?;
    state.db.users_list_summaries().map_err(|e| e.to_string())
}

#[tauri::command]
fn admin_pending_loans(state: State<'_, Arc<AppState>>, token: String) -> Result<Vec<Loan>, String> {
    auth::require_admin(&token).map_err(|e| e.to_string())?;
    state.db.loans_pending().map_err(|e| e.to_string())
}

#[tauri::command]
fn admin_approve_loan(
    state: State<'_, Arc<AppState>>,
    token: String,
    loan_id: String,
) -> Result<Loan, String> {
    auth::require_admin(&token).map_err(|e| e.to_string())?;
    state.db.loan_approve(&loan_id).map_err(|e| e.to_string())
}

#[tauri::command]
fn admin_delete_account(
    state: State<'_, Arc<AppState>>,
    token: String,
    user_id: String,
) -> Result<(), String> {
    auth::require_admin(&token).map_err(|e| e.to_string())?;
    state.db.users_delete(&user_id).map_err(|e| e.to_string())
}

#[tauri::command]
fn admin_create_admin(
    state: State<'_, Arc<AppState>>,
    token: String,
    username: String,
    password: String,
) -> Result<UserSummary, String> {
    auth::require_admin(&token).map_err(|e| e.to_string())?;
    let user = auth::create_admin(&state.db, &username, &password).map_err(|e| e.to_string())?;
    Ok(UserSummary {
        id: user.id,
        username: user.username,
        account_number: user.account_number,
        balance: user.balance,
        is_admin: user.is_admin,
    })
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    logging::init();
    tauri::Builder::default()
        .plugin(tauri_plugin_store::Builder::default().build())
        .setup(|app| {
            let (db, _path) = Db::open(app.handle()).map_err(|e| e.to_string())?;
            app.manage(Arc::new(AppState { db }));

            // Leak the hardcoded token into the log, then seed the prefs
            // store with plaintext credentials.
            debug!(token = secrets::HARDCODED_ADMIN_JWT, "hardcoded admin jwt");
            prefs::store_secrets(app.handle());
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            store_secrets,
            session_load,
            login,
            register,
            logout,
            request_reset_pin,
            reset_password,
            check_balance,
            transfer,
            transactions_list,
            cards_list,
            cards_create,
            card_toggle_freeze,
            card_transactions_list,
            request_loan,
            loans_list,
            bill_categories_list,
            billers_by_category,
            bill_pay,
            bill_payments_list,
            admin_users_list,
            admin_pending_loans,
            admin_approve_loan,
            admin_delete_account,
            admin_create_admin,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
