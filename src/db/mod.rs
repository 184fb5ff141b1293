use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Datelike;
use rand::Rng;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tauri::Manager;
use tracing::info;
use uuid::Uuid;

use crate::error::BankError;

#[derive(Clone, Debug)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password: String,
    pub account_number: String,
    pub balance: f64,
    pub is_admin: bool,
    pub reset_pin: Option<String>,
}

/// Shape returned to the admin user list. The password column stays behind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub account_number: String,
    pub balance: f64,
    pub is_admin: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: f64,
    pub description: Option<String>,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualCard {
    pub id: String,
    pub user_id: String,
    pub card_number: String,
    pub cvv: String,
    pub expiry_date: String,
    pub card_type: String,
    pub limit: f64,
    pub balance: f64,
    pub is_frozen: bool,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTransaction {
    pub id: String,
    pub card_id: String,
    pub amount: f64,
    pub description: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    pub status: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillCategory {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Biller {
    pub id: String,
    pub category_id: String,
    pub name: String,
    pub minimum_amount: f64,
    pub maximum_amount: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillPayment {
    pub id: String,
    pub amount: f64,
    pub status: String,
    pub reference: String,
    pub biller_name: String,
    pub category_name: String,
    pub payment_method: String,
    pub card_number: Option<String>,
    pub description: Option<String>,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillPaymentCreate {
    pub biller_id: String,
    pub amount: f64,
    pub payment_method: String,
    pub card_id: Option<String>,
    pub description: Option<String>,
}

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(app: &tauri::AppHandle) -> rusqlite::Result<(Self, PathBuf)> {
        let dir = app.path().app_data_dir().map_err(|e| {
            rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                e.to_string(),
            )))
        })?;
        std::fs::create_dir_all(&dir).map_err(|e| {
            rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                e.to_string(),
            )))
        })?;

        let path = dir.join("vulnbank.db");
        let db = Self::open_at(&path)?;
        info!(path = %path.display(), "bank database opened");
        Ok((db, path))
    }

    pub fn open_at(path: &std::path::Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        db.maybe_seed_admin()?;
        db.maybe_seed_billing()?;
        // Extra demo accounts only in debug builds.
        #[cfg(debug_assertions)]
        db.maybe_seed_demo_users()?;
        Ok(db)
    }

    fn migrate(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        conn.execute_batch(
            r#"
            create table if not exists users (
              id text primary key,
              username text not null unique,
              password text not null,
              account_number text not null unique,
              balance real not null,
              is_admin integer not null default 0,
              reset_pin text null,
              created_at integer not null
            );

            create table if not exists transactions (
              id text primary key,
              from_account text not null,
              to_account text not null,
              amount real not null,
              description text null,
              created_at integer not null
            );

            create table if not exists virtual_cards (
              id text primary key,
              user_id text not null references users(id) on delete cascade,
              card_number text not null,
              cvv text not null,
              expiry_date text not null,
              card_type text not null,
              card_limit real not null,
              balance real not null,
              is_frozen integer not null default 0,
              created_at integer not null
            );

            create table if not exists card_transactions (
              id text primary key,
              card_id text not null references virtual_cards(id) on delete cascade,
              amount real not null,
              description text not null,
              created_at integer not null
            );

            create table if not exists loans (
              id text primary key,
              user_id text not null references users(id) on delete cascade,
              amount real not null,
              status text not null default 'pending',
              created_at integer not null
            );

            create table if not exists bill_categories (
              id text primary key,
              name text not null,
              description text not null
            );

            create table if not exists billers (
              id text primary key,
              category_id text not null references bill_categories(id),
              name text not null,
              minimum_amount real not null,
              maximum_amount real null
            );

            create table if not exists bill_payments (
              id text primary key,
              user_id text not null,
              biller_id text not null references billers(id),
              amount real not null,
              status text not null,
              reference text not null,
              payment_method text not null,
              card_id text null,
              description text null,
              created_at integer not null
            );
            "#,
        )?;
        Ok(())
    }

    /// The well-known demo admin. Username and password match the plaintext
    /// pair seeded into the prefs store.
    fn maybe_seed_admin(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let count: i64 = conn.query_row("select count(1) from users", [], |r| r.get(0))?;
        if count > 0 {
            return Ok(());
        }

        conn.execute(
            "insert into users (id, username, password, account_number, balance, is_admin, reset_pin, created_at)\n             values (?1, 'admin', 'admin123', 'ADMIN001', 999999.0, 1, null, ?2)",
            params![Uuid::new_v4().to_string(), now_epoch_secs()],
        )?;
        Ok(())
    }

    fn maybe_seed_billing(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let count: i64 = conn.query_row("select count(1) from bill_categories", [], |r| r.get(0))?;
        if count > 0 {
            return Ok(());
        }

        let categories = [
            ("Utilities", "Electricity, water, and gas"),
            ("Telecom", "Mobile, internet, and TV"),
            ("Entertainment", "Streaming subscriptions"),
        ];
        let billers: [(&str, &str, f64, Option<f64>); 5] = [
            ("Utilities", "City Power & Light", 10.0, Some(5000.0)),
            ("Utilities", "Metro Water", 5.0, Some(1000.0)),
            ("Telecom", "ConnectNet ISP", 20.0, Some(300.0)),
            ("Telecom", "AirWave Mobile", 10.0, Some(200.0)),
            ("Entertainment", "StreamFlix", 5.0, Some(50.0)),
        ];

        let mut ids = std::collections::HashMap::new();
        for (name, description) in categories {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "insert into bill_categories (id, name, description) values (?1, ?2, ?3)",
                params![id, name, description],
            )?;
            ids.insert(name, id);
        }
        for (category, name, min, max) in billers {
            conn.execute(
                "insert into billers (id, category_id, name, minimum_amount, maximum_amount) values (?1, ?2, ?3, ?4, ?5)",
                params![Uuid::new_v4().to_string(), ids[category], name, min, max],
            )?;
        }
        Ok(())
    }

    #[cfg(debug_assertions)]
    fn maybe_seed_demo_users(&self) -> rusqlite::Result<()> {
        if self.users_find_by_username("alice")?.is_some() {
            return Ok(());
        }

        let alice = self.users_create("alice", "password123", "ACC10000001", 5000.0, false)?;
        self.users_create("bob", "letmein99", "ACC10000002", 1250.5, false)?;

        {
            let conn = self.conn.lock().expect("poisoned sqlite lock");
            conn.execute(
                "insert into transactions (id, from_account, to_account, amount, description, created_at)\n                 values (?1, 'ADMIN001', 'ACC10000001', 250.0, 'Welcome bonus', ?2)",
                params![Uuid::new_v4().to_string(), now_epoch_secs()],
            )?;
        }

        let card = self
            .cards_create(&alice.id, 500.0, "standard")
            .map_err(|e| match e {
                BankError::Db(e) => e,
                _ => rusqlite::Error::InvalidQuery,
            })?;
        let spends = [("Coffee Corner", 4.5), ("Metro Transit", 2.75), ("Book Nook", 18.0)];
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        for (merchant, amount) in spends {
            conn.execute(
                "insert into card_transactions (id, card_id, amount, description, created_at) values (?1, ?2, ?3, ?4, ?5)",
                params![Uuid::new_v4().to_string(), card.id, amount, merchant, now_epoch_secs()],
            )?;
        }
        Ok(())
    }

    const USER_COLUMNS: &'static str =
        "id, username, password, account_number, balance, is_admin, reset_pin, created_at";

    fn user_from_row(r: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: r.get(0)?,
            username: r.get(1)?,
            password: r.get(2)?,
            account_number: r.get(3)?,
            balance: r.get(4)?,
            is_admin: r.get::<_, i64>(5)? != 0,
            reset_pin: r.get(6)?,
        })
    }

    pub fn users_create(
        &self,
        username: &str,
        password: &str,
        account_number: &str,
        balance: f64,
        is_admin: bool,
    ) -> rusqlite::Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password: password.to_string(),
            account_number: account_number.to_string(),
            balance,
            is_admin,
            reset_pin: None,
        };

        let conn = self.conn.lock().expect("poisoned sqlite lock");
        conn.execute(
            "insert into users (id, username, password, account_number, balance, is_admin, reset_pin, created_at)\n             values (?1, ?2, ?3, ?4, ?5, ?6, null, ?7)",
            params![
                user.id,
                user.username,
                user.password,
                user.account_number,
                user.balance,
                if user.is_admin { 1i64 } else { 0i64 },
                now_epoch_secs()
            ],
        )?;
        Ok(user)
    }

    pub fn users_find_by_username(&self, username: &str) -> rusqlite::Result<Option<User>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(&format!(
            "select {} from users where username = ?1",
            Self::USER_COLUMNS
        ))?;
        let mut rows = stmt.query(params![username])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(Self::user_from_row(row)?));
        }
        Ok(None)
    }

    pub fn users_find_by_account(&self, account_number: &str) -> rusqlite::Result<Option<User>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(&format!(
            "select {} from users where account_number = ?1",
            Self::USER_COLUMNS
        ))?;
        let mut rows = stmt.query(params![account_number])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(Self::user_from_row(row)?));
        }
        Ok(None)
    }

    pub fn users_list_summaries(&self) -> rusqlite::Result<Vec<UserSummary>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(
            "select id, username, account_number, balance, is_admin from users order by created_at asc, username asc",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(UserSummary {
                id: r.get(0)?,
                username: r.get(1)?,
                account_number: r.get(2)?,
                balance: r.get(3)?,
                is_admin: r.get::<_, i64>(4)? != 0,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn users_delete(&self, id: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        conn.execute("delete from users where id = ?1", params![id])?;
        Ok(())
    }

    pub fn users_set_password(&self, id: &str, password: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        conn.execute(
            "update users set password = ?2 where id = ?1",
            params![id, password],
        )?;
        Ok(())
    }

    pub fn users_set_reset_pin(&self, id: &str, pin: Option<&str>) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        conn.execute(
            "update users set reset_pin = ?2 where id = ?1",
            params![id, pin],
        )?;
        Ok(())
    }

    pub fn balance_get(&self, account_number: &str) -> Result<f64, BankError> {
        self.users_find_by_account(account_number)?
            .map(|u| u.balance)
            .ok_or(BankError::NotFound("account"))
    }

    /// Move funds between two accounts and record the transaction.
    ///
    /// There is no check that the caller owns the source account.
    pub fn transfer(
        &self,
        from_account: &str,
        to_account: &str,
        amount: f64,
        description: Option<&str>,
    ) -> Result<Transaction, BankError> {
        if !(amount > 0.0) {
            return Err(BankError::InvalidAmount);
        }

        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let tx = conn.unchecked_transaction()?;

        let from_balance = {
            let mut stmt = tx.prepare("select balance from users where account_number = ?1")?;
            let mut rows = stmt.query(params![from_account])?;
            match rows.next()? {
                Some(row) => row.get::<_, f64>(0)?,
                None => return Err(BankError::NotFound("account")),
            }
        };
        let to_exists = {
            let mut stmt = tx.prepare("select 1 from users where account_number = ?1")?;
            let mut rows = stmt.query(params![to_account])?;
            rows.next()?.is_some()
        };
        if !to_exists {
            return Err(BankError::NotFound("account"));
        }
        if from_balance < amount {
            return Err(BankError::InsufficientFunds);
        }

        tx.execute(
            "update users set balance = balance - ?2 where account_number = ?1",
            params![from_account, amount],
        )?;
        tx.execute(
            "update users set balance = balance + ?2 where account_number = ?1",
            params![to_account, amount],
        )?;

        let record = Transaction {
            id: Uuid::new_v4().to_string(),
            from_account: from_account.to_string(),
            to_account: to_account.to_string(),
            amount,
            description: description.map(String::from),
            created_at: now_epoch_secs(),
        };
        tx.execute(
            "insert into transactions (id, from_account, to_account, amount, description, created_at)\n             values (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.from_account,
                record.to_account,
                record.amount,
                record.description,
                record.created_at
            ],
        )?;
        tx.commit()?;

        info!(from = from_account, to = to_account, amount, "transfer completed");
        Ok(record)
    }

    pub fn transactions_list(&self, account_number: &str) -> rusqlite::Result<Vec<Transaction>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(
            "select id, from_account, to_account, amount, description, created_at from transactions\n             where from_account = ?1 or to_account = ?1 order by created_at desc",
        )?;
        let rows = stmt.query_map(params![account_number], |r| {
            Ok(Transaction {
                id: r.get(0)?,
                from_account: r.get(1)?,
                to_account: r.get(2)?,
                amount: r.get(3)?,
                description: r.get(4)?,
                created_at: r.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    const CARD_COLUMNS: &'static str =
        "id, user_id, card_number, cvv, expiry_date, card_type, card_limit, balance, is_frozen, created_at";

    fn card_from_row(r: &rusqlite::Row) -> rusqlite::Result<VirtualCard> {
        Ok(VirtualCard {
            id: r.get(0)?,
            user_id: r.get(1)?,
            card_number: r.get(2)?,
            cvv: r.get(3)?,
            expiry_date: r.get(4)?,
            card_type: r.get(5)?,
            limit: r.get(6)?,
            balance: r.get(7)?,
            is_frozen: r.get::<_, i64>(8)? != 0,
            created_at: r.get(9)?,
        })
    }

    pub fn cards_list(&self, user_id: &str) -> rusqlite::Result<Vec<VirtualCard>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(&format!(
            "select {} from virtual_cards where user_id = ?1 order by created_at desc",
            Self::CARD_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], |r| Self::card_from_row(r))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn cards_create(
        &self,
        user_id: &str,
        limit: f64,
        card_type: &str,
    ) -> Result<VirtualCard, BankError> {
        if !(limit > 0.0) {
            return Err(BankError::InvalidAmount);
        }

        let mut rng = rand::thread_rng();
        let card_number: String = std::iter::once('4')
            .chain((0..15).map(|_| char::from(b'0' + rng.gen_range(0..10u8))))
            .collect();
        let cvv = format!("{:03}", rng.gen_range(0..1000));

        let card = VirtualCard {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            card_number,
            cvv,
            expiry_date: generate_expiry(),
            card_type: card_type.to_string(),
            limit,
            balance: limit,
            is_frozen: false,
            created_at: now_epoch_secs(),
        };

        let conn = self.conn.lock().expect("poisoned sqlite lock");
        conn.execute(
            "insert into virtual_cards (id, user_id, card_number, cvv, expiry_date, card_type, card_limit, balance, is_frozen, created_at)\n             values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
            params![
                card.id,
                card.user_id,
                card.card_number,
                card.cvv,
                card.expiry_date,
                card.card_type,
                card.limit,
                card.balance,
                card.created_at
            ],
        )?;
        Ok(card)
    }

    pub fn card_get(&self, card_id: &str) -> rusqlite::Result<Option<VirtualCard>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(&format!(
            "select {} from virtual_cards where id = ?1",
            Self::CARD_COLUMNS
        ))?;
        let mut rows = stmt.query(params![card_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(Self::card_from_row(row)?));
        }
        Ok(None)
    }

    /// Flip a card's frozen flag. Takes a bare card id; ownership is not
    /// checked.
    pub fn card_toggle_freeze(&self, card_id: &str) -> Result<VirtualCard, BankError> {
        let mut card = self.card_get(card_id)?.ok_or(BankError::NotFound("card"))?;
        card.is_frozen = !card.is_frozen;

        let conn = self.conn.lock().expect("poisoned sqlite lock");
        conn.execute(
            "update virtual_cards set is_frozen = ?2 where id = ?1",
            params![card.id, if card.is_frozen { 1i64 } else { 0i64 }],
        )?;
        Ok(card)
    }

    pub fn card_transactions_list(&self, card_id: &str) -> rusqlite::Result<Vec<CardTransaction>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(
            "select id, card_id, amount, description, created_at from card_transactions\n             where card_id = ?1 order by created_at desc",
        )?;
        let rows = stmt.query_map(params![card_id], |r| {
            Ok(CardTransaction {
                id: r.get(0)?,
                card_id: r.get(1)?,
                amount: r.get(2)?,
                description: r.get(3)?,
                created_at: r.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn loans_create(&self, user_id: &str, amount: f64) -> Result<Loan, BankError> {
        if !(amount > 0.0) {
            return Err(BankError::InvalidAmount);
        }

        let loan = Loan {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount,
            status: "pending".to_string(),
            created_at: now_epoch_secs(),
        };

        let conn = self.conn.lock().expect("poisoned sqlite lock");
        conn.execute(
            "insert into loans (id, user_id, amount, status, created_at) values (?1, ?2, ?3, ?4, ?5)",
            params![loan.id, loan.user_id, loan.amount, loan.status, loan.created_at],
        )?;
        Ok(loan)
    }

    pub fn loans_list(&self, user_id: &str) -> rusqlite::Result<Vec<Loan>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(
            "select id, user_id, amount, status, created_at from loans where user_id = ?1 order by created_at desc",
        )?;
        let rows = stmt.query_map(params![user_id], |r| Self::loan_from_row(r))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn loans_pending(&self) -> rusqlite::Result<Vec<Loan>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(
            "select id, user_id, amount, status, created_at from loans where status = 'pending' order by created_at asc",
        )?;
        let rows = stmt.query_map([], |r| Self::loan_from_row(r))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn loan_from_row(r: &rusqlite::Row) -> rusqlite::Result<Loan> {
        Ok(Loan {
            id: r.get(0)?,
            user_id: r.get(1)?,
            amount: r.get(2)?,
            status: r.get(3)?,
            created_at: r.get(4)?,
        })
    }

    /// Approve a pending loan and credit the borrower's balance.
    pub fn loan_approve(&self, loan_id: &str) -> Result<Loan, BankError> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let tx = conn.unchecked_transaction()?;

        let mut loan = {
            let mut stmt = tx
                .prepare("select id, user_id, amount, status, created_at from loans where id = ?1")?;
            let mut rows = stmt.query(params![loan_id])?;
            match rows.next()? {
                Some(row) => Self::loan_from_row(row)?,
                None => return Err(BankError::NotFound("loan")),
            }
        };
        if loan.status != "pending" {
            return Err(BankError::LoanNotPending);
        }

        tx.execute(
            "update loans set status = 'approved' where id = ?1",
            params![loan.id],
        )?;
        tx.execute(
            "update users set balance = balance + ?2 where id = ?1",
            params![loan.user_id, loan.amount],
        )?;
        tx.commit()?;

        loan.status = "approved".to_string();
        info!(loan_id = %loan.id, amount = loan.amount, "loan approved");
        Ok(loan)
    }

    pub fn bill_categories_list(&self) -> rusqlite::Result<Vec<BillCategory>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt =
            conn.prepare("select id, name, description from bill_categories order by name asc")?;
        let rows = stmt.query_map([], |r| {
            Ok(BillCategory {
                id: r.get(0)?,
                name: r.get(1)?,
                description: r.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn billers_by_category(&self, category_id: &str) -> rusqlite::Result<Vec<Biller>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(
            "select id, category_id, name, minimum_amount, maximum_amount from billers\n             where category_id = ?1 order by name asc",
        )?;
        let rows = stmt.query_map(params![category_id], |r| {
            Ok(Biller {
                id: r.get(0)?,
                category_id: r.get(1)?,
                name: r.get(2)?,
                minimum_amount: r.get(3)?,
                maximum_amount: r.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Pay a biller from the account balance or a virtual card.
    pub fn bill_pay(
        &self,
        user_id: &str,
        input: BillPaymentCreate,
    ) -> Result<BillPayment, BankError> {
        if !(input.amount > 0.0) {
            return Err(BankError::InvalidAmount);
        }

        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let tx = conn.unchecked_transaction()?;

        let (biller_name, category_name, min, max) = {
            let mut stmt = tx.prepare(
                "select b.name, c.name, b.minimum_amount, b.maximum_amount from billers b\n                 join bill_categories c on c.id = b.category_id where b.id = ?1",
            )?;
            let mut rows = stmt.query(params![input.biller_id])?;
            match rows.next()? {
                Some(row) => (
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ),
                None => return Err(BankError::NotFound("biller")),
            }
        };
        if input.amount < min || max.is_some_and(|max| input.amount > max) {
            return Err(BankError::AmountOutOfRange);
        }

        let mut card_number = None;
        if input.payment_method == "virtual_card" {
            let card_id = input.card_id.as_deref().ok_or(BankError::NotFound("card"))?;
            let (number, balance, is_frozen) = {
                let mut stmt = tx.prepare(
                    "select card_number, balance, is_frozen from virtual_cards where id = ?1",
                )?;
                let mut rows = stmt.query(params![card_id])?;
                match rows.next()? {
                    Some(row) => (
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)? != 0,
                    ),
                    None => return Err(BankError::NotFound("card")),
                }
            };
            if is_frozen {
                return Err(BankError::CardFrozen);
            }
            if balance < input.amount {
                return Err(BankError::InsufficientFunds);
            }

            tx.execute(
                "update virtual_cards set balance = balance - ?2 where id = ?1",
                params![card_id, input.amount],
            )?;
            tx.execute(
                "insert into card_transactions (id, card_id, amount, description, created_at) values (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    card_id,
                    input.amount,
                    biller_name,
                    now_epoch_secs()
                ],
            )?;
            card_number = Some(number);
        } else {
            let balance = {
                let mut stmt = tx.prepare("select balance from users where id = ?1")?;
                let mut rows = stmt.query(params![user_id])?;
                match rows.next()? {
                    Some(row) => row.get::<_, f64>(0)?,
                    None => return Err(BankError::NotFound("account")),
                }
            };
            if balance < input.amount {
                return Err(BankError::InsufficientFunds);
            }
            tx.execute(
                "update users set balance = balance - ?2 where id = ?1",
                params![user_id, input.amount],
            )?;
        }

        let payment = BillPayment {
            id: Uuid::new_v4().to_string(),
            amount: input.amount,
            status: "completed".to_string(),
            reference: generate_reference(),
            biller_name,
            category_name,
            payment_method: input.payment_method.clone(),
            card_number,
            description: input.description.clone(),
            created_at: now_epoch_secs(),
        };
        tx.execute(
            "insert into bill_payments (id, user_id, biller_id, amount, status, reference, payment_method, card_id, description, created_at)\n             values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                payment.id,
                user_id,
                input.biller_id,
                payment.amount,
                payment.status,
                payment.reference,
                payment.payment_method,
                input.card_id,
                payment.description,
                payment.created_at
            ],
        )?;
        tx.commit()?;

        info!(reference = %payment.reference, amount = payment.amount, "bill payment completed");
        Ok(payment)
    }

    pub fn bill_payments_list(&self, user_id: &str) -> rusqlite::Result<Vec<BillPayment>> {
        let conn = self.conn.lock().expect("poisoned sqlite lock");
        let mut stmt = conn.prepare(
            "select p.id, p.amount, p.status, p.reference, b.name, c.name, p.payment_method, vc.card_number, p.description, p.created_at\n             from bill_payments p\n             join billers b on b.id = p.biller_id\n             join bill_categories c on c.id = b.category_id\n             left join virtual_cards vc on vc.id = p.card_id\n             where p.user_id = ?1 order by p.created_at desc",
        )?;
        let rows = stmt.query_map(params![user_id], |r| {
            Ok(BillPayment {
                id: r.get(0)?,
                amount: r.get(1)?,
                status: r.get(2)?,
                reference: r.get(3)?,
                biller_name: r.get(4)?,
                category_name: r.get(5)?,
                payment_method: r.get(6)?,
                card_number: r.get(7)?,
                description: r.get(8)?,
                created_at: r.get(9)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

pub(crate) fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn generate_expiry() -> String {
    let now = chrono::Utc::now();
    let exp = now.checked_add_months(chrono::Months::new(36)).unwrap_or(now);
    format!("{:02}/{:02}", exp.month(), exp.year() % 100)
}

fn generate_reference() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("VB-{}", hex[..10].to_uppercase())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::Db;

    pub fn open_db() -> (Db, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open_at(&dir.path().join("vulnbank.db")).expect("open db");
        (db, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::open_db;
    use super::*;

    #[test]
    fn seeds_the_demo_admin_and_billing_catalog() {
        let (db, _dir) = open_db();

        let admin = db
            .users_find_by_username("admin")
            .expect("query")
            .expect("admin seeded");
        assert_eq!(admin.password, "admin123");
        assert_eq!(admin.account_number, "ADMIN001");
        assert_eq!(admin.balance, 999999.0);
        assert!(admin.is_admin);

        let categories = db.bill_categories_list().expect("categories");
        assert_eq!(categories.len(), 3);
        for category in &categories {
            assert!(!db.billers_by_category(&category.id).expect("billers").is_empty());
        }
    }

    #[test]
    fn opening_twice_does_not_duplicate_seeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vulnbank.db");
        drop(Db::open_at(&path).expect("first open"));
        let db = Db::open_at(&path).expect("second open");

        let admins: Vec<_> = db
            .users_list_summaries()
            .expect("users")
            .into_iter()
            .filter(|u| u.username == "admin")
            .collect();
        assert_eq!(admins.len(), 1);
        assert_eq!(db.bill_categories_list().expect("categories").len(), 3);
    }

    #[test]
    fn transfer_moves_funds_and_records_the_transaction() {
        let (db, _dir) = open_db();
        db.users_create("sender", "pw", "ACC20000001", 300.0, false).expect("sender");
        db.users_create("receiver", "pw", "ACC20000002", 50.0, false).expect("receiver");

        let record = db
            .transfer("ACC20000001", "ACC20000002", 120.5, Some("rent"))
            .expect("transfer");
        assert_eq!(record.amount, 120.5);
        assert_eq!(record.description.as_deref(), Some("rent"));

        assert_eq!(db.balance_get("ACC20000001").expect("balance"), 179.5);
        assert_eq!(db.balance_get("ACC20000002").expect("balance"), 170.5);

        let sent = db.transactions_list("ACC20000001").expect("list");
        assert!(sent.iter().any(|t| t.id == record.id));
        let received = db.transactions_list("ACC20000002").expect("list");
        assert!(received.iter().any(|t| t.id == record.id));
    }

    #[test]
    fn transfer_rejects_bad_inputs_without_mutating() {
        let (db, _dir) = open_db();
        db.users_create("sender", "pw", "ACC20000001", 300.0, false).expect("sender");
        db.users_create("receiver", "pw", "ACC20000002", 50.0, false).expect("receiver");

        assert!(matches!(
            db.transfer("ACC20000001", "ACC20000002", 0.0, None),
            Err(BankError::InvalidAmount)
        ));
        assert!(matches!(
            db.transfer("ACC20000001", "ACC20000002", -5.0, None),
            Err(BankError::InvalidAmount)
        ));
        assert!(matches!(
            db.transfer("ACC20000001", "ACC99999999", 10.0, None),
            Err(BankError::NotFound("account"))
        ));
        assert!(matches!(
            db.transfer("ACC20000001", "ACC20000002", 1000.0, None),
            Err(BankError::InsufficientFunds)
        ));

        assert_eq!(db.balance_get("ACC20000001").expect("balance"), 300.0);
        assert_eq!(db.balance_get("ACC20000002").expect("balance"), 50.0);
        assert!(db.transactions_list("ACC20000001").expect("list").is_empty());
    }

    #[test]
    fn loan_approval_credits_the_borrower_once() {
        let (db, _dir) = open_db();
        let user = db.users_create("borrower", "pw", "ACC30000001", 100.0, false).expect("user");

        let loan = db.loans_create(&user.id, 2500.0).expect("loan");
        assert_eq!(loan.status, "pending");
        assert!(db.loans_pending().expect("pending").iter().any(|l| l.id == loan.id));

        let approved = db.loan_approve(&loan.id).expect("approve");
        assert_eq!(approved.status, "approved");
        assert_eq!(db.balance_get("ACC30000001").expect("balance"), 2600.0);

        assert!(matches!(
            db.loan_approve(&loan.id),
            Err(BankError::LoanNotPending)
        ));
        assert_eq!(db.balance_get("ACC30000001").expect("balance"), 2600.0);

        assert!(matches!(
            db.loans_create(&user.id, 0.0),
            Err(BankError::InvalidAmount)
        ));
    }

    #[test]
    fn card_creation_and_freeze_toggle() {
        let (db, _dir) = open_db();
        let user = db.users_create("holder", "pw", "ACC40000001", 100.0, false).expect("user");

        let card = db.cards_create(&user.id, 750.0, "premium").expect("card");
        assert_eq!(card.card_number.len(), 16);
        assert!(card.card_number.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(card.cvv.len(), 3);
        assert_eq!(card.balance, 750.0);
        assert_eq!(card.limit, 750.0);
        assert!(!card.is_frozen);
        assert!(card.expiry_date.len() == 5 && card.expiry_date.contains('/'));

        let frozen = db.card_toggle_freeze(&card.id).expect("freeze");
        assert!(frozen.is_frozen);
        let thawed = db.card_toggle_freeze(&card.id).expect("thaw");
        assert!(!thawed.is_frozen);

        assert!(matches!(
            db.cards_create(&user.id, 0.0, "standard"),
            Err(BankError::InvalidAmount)
        ));
        assert!(matches!(
            db.card_toggle_freeze("missing"),
            Err(BankError::NotFound("card"))
        ));
    }

    #[test]
    fn bill_payment_from_account_debits_the_balance() {
        let (db, _dir) = open_db();
        let user = db.users_create("payer", "pw", "ACC50000001", 400.0, false).expect("user");

        let categories = db.bill_categories_list().expect("categories");
        let utilities = categories.iter().find(|c| c.name == "Utilities").expect("utilities");
        let biller = &db.billers_by_category(&utilities.id).expect("billers")[0];

        let payment = db
            .bill_pay(
                &user.id,
                BillPaymentCreate {
                    biller_id: biller.id.clone(),
                    amount: 60.0,
                    payment_method: "account".to_string(),
                    card_id: None,
                    description: Some("monthly".to_string()),
                },
            )
            .expect("payment");
        assert_eq!(payment.status, "completed");
        assert!(payment.reference.starts_with("VB-"));
        assert_eq!(payment.biller_name, biller.name);
        assert_eq!(payment.category_name, "Utilities");
        assert!(payment.card_number.is_none());

        assert_eq!(db.balance_get("ACC50000001").expect("balance"), 340.0);

        let history = db.bill_payments_list(&user.id).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reference, payment.reference);
    }

    #[test]
    fn bill_payment_enforces_biller_bounds() {
        let (db, _dir) = open_db();
        let user = db.users_create("payer", "pw", "ACC50000001", 400.0, false).expect("user");

        let categories = db.bill_categories_list().expect("categories");
        let entertainment = categories
            .iter()
            .find(|c| c.name == "Entertainment")
            .expect("entertainment");
        // StreamFlix accepts 5.0..=50.0.
        let biller = &db.billers_by_category(&entertainment.id).expect("billers")[0];

        for amount in [1.0, 200.0] {
            assert!(matches!(
                db.bill_pay(
                    &user.id,
                    BillPaymentCreate {
                        biller_id: biller.id.clone(),
                        amount,
                        payment_method: "account".to_string(),
                        card_id: None,
                        description: None,
                    },
                ),
                Err(BankError::AmountOutOfRange)
            ));
        }
        assert_eq!(db.balance_get("ACC50000001").expect("balance"), 400.0);
    }

    #[test]
    fn bill_payment_by_card_debits_the_card_and_respects_freeze() {
        let (db, _dir) = open_db();
        let user = db.users_create("payer", "pw", "ACC50000001", 400.0, false).expect("user");
        let card = db.cards_create(&user.id, 100.0, "standard").expect("card");

        let categories = db.bill_categories_list().expect("categories");
        let telecom = categories.iter().find(|c| c.name == "Telecom").expect("telecom");
        let biller = db
            .billers_by_category(&telecom.id)
            .expect("billers")
            .into_iter()
            .find(|b| b.name == "AirWave Mobile")
            .expect("AirWave Mobile");

        let pay = |card_id: Option<String>, amount: f64| BillPaymentCreate {
            biller_id: biller.id.clone(),
            amount,
            payment_method: "virtual_card".to_string(),
            card_id,
            description: None,
        };

        let payment = db.bill_pay(&user.id, pay(Some(card.id.clone()), 40.0)).expect("payment");
        assert_eq!(payment.card_number.as_deref(), Some(card.card_number.as_str()));

        let card_after = db.card_get(&card.id).expect("query").expect("card");
        assert_eq!(card_after.balance, 60.0);
        let spends = db.card_transactions_list(&card.id).expect("spends");
        assert!(spends.iter().any(|t| t.amount == 40.0 && t.description == biller.name));

        // Account balance is untouched when paying by card.
        assert_eq!(db.balance_get("ACC50000001").expect("balance"), 400.0);

        assert!(matches!(
            db.bill_pay(&user.id, pay(Some(card.id.clone()), 80.0)),
            Err(BankError::InsufficientFunds)
        ));

        db.card_toggle_freeze(&card.id).expect("freeze");
        assert!(matches!(
            db.bill_pay(&user.id, pay(Some(card.id.clone()), 20.0)),
            Err(BankError::CardFrozen)
        ));

        assert!(matches!(
            db.bill_pay(&user.id, pay(None, 20.0)),
            Err(BankError::NotFound("card"))
        ));
    }

    #[test]
    fn deleting_a_user_cascades_to_cards_and_loans() {
        let (db, _dir) = open_db();
        let user = db.users_create("gone", "pw", "ACC60000001", 10.0, false).expect("user");
        let card = db.cards_create(&user.id, 50.0, "standard").expect("card");
        let loan = db.loans_create(&user.id, 500.0).expect("loan");

        db.users_delete(&user.id).expect("delete");

        assert!(db.users_find_by_username("gone").expect("query").is_none());
        assert!(db.card_get(&card.id).expect("query").is_none());
        assert!(!db.loans_pending().expect("pending").iter().any(|l| l.id == loan.id));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn debug_builds_seed_demo_accounts() {
        let (db, _dir) = open_db();

        let alice = db
            .users_find_by_username("alice")
            .expect("query")
            .expect("alice seeded");
        assert_eq!(alice.account_number, "ACC10000001");

        let cards = db.cards_list(&alice.id).expect("cards");
        assert_eq!(cards.len(), 1);
        assert_eq!(db.card_transactions_list(&cards[0].id).expect("spends").len(), 3);

        assert!(db.users_find_by_username("bob").expect("query").is_some());
        assert!(!db.transactions_list("ACC10000001").expect("txns").is_empty());
    }
}
