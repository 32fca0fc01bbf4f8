// ABOUTME: SQLite user store with backup codes and known fingerprints in child tables
// ABOUTME: Backup code consumption is a single conditional DELETE so concurrent use succeeds once
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::UserStore;
use crate::errors::{AppError, AppResult};
use crate::models::user::normalize_email;
use crate::models::{Id, User, UserRole};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// `SQLite`-backed user store
#[derive(Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    /// Connect and create tables if needed
    ///
    /// # Errors
    ///
    /// Returns a database error if the connection or migration fails
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        // every connection to :memory: is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool; tables must already exist
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create users, backup code, and fingerprint tables
    ///
    /// # Errors
    ///
    /// Returns a database error if a statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin', 'super_admin')),
                email_verified BOOLEAN NOT NULL DEFAULT 0,
                two_factor_secret TEXT,
                two_factor_enabled BOOLEAN NOT NULL DEFAULT 0,
                organization_id TEXT,
                created_at DATETIME NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS user_backup_codes (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                code_hash TEXT NOT NULL,
                PRIMARY KEY (user_id, code_hash)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS user_fingerprints (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                fingerprint TEXT NOT NULL,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, fingerprint)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_user(&self, row: &SqliteRow) -> AppResult<User> {
        let id_text: String = row.try_get("id")?;
        let id = Id::from_uuid(
            Uuid::parse_str(&id_text)
                .map_err(|e| AppError::database(format!("Corrupt user id '{id_text}': {e}")))?,
        );
        let role: String = row.try_get("role")?;
        let organization_id: Option<String> = row.try_get("organization_id")?;

        let backup_code_hashes: Vec<String> =
            sqlx::query_scalar("SELECT code_hash FROM user_backup_codes WHERE user_id = $1")
                .bind(&id_text)
                .fetch_all(&self.pool)
                .await?;

        let known_fingerprints: Vec<String> = sqlx::query_scalar(
            "SELECT fingerprint FROM user_fingerprints WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(&id_text)
        .fetch_all(&self.pool)
        .await?;

        Ok(User {
            id,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            password_hash: row.try_get("password_hash")?,
            role: role.parse()?,
            email_verified: row.try_get("email_verified")?,
            two_factor_secret: row.try_get("two_factor_secret")?,
            two_factor_enabled: row.try_get("two_factor_enabled")?,
            backup_code_hashes,
            known_fingerprints,
            organization_id: organization_id
                .as_deref()
                .map(Id::from_external)
                .transpose()?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }

    fn ensure_updated(rows_affected: u64) -> AppResult<()> {
        if rows_affected == 0 {
            return Err(AppError::not_found("User"));
        }
        Ok(())
    }
}

const USER_COLUMNS: &str = "id, email, name, password_hash, role, email_verified, \
     two_factor_secret, two_factor_enabled, organization_id, created_at";

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn create_user(&self, user: &User) -> AppResult<()> {
        let id = user.id.as_uuid().to_string();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r"
            INSERT INTO users (id, email, name, password_hash, role, email_verified,
                               two_factor_secret, two_factor_enabled, organization_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(&id)
        .bind(normalize_email(&user.email))
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.email_verified)
        .bind(&user.two_factor_secret)
        .bind(user.two_factor_enabled)
        .bind(user.organization_id.map(|org| org.to_external()))
        .bind(user.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(db_error)) = &inserted {
            if db_error.is_unique_violation() {
                return Err(AppError::already_exists(
                    "An account with this email already exists",
                ));
            }
        }
        inserted?;

        for hash in &user.backup_code_hashes {
            sqlx::query("INSERT INTO user_backup_codes (user_id, code_hash) VALUES ($1, $2)")
                .bind(&id)
                .bind(hash)
                .execute(&mut *tx)
                .await?;
        }
        for fingerprint in &user.known_fingerprints {
            sqlx::query(
                "INSERT OR IGNORE INTO user_fingerprints (user_id, fingerprint) VALUES ($1, $2)",
            )
            .bind(&id)
            .bind(fingerprint)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_user(&self, id: Id) -> AppResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.as_uuid().to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.load_user(&row).await?)),
            None => Ok(None),
        }
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.load_user(&row).await?)),
            None => Ok(None),
        }
    }

    async fn update_password_hash(&self, id: Id, password_hash: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(id.as_uuid().to_string())
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result.rows_affected())
    }

    async fn mark_email_verified(&self, id: Id) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET email_verified = 1 WHERE id = $1")
            .bind(id.as_uuid().to_string())
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result.rows_affected())
    }

    async fn set_two_factor_secret(&self, id: Id, secret: Option<&str>) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET two_factor_secret = $1 WHERE id = $2")
            .bind(secret)
            .bind(id.as_uuid().to_string())
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result.rows_affected())
    }

    async fn set_two_factor_enabled(&self, id: Id, enabled: bool) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET two_factor_enabled = $1 WHERE id = $2")
            .bind(enabled)
            .bind(id.as_uuid().to_string())
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result.rows_affected())
    }

    async fn replace_backup_codes(&self, id: Id, code_hashes: &[String]) -> AppResult<()> {
        let user_id = id.as_uuid().to_string();
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
            .bind(&user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AppError::not_found("User"));
        }

        sqlx::query("DELETE FROM user_backup_codes WHERE user_id = $1")
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;
        for hash in code_hashes {
            sqlx::query("INSERT INTO user_backup_codes (user_id, code_hash) VALUES ($1, $2)")
                .bind(&user_id)
                .bind(hash)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn consume_backup_code(&self, id: Id, code_hash: &str) -> AppResult<bool> {
        let result =
            sqlx::query("DELETE FROM user_backup_codes WHERE user_id = $1 AND code_hash = $2")
                .bind(id.as_uuid().to_string())
                .bind(code_hash)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_known_fingerprint(&self, id: Id, fingerprint: &str) -> AppResult<()> {
        let user_id = id.as_uuid().to_string();
        let result = sqlx::query(
            r"
            INSERT OR IGNORE INTO user_fingerprints (user_id, fingerprint)
            SELECT id, $2 FROM users WHERE id = $1
            ",
        )
        .bind(&user_id)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.get_user(id).await?.is_none() {
            return Err(AppError::not_found("User"));
        }
        Ok(())
    }
}
