//! Handle database requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

use crate::error::{Result, ServerError};
use crate::permissions::{Permission, Role};
use crate::user::{User, UserRepository, UserStatus};

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "campus";
pub const DEFAULT_POOL_SIZE: u32 = 10;

const UNIQUE_VIOLATION: &str = "23505";

/// [`UserRepository`] backed by PostgreSQL.
#[derive(Clone, Debug)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Create a new [`PgUserRepository`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool using the `postgres` configuration entry.
    pub async fn connect(config: &crate::config::Postgres) -> Result<Self> {
        let username = config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let password = config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let db = config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME);
        let hostname = &config.address;

        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .connect(&addr)
            .await?;

        tracing::info!(%hostname, %db, "postgres connected");

        Ok(Self { pool })
    }

    /// Run pending migration scripts.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|err| ServerError::internal("migrations failed", err))
    }

    async fn find_by(&self, field: Field, value: &str) -> Result<Option<User>> {
        let query = format!("{SELECT_USER} WHERE {field} = $1");

        sqlx::query_as::<_, UserRecord>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }
}

const SELECT_USER: &str = r#"SELECT
        id,
        email,
        full_name,
        phone_number,
        subject,
        role,
        status,
        permissions,
        password_hash,
        refresh_token,
        created_at,
        updated_at
    FROM users"#;

#[derive(Debug, Clone, Copy)]
enum Field {
    Id,
    Email,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Field::Id => write!(f, "id"),
            Field::Email => write!(f, "email"),
        }
    }
}

/// Row of the `users` table.
#[derive(Debug, FromRow)]
struct UserRecord {
    id: String,
    email: String,
    full_name: String,
    phone_number: Option<String>,
    subject: Option<String>,
    role: String,
    status: String,
    permissions: Vec<String>,
    password_hash: String,
    refresh_token: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = ServerError;

    fn try_from(record: UserRecord) -> Result<Self> {
        let role = record
            .role
            .parse::<Role>()
            .map_err(|err| ServerError::internal("corrupted role column", err))?;
        let status = record.status.parse::<UserStatus>().map_err(|details| {
            ServerError::Internal {
                details,
                source: None,
            }
        })?;

        Ok(User {
            id: record.id,
            email: record.email,
            full_name: record.full_name,
            phone_number: record.phone_number,
            subject: record.subject,
            role,
            status,
            permissions: record.permissions.into_iter().map(Permission::new).collect(),
            password_hash: record.password_hash,
            refresh_token: record.refresh_token,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

fn permission_names(user: &User) -> Vec<String> {
    user.permissions
        .iter()
        .map(|permission| permission.as_str().to_owned())
        .collect()
}

fn email_conflict(err: sqlx::Error) -> ServerError {
    let unique = err
        .as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);

    if unique {
        ServerError::Conflict("Email already in use".into())
    } else {
        err.into()
    }
}

fn expect_one(result: sqlx::postgres::PgQueryResult) -> Result<()> {
    if result.rows_affected() == 0 {
        Err(ServerError::NotFound("user".into()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        self.find_by(Field::Id, id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_by(Field::Email, email).await
    }

    async fn list(&self) -> Result<Vec<User>> {
        let query = format!("{SELECT_USER} ORDER BY created_at ASC");

        sqlx::query_as::<_, UserRecord>(&query)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO users
                (id, email, full_name, phone_number, subject, role, status, permissions,
                 password_hash, refresh_token, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.phone_number)
        .bind(&user.subject)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(permission_names(user))
        .bind(&user.password_hash)
        .bind(&user.refresh_token)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(email_conflict)?;

        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE users
                SET email = $1, full_name = $2, phone_number = $3, subject = $4,
                    role = $5, status = $6, permissions = $7, updated_at = NOW()
                WHERE id = $8"#,
        )
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.phone_number)
        .bind(&user.subject)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(permission_names(user))
        .bind(&user.id)
        .execute(&self.pool)
        .await
        .map_err(email_conflict)?;

        expect_one(result)
    }

    async fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2"#,
        )
        .bind(password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;

        expect_one(result)
    }

    async fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<()> {
        let result = sqlx::query(r#"UPDATE users SET refresh_token = $1 WHERE id = $2"#)
            .bind(token)
            .bind(id)
            .execute(&self.pool)
            .await?;

        expect_one(result)
    }
}
