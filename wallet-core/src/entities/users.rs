use time::OffsetDateTime;
use wallet_sdk::objects::Currency;

use crate::framework::{DatabaseAccessor, DatabaseProcessor, Processor};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Insert a user together with one zero balance per supported currency,
/// all in a single store transaction.
///
/// There is deliberately no existence pre-check: the UNIQUE constraints on
/// `username` and `email` are the source of truth, and violations are
/// mapped to duplicate errors by the caller.
///
/// Unlike the single-statement commands this one owns its transaction, so
/// it is implemented for the pool-backed processor only.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl Processor<CreateUser> for DatabaseProcessor {
    type Output = User;
    type Error = sqlx::Error;

    #[tracing::instrument(skip_all, err, name = "SQL:CreateUser")]
    async fn process(&mut self, cmd: CreateUser) -> Result<User, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash, created_at, updated_at
            "#,
        )
        .bind(&cmd.username)
        .bind(&cmd.email)
        .bind(&cmd.password_hash)
        .fetch_one(&mut *tx)
        .await?;

        for currency in Currency::ALL {
            sqlx::query("INSERT INTO balances (user_id, currency, amount) VALUES ($1, $2, 0)")
                .bind(user.id)
                .bind(currency.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(user)
    }
}

/// Look a user up by username.
#[derive(Debug, Clone)]
pub struct GetUserByUsername {
    pub username: String,
}

impl<A: DatabaseAccessor + Send> Processor<GetUserByUsername> for A {
    type Output = Option<User>;
    type Error = sqlx::Error;

    #[tracing::instrument(skip_all, err, name = "SQL:GetUserByUsername")]
    async fn process(&mut self, query: GetUserByUsername) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(&query.username)
        .fetch_optional(self.acquire())
        .await
    }
}

/// Look a user up by id.
#[derive(Debug, Clone)]
pub struct GetUserById {
    pub user_id: i64,
}

impl<A: DatabaseAccessor + Send> Processor<GetUserById> for A {
    type Output = Option<User>;
    type Error = sqlx::Error;

    #[tracing::instrument(skip_all, err, name = "SQL:GetUserById")]
    async fn process(&mut self, query: GetUserById) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(query.user_id)
        .fetch_optional(self.acquire())
        .await
    }
}
