//! Users repository.

use crate::models::User;
use sqlx::PgExecutor;

/// Repository for user rows.
pub struct UsersRepository;

impl UsersRepository {
    /// Fetch a user by id.
    pub async fn find<'e, E>(executor: E, id: &str) -> Result<Option<User>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            SELECT id, name, photo, online
            FROM users
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Insert a new user. The online flag always starts false.
    pub async fn insert<'e, E>(
        executor: E,
        id: &str,
        name: &str,
        photo: &str,
    ) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            INSERT INTO users (id, name, photo, online)
            VALUES ($1, $2, $3, FALSE)
            ",
        )
        .bind(id)
        .bind(name)
        .bind(photo)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Update a user's profile fields. Returns the number of rows touched.
    pub async fn update_profile<'e, E>(
        executor: E,
        id: &str,
        name: &str,
        photo: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r"
            UPDATE users
            SET name = $2, photo = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(name)
        .bind(photo)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete a user row. Returns the number of rows touched.
    pub async fn delete<'e, E>(executor: E, id: &str) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// List users whose name contains `keyword` (case-insensitive),
    /// ordered by ascending id.
    pub async fn list<'e, E>(
        executor: E,
        keyword: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<User>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            SELECT id, name, photo, online
            FROM users
            WHERE LOWER(name) LIKE '%' || LOWER($1) || '%'
            ORDER BY id
            OFFSET $2
            LIMIT $3
            ",
        )
        .bind(keyword)
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(executor)
        .await
    }

    /// Count users matching `keyword`, ignoring pagination.
    pub async fn count<'e, E>(executor: E, keyword: &str) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM users
            WHERE LOWER(name) LIKE '%' || LOWER($1) || '%'
            ",
        )
        .bind(keyword)
        .fetch_one(executor)
        .await?;
        Ok(count as u64)
    }

    /// Count how many of `ids` reference existing users.
    pub async fn count_existing<'e, E>(executor: E, ids: &[String]) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM users
            WHERE id = ANY($1)
            ",
        )
        .bind(ids)
        .fetch_one(executor)
        .await?;
        Ok(count as u64)
    }

    /// Set a user's online flag. Returns the number of rows touched.
    pub async fn set_online<'e, E>(executor: E, id: &str, online: bool) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r"
            UPDATE users
            SET online = $2
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(online)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
