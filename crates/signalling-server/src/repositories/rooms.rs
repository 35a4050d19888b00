//! Rooms and membership repository.
//!
//! The membership relation is stored as a plain relation table with an
//! index per side; lookups are always relation-driven, never through
//! embedded back-pointers.

use crate::models::User;
use sqlx::PgExecutor;

/// A room row without its member set.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RoomRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub photo: String,
}

/// Repository for room rows and membership edges.
pub struct RoomsRepository;

impl RoomsRepository {
    /// Fetch a room by id.
    pub async fn find<'e, E>(executor: E, id: &str) -> Result<Option<RoomRow>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            SELECT id, name, description, photo
            FROM rooms
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Insert a new room.
    pub async fn insert<'e, E>(
        executor: E,
        id: &str,
        name: &str,
        description: &str,
        photo: &str,
    ) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            INSERT INTO rooms (id, name, description, photo)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(photo)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Update a room's profile fields. Returns the number of rows touched.
    pub async fn update_profile<'e, E>(
        executor: E,
        id: &str,
        name: &str,
        description: &str,
        photo: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r"
            UPDATE rooms
            SET name = $2, description = $3, photo = $4
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(photo)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete a room row. Returns the number of rows touched.
    pub async fn delete<'e, E>(executor: E, id: &str) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// List rooms whose name contains `keyword` (case-insensitive),
    /// ordered by ascending id.
    pub async fn list<'e, E>(
        executor: E,
        keyword: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RoomRow>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            SELECT id, name, description, photo
            FROM rooms
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

    /// Count rooms matching `keyword`, ignoring pagination.
    pub async fn count<'e, E>(executor: E, keyword: &str) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM rooms
            WHERE LOWER(name) LIKE '%' || LOWER($1) || '%'
            ",
        )
        .bind(keyword)
        .fetch_one(executor)
        .await?;
        Ok(count as u64)
    }

    /// Current members of a room, ordered by ascending id.
    pub async fn members_of<'e, E>(executor: E, room_id: &str) -> Result<Vec<User>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            SELECT u.id, u.name, u.photo, u.online
            FROM users u
            JOIN room_members rm ON rm.user_id = u.id
            WHERE rm.room_id = $1
            ORDER BY u.id
            ",
        )
        .bind(room_id)
        .fetch_all(executor)
        .await
    }

    /// Rooms a user participates in, ordered by ascending id.
    pub async fn rooms_of_user<'e, E>(
        executor: E,
        user_id: &str,
    ) -> Result<Vec<RoomRow>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            SELECT r.id, r.name, r.description, r.photo
            FROM rooms r
            JOIN room_members rm ON rm.room_id = r.id
            WHERE rm.user_id = $1
            ORDER BY r.id
            ",
        )
        .bind(user_id)
        .fetch_all(executor)
        .await
    }

    /// Room ids a user participates in, ordered by ascending id.
    pub async fn room_ids_of_user<'e, E>(
        executor: E,
        user_id: &str,
    ) -> Result<Vec<String>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar(
            r"
            SELECT room_id
            FROM room_members
            WHERE user_id = $1
            ORDER BY room_id
            ",
        )
        .bind(user_id)
        .fetch_all(executor)
        .await
    }

    /// Whether the user is a member of any of `room_ids`.
    pub async fn is_member_of_any<'e, E>(
        executor: E,
        user_id: &str,
        room_ids: &[String],
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM room_members
                WHERE user_id = $1 AND room_id = ANY($2)
            )
            ",
        )
        .bind(user_id)
        .bind(room_ids)
        .fetch_one(executor)
        .await
    }

    /// Add a membership edge. Set semantics: adding an existing edge is a
    /// no-op. Returns the number of rows inserted (0 or 1).
    pub async fn add_member<'e, E>(
        executor: E,
        room_id: &str,
        user_id: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r"
            INSERT INTO room_members (room_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (room_id, user_id) DO NOTHING
            ",
        )
        .bind(room_id)
        .bind(user_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Remove a membership edge. Returns the number of rows deleted.
    pub async fn remove_member<'e, E>(
        executor: E,
        room_id: &str,
        user_id: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r"
            DELETE FROM room_members
            WHERE room_id = $1 AND user_id = $2
            ",
        )
        .bind(room_id)
        .bind(user_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Cascade: drop every membership edge of a user.
    pub async fn remove_memberships_of_user<'e, E>(
        executor: E,
        user_id: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM room_members WHERE user_id = $1")
            .bind(user_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Cascade: drop every membership edge of a room.
    pub async fn remove_memberships_of_room<'e, E>(
        executor: E,
        room_id: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM room_members WHERE room_id = $1")
            .bind(room_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
