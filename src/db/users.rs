use crate::db::models::{UserEntity, UserRow};
use crate::db::repository::{RepositoryError, StorageError};
use crate::db::to_db_timestamp;
use sqlx::SqlitePool;
use uuid::Uuid;

pub async fn insert_user(pool: &SqlitePool, user: &UserEntity) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO users (id, name, display_name, created_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(user.id.to_string())
    .bind(&user.name)
    .bind(&user.display_name)
    .bind(to_db_timestamp(user.created_at))
    .execute(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::DuplicateUser,
        _ => RepositoryError::from(e),
    })?;

    Ok(())
}

/// Deletes the user; their credentials go with them via `ON DELETE CASCADE`
pub async fn delete_user(pool: &SqlitePool, user_id: Uuid) -> Result<(), RepositoryError> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::UnknownUser);
    }
    Ok(())
}

pub async fn find_by_name(pool: &SqlitePool, name: &str) -> Result<Option<UserEntity>, StorageError> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
        .map(UserEntity::try_from)
        .transpose()
}

pub async fn find_by_id(pool: &SqlitePool, user_id: Uuid) -> Result<Option<UserEntity>, StorageError> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?
        .map(UserEntity::try_from)
        .transpose()
}
