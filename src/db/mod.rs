pub mod query;

use sea_orm::{
    sea_query::{LockBehavior, LockType},
    ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    IsolationLevel, PrimaryKeyTrait, QuerySelect, RuntimeErr, TransactionTrait,
};

use crate::config::Config;
use crate::error::{AppError, AppResult};

pub async fn connect(config: &Config) -> AppResult<DatabaseConnection> {
    Database::connect(&config.database_url)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to connect to database: {}", e)))
}

/// Opens a REPEATABLE READ transaction. Used wherever staff availability is
/// evaluated and then acted upon.
pub async fn begin_repeatable_read<C>(db: &C) -> AppResult<DatabaseTransaction>
where
    C: TransactionTrait,
{
    Ok(db
        .begin_with_config(Some(IsolationLevel::RepeatableRead), None)
        .await?)
}

/// Loads a row by primary key and holds `FOR UPDATE` on it until the
/// enclosing transaction ends.
pub async fn find_or_lock<E, C>(
    db: &C,
    id: <E::PrimaryKey as PrimaryKeyTrait>::ValueType,
    what: &str,
) -> AppResult<E::Model>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    E::find_by_id(id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} not found", what)))
}

/// Like [`find_or_lock`] but returns `None` instead of waiting when another
/// worker holds the row.
pub async fn try_lock<E, C>(
    db: &C,
    id: <E::PrimaryKey as PrimaryKeyTrait>::ValueType,
) -> AppResult<Option<E::Model>>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    Ok(E::find_by_id(id)
        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
        .one(db)
        .await?)
}

/// SQLSTATE 40001 (serialization_failure) or 40P01 (deadlock_detected).
pub fn is_serialization_failure(err: &DbErr) -> bool {
    let runtime = match err {
        DbErr::Exec(e) | DbErr::Query(e) | DbErr::Conn(e) => e,
        _ => return false,
    };

    match runtime {
        RuntimeErr::SqlxError(sea_orm::sqlx::Error::Database(db_err)) => {
            matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_serialization_failures() {
        assert!(!is_serialization_failure(&DbErr::Custom("x".into())));
        assert!(!is_serialization_failure(&DbErr::RecordNotFound("x".into())));
        assert!(!is_serialization_failure(&DbErr::Query(RuntimeErr::Internal(
            "x".into()
        ))));
    }
}
