//! Access to the import_status table.

use sqlx::PgConnection;

use crate::error::DbError;

/// Mark the database as indexed (or not) in import_status.
pub async fn set_indexed(conn: &mut PgConnection, state: bool) -> Result<(), DbError> {
    sqlx::query("UPDATE import_status SET indexed = $1")
        .bind(state)
        .execute(conn)
        .await?;
    Ok(())
}
