// sqlx::Error -> AppError mapping
// (orphan rules prevent implementing From<sqlx::Error> for AppError here)

use devkeep_core::error::AppError;

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // SQLite result codes: https://www.sqlite.org/rescode.html
            Some(code) => match code.as_ref() {
                "5" => AppError::Persistence(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => AppError::Persistence(format!("Database full: {}", db_err.message())),
                "2067" | "1555" => AppError::Persistence(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                other => AppError::Persistence(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            },
            None => AppError::Persistence(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::PoolTimedOut => {
            AppError::Persistence("Timed out acquiring a database connection".to_string())
        }
        _ => AppError::Persistence(err.to_string()),
    }
}
