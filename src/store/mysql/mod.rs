//! MySQL-backed stores. Runtime-checked queries only, so the crate builds
//! without a live database.

mod attendance;
mod directory;
mod schedule;
mod timetable;

use sqlx::FromRow;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::mysql::{MySql, MySqlDatabaseError, MySqlPool, MySqlRow, MySqlTypeInfo, MySqlValueRef};
use tracing::{debug, error};

use crate::errors::{AppError, AppResult};
use crate::model::attendance::{AttendanceStatus, ChangeType};
use crate::model::common::{Page, Pagination};
use crate::model::schedule::SlotType;
use crate::model::timetable::TimetableStatus;
use crate::utils::db_utils::SqlFilter;

/// Enumerations live in VARCHAR columns under their snake_case names.
macro_rules! text_column {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sqlx::Type<MySql> for $ty {
                fn type_info() -> MySqlTypeInfo {
                    <str as sqlx::Type<MySql>>::type_info()
                }

                fn compatible(ty: &MySqlTypeInfo) -> bool {
                    <str as sqlx::Type<MySql>>::compatible(ty)
                }
            }

            impl<'r> sqlx::Decode<'r, MySql> for $ty {
                fn decode(value: MySqlValueRef<'r>) -> Result<Self, BoxDynError> {
                    let raw = <&str as sqlx::Decode<MySql>>::decode(value)?;
                    Ok(raw.parse::<$ty>()?)
                }
            }

            impl<'q> sqlx::Encode<'q, MySql> for $ty {
                fn encode_by_ref(&self, buf: &mut Vec<u8>) -> IsNull {
                    <&str as sqlx::Encode<MySql>>::encode(self.as_ref(), buf)
                }
            }
        )*
    };
}

text_column!(SlotType, TimetableStatus, AttendanceStatus, ChangeType);

#[derive(Clone, Debug)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlStore { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

/// Duplicate-key violation (SQLSTATE 23000, error 1062).
pub(crate) fn is_duplicate_key(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23000")
                && db_err
                    .try_downcast_ref::<MySqlDatabaseError>()
                    .map_or(true, |e| e.number() == 1062)
        }
        _ => false,
    }
}

/// Translate a duplicate key into the domain error; everything else is a
/// storage failure.
pub(crate) fn on_duplicate(err: sqlx::Error, conflict: impl FnOnce() -> AppError) -> AppError {
    if is_duplicate_key(&err) {
        conflict()
    } else {
        error!(error = %err, "Storage operation failed");
        AppError::Database(err)
    }
}

/// COUNT plus one page of rows for a filtered list.
pub(crate) async fn fetch_page<T>(
    pool: &MySqlPool,
    from: &str,
    columns: &str,
    filter: &SqlFilter,
    order_by: &str,
    page: Pagination,
) -> AppResult<Page<T>>
where
    T: for<'r> FromRow<'r, MySqlRow> + Send + Unpin,
{
    let where_clause = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM {} {}", from, where_clause);
    debug!(sql = %count_sql, bindings = ?filter.values, "Counting rows");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for value in &filter.values {
        count_query = count_query.bind(value.clone());
    }
    let total = count_query.fetch_one(pool).await.map_err(|e| {
        error!(error = %e, sql = %count_sql, "Failed to count rows");
        AppError::Database(e)
    })?;

    let data_sql = format!(
        "SELECT {} FROM {} {} ORDER BY {} LIMIT ? OFFSET ?",
        columns, from, where_clause, order_by
    );
    debug!(sql = %data_sql, page = ?page, "Fetching rows");
    let mut data_query = sqlx::query_as::<_, T>(&data_sql);
    for value in &filter.values {
        data_query = data_query.bind(value.clone());
    }
    let items = data_query
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await
        .map_err(|e| {
            error!(error = %e, sql = %data_sql, "Failed to fetch rows");
            AppError::Database(e)
        })?;

    Ok(Page {
        items,
        total: total.max(0) as u64,
    })
}

/// Next `display_order` in a scope: max + 1, or 1 for an empty scope.
pub(crate) const NEXT_DISPLAY_ORDER: &str = "CAST(COALESCE(MAX(display_order), 0) + 1 AS UNSIGNED)";
