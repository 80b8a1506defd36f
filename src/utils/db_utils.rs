use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::encode::IsNull;
use sqlx::mysql::{MySql, MySqlConnection, MySqlTypeInfo};
use sqlx::{Encode, Type};

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    U32(u32),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<Utc>),
    Null,
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::U64(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::U32(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveTime> for SqlValue {
    fn from(v: NaiveTime) -> Self {
        SqlValue::Time(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

// Bound like the underlying value; NULL goes out as a typed string NULL.
impl Type<MySql> for SqlValue {
    fn type_info() -> MySqlTypeInfo {
        <str as Type<MySql>>::type_info()
    }
}

impl<'q> Encode<'q, MySql> for SqlValue {
    fn encode_by_ref(&self, buf: &mut Vec<u8>) -> IsNull {
        match self {
            SqlValue::String(v) => <String as Encode<MySql>>::encode_by_ref(v, buf),
            SqlValue::U64(v) => <u64 as Encode<MySql>>::encode_by_ref(v, buf),
            SqlValue::U32(v) => <u32 as Encode<MySql>>::encode_by_ref(v, buf),
            SqlValue::Bool(v) => <bool as Encode<MySql>>::encode_by_ref(v, buf),
            SqlValue::Date(v) => <NaiveDate as Encode<MySql>>::encode_by_ref(v, buf),
            SqlValue::Time(v) => <NaiveTime as Encode<MySql>>::encode_by_ref(v, buf),
            SqlValue::DateTime(v) => <DateTime<Utc> as Encode<MySql>>::encode_by_ref(v, buf),
            SqlValue::Null => IsNull::Yes,
        }
    }

    fn produces(&self) -> Option<MySqlTypeInfo> {
        Some(match self {
            SqlValue::String(_) | SqlValue::Null => <str as Type<MySql>>::type_info(),
            SqlValue::U64(_) => <u64 as Type<MySql>>::type_info(),
            SqlValue::U32(_) => <u32 as Type<MySql>>::type_info(),
            SqlValue::Bool(_) => <bool as Type<MySql>>::type_info(),
            SqlValue::Date(_) => <NaiveDate as Type<MySql>>::type_info(),
            SqlValue::Time(_) => <NaiveTime as Type<MySql>>::type_info(),
            SqlValue::DateTime(_) => <DateTime<Utc> as Type<MySql>>::type_info(),
        })
    }
}

/// ===============================
/// WHERE clause built from optional filters
/// ===============================
#[derive(Debug, Default)]
pub struct SqlFilter {
    conditions: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl SqlFilter {
    /// `condition` holds one `?` per entry in `values`.
    pub fn push(&mut self, condition: &str, values: impl IntoIterator<Item = SqlValue>) -> &mut Self {
        self.conditions.push(condition.to_string());
        self.values.extend(values);
        self
    }

    pub fn eq(&mut self, column: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.push(&format!("{} = ?", column), [value.into()])
    }

    /// Case-insensitive substring match on either column.
    pub fn search(&mut self, a: &str, b: &str, term: Option<&str>) -> &mut Self {
        match term.map(str::trim) {
            Some(term) if !term.is_empty() => {
                let like = format!("%{}%", term.to_lowercase());
                self.push(
                    &format!("(LOWER({}) LIKE ? OR LOWER({}) LIKE ?)", a, b),
                    [SqlValue::String(like.clone()), SqlValue::String(like)],
                )
            }
            _ => self,
        }
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }
}

/// ===============================
/// Dynamic UPDATE for one tenant-scoped row
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    table: &'static str,
    assignments: Vec<(&'static str, SqlValue)>,
}

impl SqlUpdate {
    pub fn new(table: &'static str) -> Self {
        SqlUpdate {
            table,
            assignments: Vec::new(),
        }
    }

    pub fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) -> &mut Self {
        self.assignments.push((column, value.into()));
        self
    }

    pub fn set_some<T: Into<SqlValue>>(&mut self, column: &'static str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.set(column, value);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn sql(&self) -> String {
        let set_clause = self
            .assignments
            .iter()
            .map(|(column, _)| format!("{} = ?", column))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "UPDATE {} SET {} WHERE tenant_id = ? AND id = ?",
            self.table, set_clause
        )
    }

    /// Runs the statement; returns rows affected.
    pub async fn execute(
        self,
        conn: &mut MySqlConnection,
        tenant_id: u64,
        id: u64,
    ) -> Result<u64, sqlx::Error> {
        let sql = self.sql();
        tracing::debug!(sql = %sql, table = self.table, id, "Executing dynamic update");

        let mut query = sqlx::query(&sql);
        for (_, value) in self.assignments {
            query = query.bind(value);
        }
        let result = query.bind(tenant_id).bind(id).execute(conn).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_sql_lists_columns_in_order() {
        let mut update = SqlUpdate::new("shifts");
        update
            .set("name", "Morning")
            .set_some("display_order", Some(3u32))
            .set_some::<u32>("is_active", None)
            .set("description", None::<String>);

        assert_eq!(
            update.sql(),
            "UPDATE shifts SET name = ?, display_order = ?, description = ? WHERE tenant_id = ? AND id = ?"
        );
        assert_eq!(update.assignments[2].1, SqlValue::Null);
    }

    #[test]
    fn filter_skips_blank_search() {
        let mut filter = SqlFilter::default();
        filter.eq("tenant_id", 1u64).search("name", "code", Some("  "));
        assert_eq!(filter.where_clause(), "WHERE tenant_id = ?");

        filter.search("name", "code", Some("Morn"));
        assert_eq!(filter.values.len(), 3);
        assert_eq!(filter.values[1], SqlValue::String("%morn%".into()));
    }
}
