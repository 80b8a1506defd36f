use async_trait::async_trait;

use super::MySqlStore;
use crate::errors::AppResult;
use crate::model::attendance::{Section, StudentRef};
use crate::store::Directory;

#[async_trait]
impl Directory for MySqlStore {
    async fn section(&self, tenant_id: u64, section_id: u64) -> AppResult<Option<Section>> {
        let row = sqlx::query_as::<_, Section>(
            "SELECT id, tenant_id, branch_id, name FROM sections WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id)
        .bind(section_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn section_students(&self, tenant_id: u64, section_id: u64) -> AppResult<Vec<StudentRef>> {
        let rows = sqlx::query_as::<_, StudentRef>(
            r#"
            SELECT id, full_name, roll_number
            FROM students
            WHERE tenant_id = ? AND section_id = ? AND is_active = TRUE
            ORDER BY roll_number, id
            "#,
        )
        .bind(tenant_id)
        .bind(section_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn teacher_assigned(&self, tenant_id: u64, staff_id: u64, subject_id: u64, section_id: u64) -> AppResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM teacher_assignments
            WHERE tenant_id = ? AND staff_id = ? AND subject_id = ? AND section_id = ? AND is_active = TRUE
            "#,
        )
        .bind(tenant_id)
        .bind(staff_id)
        .bind(subject_id)
        .bind(section_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found > 0)
    }
}
