use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::{IntoParams, ToSchema};

use crate::errors::AppResult;
use crate::model::common::{DayOfWeek, Patch, TimeRange};
use crate::model::wire::ClockTime;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SlotType {
    Regular,
    Short,
    Assembly,
    Break,
    Lunch,
    Activity,
    ZeroPeriod,
}

impl SlotType {
    /// Whether a subject/teacher may be scheduled into this slot.
    pub fn is_teaching(self) -> bool {
        !matches!(self, SlotType::Break | SlotType::Lunch)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct Shift {
    #[schema(example = 1)]
    pub id: u64,
    pub tenant_id: u64,
    #[schema(example = 3)]
    pub branch_id: u64,
    #[schema(example = "Morning")]
    pub name: String,
    #[schema(example = "MORNING")]
    pub code: String,
    #[schema(example = "07:30:00", value_type = String)]
    pub start_time: NaiveTime,
    #[schema(example = "13:00:00", value_type = String)]
    pub end_time: NaiveTime,
    pub description: Option<String>,
    pub display_order: u32,
    pub is_active: bool,
    #[schema(example = "2026-01-01T00:00:00Z", format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(example = "2026-01-01T00:00:00Z", format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct DayPattern {
    pub id: u64,
    pub tenant_id: u64,
    #[schema(example = "Regular Day")]
    pub name: String,
    #[schema(example = "REGULAR")]
    pub code: String,
    pub description: Option<String>,
    #[schema(example = 8)]
    pub total_periods: u32,
    pub display_order: u32,
    pub is_active: bool,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PeriodSlot {
    pub id: u64,
    pub tenant_id: u64,
    pub branch_id: u64,
    #[schema(example = "Period 1")]
    pub name: String,
    #[schema(example = "P1")]
    pub code: String,
    pub slot_type: SlotType,
    #[schema(example = "09:00:00", value_type = String)]
    pub start_time: NaiveTime,
    #[schema(example = "09:45:00", value_type = String)]
    pub end_time: NaiveTime,
    #[schema(example = 45)]
    pub duration_minutes: u32,
    pub day_pattern_id: Option<u64>,
    pub shift_id: Option<u64>,
    pub display_order: u32,
    pub is_active: bool,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}

impl PeriodSlot {
    pub fn range(&self) -> AppResult<TimeRange> {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// Binding of a weekday to a day pattern for one branch. Keyed by
/// (tenant, branch, day), so there is never more than one per day.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct DayPatternAssignment {
    pub tenant_id: u64,
    pub branch_id: u64,
    #[schema(value_type = u8, example = 1)]
    pub day_of_week: DayOfWeek,
    pub is_working_day: bool,
    pub day_pattern_id: Option<u64>,
    pub updated_by: Option<u64>,
    #[schema(format = "date-time", value_type = String)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DayPatternAssignment {
    /// What an unconfigured weekday looks like.
    pub fn unassigned(tenant_id: u64, branch_id: u64, day_of_week: DayOfWeek) -> Self {
        DayPatternAssignment {
            tenant_id,
            branch_id,
            day_of_week,
            is_working_day: false,
            day_pattern_id: None,
            updated_by: None,
            updated_at: None,
        }
    }
}

// ---------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateShift {
    /// Defaults to the caller's branch
    #[schema(example = 3)]
    pub branch_id: Option<u64>,
    #[schema(example = "Morning")]
    pub name: String,
    #[schema(example = "morning")]
    pub code: String,
    #[schema(example = "07:30", value_type = String)]
    pub start_time: ClockTime,
    #[schema(example = "13:00", value_type = String)]
    pub end_time: ClockTime,
    pub description: Option<String>,
    pub display_order: Option<u32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct UpdateShift {
    #[schema(value_type = Option<String>)]
    pub name: Patch<String>,
    #[schema(value_type = Option<String>)]
    pub code: Patch<String>,
    #[schema(value_type = Option<String>, example = "07:45")]
    pub start_time: Patch<ClockTime>,
    #[schema(value_type = Option<String>, example = "13:15")]
    pub end_time: Patch<ClockTime>,
    /// Explicit `null` clears the description
    #[schema(value_type = Option<String>)]
    pub description: Patch<String>,
    #[schema(value_type = Option<u32>)]
    pub display_order: Patch<u32>,
    #[schema(value_type = Option<bool>)]
    pub is_active: Patch<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDayPattern {
    #[schema(example = "Regular Day")]
    pub name: String,
    #[schema(example = "regular")]
    pub code: String,
    pub description: Option<String>,
    #[schema(example = 8)]
    pub total_periods: u32,
    pub display_order: Option<u32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct UpdateDayPattern {
    #[schema(value_type = Option<String>)]
    pub name: Patch<String>,
    #[schema(value_type = Option<String>)]
    pub code: Patch<String>,
    #[schema(value_type = Option<String>)]
    pub description: Patch<String>,
    #[schema(value_type = Option<u32>)]
    pub total_periods: Patch<u32>,
    #[schema(value_type = Option<u32>)]
    pub display_order: Patch<u32>,
    #[schema(value_type = Option<bool>)]
    pub is_active: Patch<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePeriodSlot {
    pub branch_id: Option<u64>,
    #[schema(example = "Period 1")]
    pub name: String,
    #[schema(example = "p1")]
    pub code: String,
    pub slot_type: SlotType,
    #[schema(example = "09:00", value_type = String)]
    pub start_time: ClockTime,
    #[schema(example = "09:45", value_type = String)]
    pub end_time: ClockTime,
    /// Must equal the range length when given
    pub duration_minutes: Option<u32>,
    pub day_pattern_id: Option<u64>,
    pub shift_id: Option<u64>,
    pub display_order: Option<u32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct UpdatePeriodSlot {
    #[schema(value_type = Option<String>)]
    pub name: Patch<String>,
    #[schema(value_type = Option<String>)]
    pub code: Patch<String>,
    #[schema(value_type = Option<SlotType>)]
    pub slot_type: Patch<SlotType>,
    #[schema(value_type = Option<String>)]
    pub start_time: Patch<ClockTime>,
    #[schema(value_type = Option<String>)]
    pub end_time: Patch<ClockTime>,
    #[schema(value_type = Option<u32>)]
    pub duration_minutes: Patch<u32>,
    #[schema(value_type = Option<u64>)]
    pub day_pattern_id: Patch<u64>,
    #[schema(value_type = Option<u64>)]
    pub shift_id: Patch<u64>,
    #[schema(value_type = Option<u32>)]
    pub display_order: Patch<u32>,
    #[schema(value_type = Option<bool>)]
    pub is_active: Patch<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertDayAssignment {
    pub is_working_day: bool,
    pub day_pattern_id: Option<u64>,
}

/// Query filters shared by the three template lists.
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TemplateQuery {
    /// Filter by branch (defaults to the caller's branch for branch-scoped lists)
    pub branch_id: Option<u64>,
    pub is_active: Option<bool>,
    /// Case-insensitive match on name or code
    pub search: Option<String>,
    pub day_pattern_id: Option<u64>,
    pub shift_id: Option<u64>,
    pub slot_type: Option<SlotType>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

// ---------------------------------------------------------------------
// Store inputs
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TemplateFilter {
    pub branch_id: Option<u64>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
    pub day_pattern_id: Option<u64>,
    pub shift_id: Option<u64>,
    pub slot_type: Option<SlotType>,
}

#[derive(Debug, Clone)]
pub struct NewShift {
    pub tenant_id: u64,
    pub branch_id: u64,
    pub name: String,
    pub code: String,
    pub range: TimeRange,
    pub description: Option<String>,
    /// `None` appends after the current maximum
    pub display_order: Option<u32>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewDayPattern {
    pub tenant_id: u64,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub total_periods: u32,
    pub display_order: Option<u32>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewPeriodSlot {
    pub tenant_id: u64,
    pub branch_id: u64,
    pub name: String,
    pub code: String,
    pub slot_type: SlotType,
    pub range: TimeRange,
    pub day_pattern_id: Option<u64>,
    pub shift_id: Option<u64>,
    pub display_order: Option<u32>,
    pub is_active: bool,
}

/// Column changes for a shift; `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct ShiftChanges {
    pub name: Option<String>,
    pub code: Option<String>,
    pub range: Option<TimeRange>,
    pub description: Option<Option<String>>,
    pub display_order: Option<u32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct DayPatternChanges {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<Option<String>>,
    pub total_periods: Option<u32>,
    pub display_order: Option<u32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct PeriodSlotChanges {
    pub name: Option<String>,
    pub code: Option<String>,
    pub slot_type: Option<SlotType>,
    pub range: Option<TimeRange>,
    pub day_pattern_id: Option<Option<u64>>,
    pub shift_id: Option<Option<u64>>,
    pub display_order: Option<u32>,
    pub is_active: Option<bool>,
}

impl ShiftChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.code.is_none()
            && self.range.is_none()
            && self.description.is_none()
            && self.display_order.is_none()
            && self.is_active.is_none()
    }
}

impl DayPatternChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.code.is_none()
            && self.description.is_none()
            && self.total_periods.is_none()
            && self.display_order.is_none()
            && self.is_active.is_none()
    }
}

impl PeriodSlotChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.code.is_none()
            && self.slot_type.is_none()
            && self.range.is_none()
            && self.day_pattern_id.is_none()
            && self.shift_id.is_none()
            && self.display_order.is_none()
            && self.is_active.is_none()
    }
}
