//! PostgreSQL 与 SQLite 行映射的共用工具
//!
//! SQLite 中 UUID 与 JSON 以 TEXT 存储；学员日期两端都以文本读取，
//! 无法解析的值记录在 `Student::malformed_dates` 中交由锚点解析报告。

use chrono::NaiveDate;
use relationship_domain::Student;
use relationship_errors::{SchedulerError, SchedulerResult};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 学员表中作为锚点的日期列
pub const STUDENT_DATE_COLUMNS: [&str; 4] = [
    "first_workout_date",
    "last_workout_date",
    "birth_date",
    "plan_end_date",
];

/// 事件表中的提醒日期列
pub const OCCURRENCE_REMINDER_COLUMN: &str = "reminder_at";

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn parse_uuid_sqlite(row: &sqlx::sqlite::SqliteRow, field_name: &str) -> SchedulerResult<Uuid> {
        use sqlx::Row;
        let raw: String = row.try_get(field_name)?;
        Uuid::parse_str(&raw)
            .map_err(|e| SchedulerError::Serialization(format!("解析 {field_name} 失败: {e}")))
    }

    pub fn parse_json_sqlite(
        row: &sqlx::sqlite::SqliteRow,
        field_name: &str,
    ) -> SchedulerResult<serde_json::Value> {
        use sqlx::Row;
        let json_str: String = row.try_get(field_name)?;
        json_str
            .parse()
            .map_err(|e| SchedulerError::Serialization(format!("解析 {field_name} 失败: {e}")))
    }

    /// 宽松解析存储的日期：接受 `YYYY-MM-DD` 或以其开头的时间戳文本
    pub fn parse_lenient_date(raw: &str) -> Option<NaiveDate> {
        let trimmed = raw.trim();
        let head = trimmed.get(..10).unwrap_or(trimmed);
        NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
    }

    /// 把学员的四个日期列写入实体，空值视为缺失，不可解析的值进入 `malformed_dates`
    pub fn apply_student_dates(
        student: &mut Student,
        raw_dates: [(&str, Option<String>); 4],
    ) {
        let mut malformed = BTreeMap::new();
        for (field, raw) in raw_dates {
            let parsed = match raw.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(value) => match Self::parse_lenient_date(value) {
                    Some(date) => Some(date),
                    None => {
                        malformed.insert(field.to_string(), value.to_string());
                        None
                    }
                },
            };
            match field {
                "first_workout_date" => student.first_workout_date = parsed,
                "last_workout_date" => student.last_workout_date = parsed,
                "birth_date" => student.birth_date = parsed,
                "plan_end_date" => student.plan_end_date = parsed,
                _ => {}
            }
        }
        student.malformed_dates = malformed;
    }

    /// 事件提醒日期以逗号拼接读取；任一值不可解析时整体记为 `reminder_at` 格式错误
    pub fn apply_occurrence_reminders(student: &mut Student, raw: Option<String>) {
        let Some(raw) = raw else {
            return;
        };
        let mut reminders = Vec::new();
        for value in raw.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            match Self::parse_lenient_date(value) {
                Some(date) => reminders.push(date),
                None => {
                    student
                        .malformed_dates
                        .insert(OCCURRENCE_REMINDER_COLUMN.to_string(), value.to_string());
                    return;
                }
            }
        }
        reminders.sort_unstable();
        reminders.dedup();
        student.occurrence_reminders = reminders;
    }
}
