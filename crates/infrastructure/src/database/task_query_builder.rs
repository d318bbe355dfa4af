//! 看板/日历查询的动态 SQL 构造，PostgreSQL 与 SQLite 共用 `$N` 占位符

use chrono::NaiveDate;
use relationship_domain::{TaskFilter, TaskStatus};
use uuid::Uuid;

pub const TASK_COLUMNS: &str = "id, tenant_id, student_id, template_code, anchor, anchor_date, \
     scheduled_for, channel, status, payload, created_by, sent_at, notes, created_at, updated_at";

/// 查询参数，由各驱动按自身类型绑定
#[derive(Debug, Clone, PartialEq)]
pub enum TaskQueryParam {
    Uuid(Uuid),
    Text(String),
    Status(TaskStatus),
    Date(NaiveDate),
    Int64(i64),
}

pub struct TaskQueryBuilder;

impl TaskQueryBuilder {
    pub fn build_select_query(filter: &TaskFilter) -> (String, Vec<TaskQueryParam>) {
        let mut query = format!("SELECT {TASK_COLUMNS} FROM relationship_tasks WHERE 1=1");
        let mut params = Vec::new();

        let mut push = |query: &mut String, clause: &str, param: TaskQueryParam| {
            params.push(param);
            query.push_str(&format!(" AND {clause} ${}", params.len()));
        };

        if let Some(tenant_id) = filter.tenant_id {
            push(&mut query, "tenant_id =", TaskQueryParam::Uuid(tenant_id));
        }
        if let Some(student_id) = filter.student_id {
            push(&mut query, "student_id =", TaskQueryParam::Uuid(student_id));
        }
        if let Some(status) = filter.status {
            push(&mut query, "status =", TaskQueryParam::Status(status));
        }
        if let Some(anchor) = &filter.anchor {
            push(&mut query, "anchor =", TaskQueryParam::Text(anchor.clone()));
        }
        if let Some(code) = &filter.template_code {
            push(&mut query, "template_code =", TaskQueryParam::Text(code.clone()));
        }
        if let Some(from) = filter.scheduled_from {
            push(&mut query, "scheduled_for >=", TaskQueryParam::Date(from));
        }
        if let Some(to) = filter.scheduled_to {
            push(&mut query, "scheduled_for <=", TaskQueryParam::Date(to));
        }

        query.push_str(" ORDER BY scheduled_for ASC, id ASC");

        // SQLite 的 OFFSET 必须跟在 LIMIT 之后
        let limit = match (filter.limit, filter.offset) {
            (Some(limit), _) => Some(limit),
            (None, Some(_)) => Some(i64::MAX),
            (None, None) => None,
        };
        if let Some(limit) = limit {
            params.push(TaskQueryParam::Int64(limit));
            query.push_str(&format!(" LIMIT ${}", params.len()));
        }
        if let Some(offset) = filter.offset {
            params.push(TaskQueryParam::Int64(offset));
            query.push_str(&format!(" OFFSET ${}", params.len()));
        }

        (query, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_select_query_no_filter() {
        let (query, params) = TaskQueryBuilder::build_select_query(&TaskFilter::default());
        assert!(query.starts_with("SELECT id, tenant_id, student_id"));
        assert!(query.contains("ORDER BY scheduled_for ASC, id ASC"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_select_query_numbers_placeholders_in_order() {
        let tenant_id = Uuid::new_v4();
        let filter = TaskFilter {
            status: Some(TaskStatus::DueToday),
            scheduled_from: NaiveDate::from_ymd_opt(2025, 1, 1),
            limit: Some(20),
            ..TaskFilter::for_tenant(tenant_id)
        };

        let (query, params) = TaskQueryBuilder::build_select_query(&filter);

        assert!(query.contains("AND tenant_id = $1"));
        assert!(query.contains("AND status = $2"));
        assert!(query.contains("AND scheduled_for >= $3"));
        assert!(query.contains("LIMIT $4"));
        assert_eq!(params.len(), 4);
        assert_eq!(params[0], TaskQueryParam::Uuid(tenant_id));
        assert_eq!(params[1], TaskQueryParam::Status(TaskStatus::DueToday));
    }
}
