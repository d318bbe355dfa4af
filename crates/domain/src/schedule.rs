//! 日程计算：锚点日期 + 偏移量 -> 到期日，以及"今天"是否落在容差窗口内
//!
//! 所有函数都是纯函数，运行日期和容差由调用方显式传入。

use chrono::{Days, NaiveDate};
use relationship_errors::{SchedulerError, SchedulerResult};

use crate::anchors::AnchorKind;
use crate::entities::Template;

/// 到期日前后各允许的天数（产品策略：允许提前或延后一天触达）
pub const DEFAULT_TOLERANCE_DAYS: i64 = 1;

/// 模板偏移量的绝对值上限
pub const MAX_OFFSET_DAYS: i32 = 365;

/// 计算到期日。偏移量为空表示立即发送，到期日即运行日期。
pub fn compute_due_date(
    anchor_date: NaiveDate,
    offset_days: Option<i32>,
    run_date: NaiveDate,
) -> SchedulerResult<NaiveDate> {
    let Some(offset) = offset_days else {
        return Ok(run_date);
    };

    let shifted = if offset >= 0 {
        anchor_date.checked_add_days(Days::new(offset as u64))
    } else {
        anchor_date.checked_sub_days(Days::new(offset.unsigned_abs() as u64))
    };

    shifted.ok_or_else(|| {
        SchedulerError::malformed_date("anchor_date", format!("{anchor_date} {offset:+} 天"))
    })
}

/// `|due_date - run_date| <= tolerance_days`
pub fn is_eligible_today(due_date: NaiveDate, run_date: NaiveDate, tolerance_days: i64) -> bool {
    (due_date - run_date).num_days().abs() <= tolerance_days
}

pub fn validate_offset(code: &str, offset_days: Option<i32>) -> SchedulerResult<()> {
    match offset_days {
        Some(offset) if offset.abs() > MAX_OFFSET_DAYS => Err(SchedulerError::invalid_template(
            code,
            format!("偏移量 {offset} 超出范围 ±{MAX_OFFSET_DAYS}"),
        )),
        _ => Ok(()),
    }
}

impl Template {
    /// 评估学员前的模板校验：锚点必须在目录中，偏移量在允许范围内
    pub fn validate(&self) -> SchedulerResult<AnchorKind> {
        if self.code.trim().is_empty() {
            return Err(SchedulerError::invalid_template(&self.code, "模板编码为空"));
        }
        if self.channel.trim().is_empty() {
            return Err(SchedulerError::invalid_template(&self.code, "渠道为空"));
        }
        let kind = self.anchor.parse::<AnchorKind>()?;
        validate_offset(&self.code, self.offset_days)?;
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_negative_offset_goes_before_anchor() {
        let due = compute_due_date(date(2025, 1, 10), Some(-30), date(2025, 1, 1)).unwrap();
        assert_eq!(due, date(2024, 12, 11));
    }

    #[test]
    fn test_positive_offset() {
        let due = compute_due_date(date(2025, 1, 1), Some(8), date(2025, 1, 9)).unwrap();
        assert_eq!(due, date(2025, 1, 9));
    }

    #[test]
    fn test_zero_offset_is_anchor_date() {
        let due = compute_due_date(date(2025, 5, 20), Some(0), date(2025, 1, 1)).unwrap();
        assert_eq!(due, date(2025, 5, 20));
    }

    #[test]
    fn test_null_offset_is_run_date() {
        let due = compute_due_date(date(2020, 1, 1), None, date(2025, 3, 7)).unwrap();
        assert_eq!(due, date(2025, 3, 7));
    }

    #[test]
    fn test_overflow_is_reported() {
        let err = compute_due_date(NaiveDate::MAX, Some(10), date(2025, 1, 1)).unwrap_err();
        assert!(matches!(err, SchedulerError::MalformedAnchorDate { .. }));
    }

    #[test]
    fn test_tolerance_window() {
        let due = date(2025, 3, 1);
        assert!(is_eligible_today(due, date(2025, 3, 1), DEFAULT_TOLERANCE_DAYS));
        assert!(is_eligible_today(due, date(2025, 3, 2), DEFAULT_TOLERANCE_DAYS));
        assert!(is_eligible_today(due, date(2025, 2, 28), DEFAULT_TOLERANCE_DAYS));
        assert!(!is_eligible_today(due, date(2025, 3, 3), DEFAULT_TOLERANCE_DAYS));
        assert!(!is_eligible_today(due, date(2025, 2, 27), DEFAULT_TOLERANCE_DAYS));
        assert!(!is_eligible_today(due, date(2025, 3, 2), 0));
    }

    #[test]
    fn test_offset_validation() {
        assert!(validate_offset("MSG1", None).is_ok());
        assert!(validate_offset("MSG1", Some(365)).is_ok());
        assert!(validate_offset("MSG1", Some(-365)).is_ok());
        assert!(validate_offset("MSG1", Some(366)).is_err());
        assert!(validate_offset("MSG1", Some(-400)).is_err());
    }

    #[test]
    fn test_template_validation() {
        let template = Template {
            tenant_id: Uuid::new_v4(),
            code: "MSG1".to_string(),
            anchor: "first_workout".to_string(),
            offset_days: Some(8),
            channel: "whatsapp".to_string(),
            active: true,
        };
        assert_eq!(template.validate().unwrap(), AnchorKind::FirstWorkout);

        let unknown = Template {
            anchor: "manual".to_string(),
            ..template.clone()
        };
        assert!(matches!(
            unknown.validate().unwrap_err(),
            SchedulerError::UnknownAnchor(_)
        ));

        let out_of_range = Template {
            offset_days: Some(500),
            ..template
        };
        assert!(matches!(
            out_of_range.validate().unwrap_err(),
            SchedulerError::InvalidTemplate { .. }
        ));
    }
}
