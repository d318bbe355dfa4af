//! 锚点目录与解析
//!
//! 锚点是学员生命周期中的一个事件（首次训练、生日、续费窗口……），
//! 模板以它为零点计算触达日期。锚点集合是封闭的，每个变体自带取值方式。

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use relationship_errors::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};

use crate::entities::Student;

/// 人工任务使用的保留锚点，不经过解析器
pub const MANUAL_ANCHOR: &str = "manual";

/// 锚点的重复周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Once,
    Monthly,
    Yearly,
    /// 每条事件提醒各自构成一个周期
    PerOccurrence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    SaleClose,
    FirstWorkout,
    LastWorkout,
    WeeklyFollowup,
    MonthlyReview,
    Birthday,
    RenewalWindow,
    OccurrenceFollowup,
}

impl AnchorKind {
    pub const ALL: [AnchorKind; 8] = [
        AnchorKind::SaleClose,
        AnchorKind::FirstWorkout,
        AnchorKind::LastWorkout,
        AnchorKind::WeeklyFollowup,
        AnchorKind::MonthlyReview,
        AnchorKind::Birthday,
        AnchorKind::RenewalWindow,
        AnchorKind::OccurrenceFollowup,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            AnchorKind::SaleClose => "sale_close",
            AnchorKind::FirstWorkout => "first_workout",
            AnchorKind::LastWorkout => "last_workout",
            AnchorKind::WeeklyFollowup => "weekly_followup",
            AnchorKind::MonthlyReview => "monthly_review",
            AnchorKind::Birthday => "birthday",
            AnchorKind::RenewalWindow => "renewal_window",
            AnchorKind::OccurrenceFollowup => "occurrence_followup",
        }
    }

    /// 学员上承载该锚点日期的字段名
    pub fn field_name(&self) -> &'static str {
        match self {
            AnchorKind::SaleClose | AnchorKind::MonthlyReview => "created_at",
            AnchorKind::FirstWorkout => "first_workout_date",
            AnchorKind::LastWorkout | AnchorKind::WeeklyFollowup => "last_workout_date",
            AnchorKind::Birthday => "birth_date",
            AnchorKind::RenewalWindow => "plan_end_date",
            AnchorKind::OccurrenceFollowup => "reminder_at",
        }
    }

    /// 从学员读取锚点基准日期，事件跟进取最近一条提醒
    pub fn attribute(&self, student: &Student) -> Option<NaiveDate> {
        match self {
            AnchorKind::SaleClose | AnchorKind::MonthlyReview => {
                Some(student.created_at.date_naive())
            }
            AnchorKind::FirstWorkout => student.first_workout_date,
            AnchorKind::LastWorkout | AnchorKind::WeeklyFollowup => student.last_workout_date,
            AnchorKind::Birthday => student.birth_date,
            AnchorKind::RenewalWindow => student.plan_end_date,
            AnchorKind::OccurrenceFollowup => student.occurrence_reminders.iter().max().copied(),
        }
    }

    pub fn recurrence(&self) -> Recurrence {
        match self {
            AnchorKind::Birthday => Recurrence::Yearly,
            AnchorKind::MonthlyReview => Recurrence::Monthly,
            AnchorKind::OccurrenceFollowup => Recurrence::PerOccurrence,
            _ => Recurrence::Once,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnchorKind::SaleClose => "fechamento da venda",
            AnchorKind::FirstWorkout => "primeiro treino",
            AnchorKind::LastWorkout | AnchorKind::WeeklyFollowup => "último treino",
            AnchorKind::MonthlyReview => "criação da conta",
            AnchorKind::Birthday => "aniversário",
            AnchorKind::RenewalWindow => "vencimento do plano",
            AnchorKind::OccurrenceFollowup => "lembrete da ocorrência",
        }
    }

    /// 面向运营人员的时间描述，写入任务 payload
    pub fn describe(&self, offset_days: Option<i32>) -> String {
        match offset_days {
            None => "Envio imediato".to_string(),
            Some(0) => format!("no momento do {}", self.label()),
            Some(days) if days > 0 => format!("{days} dias após {}", self.label()),
            Some(days) => format!("{} dias antes de {}", days.unsigned_abs(), self.label()),
        }
    }
}

impl fmt::Display for AnchorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for AnchorKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnchorKind::ALL
            .into_iter()
            .find(|kind| kind.code() == s)
            .ok_or_else(|| SchedulerError::UnknownAnchor(s.to_string()))
    }
}

/// 解析学员在本次运行中对应的锚点日期。
///
/// - 字段为空返回 `Ok(None)`，表示尚不满足条件
/// - 字段在存储中格式错误返回 `MalformedAnchorDate`
/// - 周期性锚点和事件跟进返回决定当前周期的那一次出现：
///   有偏移量时取 `出现日 + 偏移` 最接近运行日期的一次；
///   无偏移量时取不晚于运行日期的最近一次
pub fn resolve_anchor(
    student: &Student,
    anchor: AnchorKind,
    run_date: NaiveDate,
    offset_days: Option<i32>,
) -> SchedulerResult<Option<NaiveDate>> {
    let field = anchor.field_name();
    if let Some(raw) = student.malformed_dates.get(field) {
        return Err(SchedulerError::malformed_date(field, raw.clone()));
    }

    let recurrence = anchor.recurrence();
    if recurrence == Recurrence::PerOccurrence {
        return Ok(pick_occurrence(
            student.occurrence_reminders.iter().copied(),
            run_date,
            offset_days,
        ));
    }

    let Some(base) = anchor.attribute(student) else {
        return Ok(None);
    };

    match recurrence {
        Recurrence::Once => Ok(Some(base)),
        _ => {
            let target = match offset_days {
                Some(offset) => shift_days(run_date, -(offset as i64)).unwrap_or(run_date),
                None => run_date,
            };
            Ok(pick_occurrence(
                candidates_around(base, recurrence, target),
                run_date,
                offset_days,
            ))
        }
    }
}

/// 有偏移量时取到期日最接近运行日期的出现日，否则取不晚于运行日期的最近一次
fn pick_occurrence(
    occurrences: impl IntoIterator<Item = NaiveDate>,
    run_date: NaiveDate,
    offset_days: Option<i32>,
) -> Option<NaiveDate> {
    match offset_days {
        Some(offset) => occurrences
            .into_iter()
            .filter_map(|occ| shift_days(occ, offset as i64).map(|due| (occ, due)))
            .min_by_key(|(_, due)| (*due - run_date).num_days().abs())
            .map(|(occ, _)| occ),
        None => occurrences.into_iter().filter(|occ| *occ <= run_date).max(),
    }
}

/// 目标日期前后各一个周期内、且不早于基准日期的出现日
fn candidates_around(base: NaiveDate, recurrence: Recurrence, target: NaiveDate) -> Vec<NaiveDate> {
    let month_index = |d: NaiveDate| d.year() * 12 + d.month0() as i32;
    let centre = month_index(target);
    let step = match recurrence {
        Recurrence::Yearly => 12,
        Recurrence::Monthly => 1,
        Recurrence::Once | Recurrence::PerOccurrence => return vec![base],
    };

    let mut occurrences = Vec::with_capacity(3);
    for delta in [-step, 0, step] {
        let index = match recurrence {
            Recurrence::Yearly => (target.year() + delta / 12) * 12 + base.month0() as i32,
            _ => centre + delta,
        };
        let year = index.div_euclid(12);
        let month = index.rem_euclid(12) as u32 + 1;
        if let Some(occ) = clamped_date(year, month, base.day()) {
            if occ >= base {
                occurrences.push(occ);
            }
        }
    }
    occurrences
}

/// 目标月份没有该日时取当月最后一天（2月29日 -> 2月28日）
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    (28..=day.max(28))
        .rev()
        .find_map(|d| NaiveDate::from_ymd_opt(year, month, d.min(day)))
}

fn shift_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    if days >= 0 {
        date.checked_add_days(chrono::Days::new(days as u64))
    } else {
        date.checked_sub_days(chrono::Days::new(days.unsigned_abs()))
    }
}
