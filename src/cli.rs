use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

/// 命令行入口
#[derive(Parser, Debug)]
#[command(name = "relationship-scheduler")]
#[command(version = "1.0.0")]
#[command(about = "学员关系触达时间调度系统")]
#[command(long_about = "按学员生命周期锚点重算触达任务，并提供任务状态管理和时间线查询")]
pub struct CliApp {
    #[command(subcommand)]
    pub command: Commands,

    /// 配置文件路径，未指定时按默认路径查找
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short = 'l', long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 重算触达任务
    Recalculate(RecalculateArgs),
    /// 创建或升级数据库表结构
    Migrate,
    /// 登记一条人工触达
    Manual(ManualArgs),
    /// 标记任务已发送
    Send {
        #[arg(long)]
        task_id: i64,
        /// 操作人
        #[arg(long)]
        actor: String,
    },
    /// 跳过任务
    Skip {
        #[arg(long)]
        task_id: i64,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// 改期
    Postpone {
        #[arg(long)]
        task_id: i64,
        /// 新的计划日期 (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        #[arg(long)]
        actor: String,
    },
    /// 查询任务看板
    Tasks(TaskListArgs),
    /// 查询时间线
    Timeline {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        student: Option<Uuid>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// 按状态和锚点统计任务
    Summary {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long, value_parser = parse_date)]
        from: NaiveDate,
        #[arg(long, value_parser = parse_date)]
        to: NaiveDate,
    },
}

#[derive(Args, Debug)]
pub struct RecalculateArgs {
    /// 目标租户
    #[arg(long, conflicts_with = "all_tenants", required_unless_present = "all_tenants")]
    pub tenant: Option<Uuid>,

    /// 处理所有存在活跃模板的租户
    #[arg(long)]
    pub all_tenants: bool,

    /// 运行日期 (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub run_date: NaiveDate,

    /// 只计算不写入
    #[arg(long)]
    pub dry_run: bool,

    /// 只处理指定锚点的模板，可重复
    #[arg(long = "anchor")]
    pub anchors: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ManualArgs {
    #[arg(long)]
    pub tenant: Uuid,
    #[arg(long)]
    pub student: Uuid,
    #[arg(long, default_value = "whatsapp")]
    pub channel: String,
    #[arg(long)]
    pub body: String,
    #[arg(long)]
    pub created_by: String,
    /// 分析用的分类标签
    #[arg(long)]
    pub tag: Option<String>,
}

#[derive(Args, Debug)]
pub struct TaskListArgs {
    #[arg(long)]
    pub tenant: Uuid,
    #[arg(long)]
    pub student: Option<Uuid>,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub anchor: Option<String>,
    #[arg(long, value_parser = parse_date)]
    pub from: Option<NaiveDate>,
    #[arg(long, value_parser = parse_date)]
    pub to: Option<NaiveDate>,
    #[arg(long)]
    pub limit: Option<i64>,
    #[arg(long)]
    pub offset: Option<i64>,
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("无效的日期 '{value}'，应为 YYYY-MM-DD: {e}"))
}
