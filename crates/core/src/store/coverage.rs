use crate::store::port::SeriesMetadata;
use chrono::NaiveDate;

/// # Summary
/// 覆盖判定结果。
///
/// # Invariants
/// - `covered == true` 时 `saved_from`/`saved_to` 一定存在。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    pub covered: bool,
    pub saved_from: Option<NaiveDate>,
    pub saved_to: Option<NaiveDate>,
    // 代入已保存边界后的实际请求区间
    pub requested_from: Option<NaiveDate>,
    pub requested_to: Option<NaiveDate>,
}

impl Coverage {
    /// 供日志使用的可读描述
    pub fn message(&self) -> String {
        match (self.saved_from, self.saved_to) {
            (Some(sf), Some(st)) if self.covered => format!("requested range is cached ({sf} ~ {st})"),
            (Some(sf), Some(st)) => format!(
                "requested range not fully cached (saved {sf} ~ {st}, requested {} ~ {})",
                fmt_day(self.requested_from),
                fmt_day(self.requested_to)
            ),
            _ => "no cached series".to_string(),
        }
    }
}

fn fmt_day(day: Option<NaiveDate>) -> String {
    day.map_or_else(|| "-".to_string(), |d| d.to_string())
}

/// # Summary
/// 判断已保存的元数据是否覆盖请求区间。纯函数，不做任何 I/O。
///
/// # Logic
/// 1. 无元数据 => 未覆盖。
/// 2. 两端均未指定 => 覆盖（返回完整保存区间）。
/// 3. 单端未指定 => 以保存区间的对应端代入。
/// 4. 覆盖当且仅当 `saved_from <= from` 且 `to <= saved_to`。
///
/// # Arguments
/// * `metadata`: 该代码的序列元数据。
/// * `from`: 请求开始日。
/// * `to`: 请求结束日。
///
/// # Returns
/// `Coverage` 判定结果。
pub fn check(
    metadata: Option<&SeriesMetadata>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Coverage {
    let Some(meta) = metadata else {
        return Coverage {
            covered: false,
            saved_from: None,
            saved_to: None,
            requested_from: from,
            requested_to: to,
        };
    };

    let saved_from = meta.from_date;
    let saved_to = meta.to_date;
    let requested_from = from.unwrap_or(saved_from);
    let requested_to = to.unwrap_or(saved_to);

    Coverage {
        covered: saved_from <= requested_from && requested_to <= saved_to,
        saved_from: Some(saved_from),
        saved_to: Some(saved_to),
        requested_from: Some(requested_from),
        requested_to: Some(requested_to),
    }
}
