use crate::market::entity::{PriceBar, QuoteBatch, QuoteRow};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// # Summary
/// 批次被整体拒绝的原因。被拒绝的批次不写入任何行。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchRejection {
    #[error("batch is empty")]
    Empty,
    #[error("row {row} is missing required field `{field}`")]
    MissingField { row: usize, field: &'static str },
    #[error("no row carries a usable date")]
    NoValidDates,
}

/// # Summary
/// 将原始批次规范化为可落库的日线序列。
///
/// # Logic
/// 1. 空批次直接拒绝。
/// 2. 逐行校验必填字段：缺少日期或任一价格/成交量（含 NaN、无穷）即整批拒绝。
/// 3. 日期折算为自然日；无法解析的日期按缺失值丢弃该行。
/// 4. 同一 (code, date) 保留到达顺序中的最后一行。
/// 5. 所有行统一改写为目标代码。
///
/// # Arguments
/// * `code`: 缓存键（原始代码形态）。
/// * `batch`: 待写入批次。
///
/// # Returns
/// 按日期升序、无重复日期的日线列表，或 `BatchRejection`。
pub fn normalize_batch(code: &str, batch: &QuoteBatch) -> Result<Vec<PriceBar>, BatchRejection> {
    if batch.is_empty() {
        return Err(BatchRejection::Empty);
    }

    let mut by_date: BTreeMap<NaiveDate, PriceBar> = BTreeMap::new();
    let mut dropped = 0usize;

    for (row_idx, row) in batch.rows().iter().enumerate() {
        let raw_date = row.date.as_ref().ok_or(BatchRejection::MissingField {
            row: row_idx,
            field: "date",
        })?;
        let [open, high, low, close, volume] = required_values(row_idx, row)?;

        let Some(date) = raw_date.to_day() else {
            dropped += 1;
            continue;
        };

        // 后到达的行覆盖先到达的行
        by_date.insert(
            date,
            PriceBar {
                code: code.to_string(),
                date,
                open,
                high,
                low,
                close,
                volume,
            },
        );
    }

    if dropped > 0 {
        warn!(code, dropped, "rows with unparseable dates were dropped");
    }
    if by_date.is_empty() {
        return Err(BatchRejection::NoValidDates);
    }
    Ok(by_date.into_values().collect())
}

fn required_values(row_idx: usize, row: &QuoteRow) -> Result<[f64; 5], BatchRejection> {
    let fields = [
        ("open", row.open),
        ("high", row.high),
        ("low", row.low),
        ("close", row.close),
        ("volume", row.volume),
    ];
    let mut values = [0.0; 5];
    for (slot, (name, value)) in values.iter_mut().zip(fields) {
        match value {
            Some(v) if v.is_finite() => *slot = v,
            _ => {
                return Err(BatchRejection::MissingField {
                    row: row_idx,
                    field: name,
                });
            }
        }
    }
    Ok(values)
}
