pub mod time;

use crate::market::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 代码裁剪重试的最短长度，短于或等于该长度的代码不再裁剪。
pub const MIN_CODE_LEN: usize = 4;

/// # Summary
/// 证券代码值对象，保存调用方传入的原始形态（例如 `7203.JP`）。
///
/// # Invariants
/// - 内部字符串已去除首尾空白且非空。
/// - 不包含路径分隔符、`..` 或控制字符（代码会被用作缓存文件名）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecurityCode(String);

impl SecurityCode {
    /// # Summary
    /// 解析并校验证券代码。
    ///
    /// # Logic
    /// 1. 去除首尾空白，空串视为缺失。
    /// 2. 拒绝包含 `/`、`\`、`..` 或控制字符的代码。
    ///
    /// # Arguments
    /// * `raw`: 调用方输入的代码。
    ///
    /// # Returns
    /// 合法时返回 `SecurityCode`，否则返回 `ValidationError`。
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::BlankCode);
        }
        if trimmed.contains(['/', '\\'])
            || trimmed.contains("..")
            || trimmed.chars().any(char::is_control)
        {
            return Err(ValidationError::InvalidCode(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// # Summary
    /// 去掉第一个 `.` 之后的市场后缀，得到裸代码。
    ///
    /// # Returns
    /// `7203.JP` 返回 `7203`；无后缀时返回原代码。
    pub fn normalized(&self) -> &str {
        match self.0.split_once('.') {
            Some((head, _)) if !head.is_empty() => head,
            _ => &self.0,
        }
    }

    /// 按数据源要求的形态取代码。
    pub fn for_form(&self, form: CodeForm) -> &str {
        match form {
            CodeForm::Normalized => self.normalized(),
            CodeForm::Original => self.as_str(),
        }
    }

    /// # Summary
    /// 生成定位缓存文件时依次尝试的代码变体。
    ///
    /// # Logic
    /// 1. 第一个候选为原始代码。
    /// 2. 代码长度大于 `MIN_CODE_LEN` 时每次去掉末尾一个字符，直到长度为 `MIN_CODE_LEN`。
    ///
    /// # Returns
    /// 从长到短排列的候选列表，至少包含一个元素。
    pub fn file_candidates(&self) -> Vec<String> {
        let chars: Vec<char> = self.0.chars().collect();
        let mut candidates = vec![self.0.clone()];
        let mut len = chars.len();
        while len > MIN_CODE_LEN {
            len -= 1;
            candidates.push(chars[..len].iter().collect());
        }
        candidates
    }
}

/// # Summary
/// 订阅制 API 与上市证券主数据使用的 5 位代码。
///
/// # Logic
/// 4 位代码在末尾补 `0`（`7203` -> `72030`），其余原样返回。
pub fn listed_code(code: &str) -> String {
    if code.chars().count() == MIN_CODE_LEN {
        format!("{code}0")
    } else {
        code.to_string()
    }
}

impl fmt::Display for SecurityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SecurityCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SecurityCode> for String {
    fn from(code: SecurityCode) -> Self {
        code.0
    }
}

/// # Summary
/// 数据源期望的代码形态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeForm {
    // 去掉市场后缀的裸代码 (7203)
    Normalized,
    // 调用方传入的原始代码 (7203.JP)
    Original,
}
