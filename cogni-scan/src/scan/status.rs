//! 健康状态、审核状态与患者轨迹标签.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{health, validation};
use crate::error::{Error, Result};

/// 一次扫描 (或随访) 时的健康状态.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HealthStatus {
    /// 健康.
    Healthy,
    /// 不确定.
    Uncertain,
    /// 痴呆.
    Demented,
}

impl HealthStatus {
    /// 标签中使用的单字符编码.
    #[inline]
    pub fn code(self) -> char {
        match self {
            Self::Healthy => 'H',
            Self::Uncertain => 'U',
            Self::Demented => 'D',
        }
    }

    /// 由编码字符反解. `'?'` 不在此列.
    #[inline]
    fn from_code(c: char) -> Option<Self> {
        match c {
            'H' => Some(Self::Healthy),
            'U' => Some(Self::Uncertain),
            'D' => Some(Self::Demented),
            _ => None,
        }
    }
}

impl TryFrom<u8> for HealthStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            health::HEALTHY => Ok(Self::Healthy),
            health::UNCERTAIN => Ok(Self::Uncertain),
            health::DEMENTED => Ok(Self::Demented),
            _ => Err(Error::param(format!("未知健康状态码: {value}"))),
        }
    }
}

impl From<HealthStatus> for u8 {
    #[inline]
    fn from(value: HealthStatus) -> Self {
        match value {
            HealthStatus::Healthy => health::HEALTHY,
            HealthStatus::Uncertain => health::UNCERTAIN,
            HealthStatus::Demented => health::DEMENTED,
        }
    }
}

/// 扫描的人工审核状态.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ValidationStatus {
    /// 尚未审核.
    #[default]
    Undefined,
    /// 无效.
    Invalid,
    /// 有效.
    Valid,
}

impl TryFrom<u8> for ValidationStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            validation::UNDEFINED => Ok(Self::Undefined),
            validation::INVALID => Ok(Self::Invalid),
            validation::VALID => Ok(Self::Valid),
            _ => Err(Error::param(format!("未知审核状态码: {value}"))),
        }
    }
}

impl From<ValidationStatus> for u8 {
    #[inline]
    fn from(value: ValidationStatus) -> Self {
        match value {
            ValidationStatus::Undefined => validation::UNDEFINED,
            ValidationStatus::Invalid => validation::INVALID,
            ValidationStatus::Valid => validation::VALID,
        }
    }
}

/// 加载扫描时按审核状态过滤.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ValidationFilter {
    /// 不过滤.
    #[default]
    All,
    /// 只保留指定状态.
    Only(ValidationStatus),
}

impl ValidationFilter {
    /// `status` 是否通过过滤.
    #[inline]
    pub fn accepts(&self, status: ValidationStatus) -> bool {
        match self {
            Self::All => true,
            Self::Only(s) => *s == status,
        }
    }
}

/// 患者轨迹标签: 首次扫描时的状态 + 最终随访时的状态, 如 `"HD"`.
///
/// 缺失的状态以 `'?'` 表示, 如 `"?D"`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatientLabel {
    /// 首次扫描时的状态.
    pub entry: Option<HealthStatus>,
    /// 最终随访时的状态.
    pub exit: Option<HealthStatus>,
}

impl PatientLabel {
    /// 直接构建.
    #[inline]
    pub fn new(entry: Option<HealthStatus>, exit: Option<HealthStatus>) -> Self {
        Self { entry, exit }
    }

    /// 始终健康 (`"HH"`).
    pub const HEALTHY_TRACK: PatientLabel = PatientLabel {
        entry: Some(HealthStatus::Healthy),
        exit: Some(HealthStatus::Healthy),
    };

    /// 由健康转为痴呆 (`"HD"`).
    pub const DEMENTED_TRACK: PatientLabel = PatientLabel {
        entry: Some(HealthStatus::Healthy),
        exit: Some(HealthStatus::Demented),
    };
}

#[inline]
fn code_of(s: Option<HealthStatus>) -> char {
    s.map_or(health::MISSING_CODE, HealthStatus::code)
}

impl Display for PatientLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", code_of(self.entry), code_of(self.exit))
    }
}

impl FromStr for PatientLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::param(format!("非法标签: `{s}`"));
        let parse = |c: char| {
            if c == health::MISSING_CODE {
                Ok(None)
            } else {
                HealthStatus::from_code(c).map(Some).ok_or_else(bad)
            }
        };
        let mut chars = s.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(a), Some(b), None) => Ok(Self::new(parse(a)?, parse(b)?)),
            _ => Err(bad()),
        }
    }
}

impl TryFrom<String> for PatientLabel {
    type Error = Error;

    #[inline]
    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PatientLabel> for String {
    #[inline]
    fn from(value: PatientLabel) -> Self {
        value.to_string()
    }
}

/// 加载患者时按轨迹标签过滤.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum LabelFilter {
    /// 不过滤.
    #[default]
    All,
    /// 只保留标签在集合中的患者.
    Only(BTreeSet<PatientLabel>),
}

impl LabelFilter {
    /// `label` 是否通过过滤.
    #[inline]
    pub fn accepts(&self, label: &PatientLabel) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(label),
        }
    }
}

impl FromIterator<PatientLabel> for LabelFilter {
    fn from_iter<T: IntoIterator<Item = PatientLabel>>(iter: T) -> Self {
        Self::Only(iter.into_iter().collect())
    }
}

/// 解析 `"HH-HD"` 形式的标签集合. `"*"` 或空串表示不过滤.
impl FromStr for LabelFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::All);
        }
        s.split('-')
            .map(|t| t.trim().parse::<PatientLabel>())
            .collect()
    }
}
