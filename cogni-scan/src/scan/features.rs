//! 每次扫描的预计算特征.
//!
//! 每个逻辑轴 `a` 上取三张切片, 偏移分别为 `-d_a`, `0`, `+d_a`, 依次编号 1, 2, 3.
//! 切片编码 `"ap"` 即 "轴 + 位置", 共 9 个: `"01"` .. `"23"`.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scan::PatientLabel;
use crate::{PatientId, ScanId};

/// 图像特征提取器: 输入一张归一化的正方形切片, 输出定长特征向量.
///
/// 具体的网络 (或任何其它提取方法) 不在本 crate 内实现.
pub trait FeatureExtractor {
    /// 提取特征.
    fn extract(&self, tile: ArrayView2<'_, f32>) -> Result<Vec<f32>>;
}

impl<F> FeatureExtractor for F
where
    F: Fn(ArrayView2<'_, f32>) -> Result<Vec<f32>>,
{
    #[inline]
    fn extract(&self, tile: ArrayView2<'_, f32>) -> Result<Vec<f32>> {
        self(tile)
    }
}

/// 切片编码, 形如 `"12"`: 逻辑轴 1 上的中心切片.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SliceCode {
    axis: u8,
    position: u8,
}

impl SliceCode {
    /// 构造. `axis` 必须在 `[0, 2]`, `position` 必须在 `[1, 3]`.
    pub fn new(axis: u8, position: u8) -> Result<Self> {
        if axis < 3 && (1..=3).contains(&position) {
            Ok(Self { axis, position })
        } else {
            Err(Error::param(format!("非法切片编码: {axis}{position}")))
        }
    }

    /// 全部 9 个编码, 升序.
    pub fn all() -> impl Iterator<Item = SliceCode> {
        (0..3u8).flat_map(|axis| (1..=3u8).map(move |position| SliceCode { axis, position }))
    }

    /// 逻辑轴.
    #[inline]
    pub fn axis(&self) -> usize {
        self.axis as usize
    }

    /// 位置 (1, 2, 3).
    #[inline]
    pub fn position(&self) -> u8 {
        self.position
    }

    /// 按该轴上的切片偏移 `d` 计算实际偏移: 位置 1, 2, 3 分别为 `-d`, `0`, `d`.
    #[inline]
    pub fn distance(&self, d: f64) -> f64 {
        match self.position {
            1 => -d,
            2 => 0.0,
            _ => d,
        }
    }
}

impl Display for SliceCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.axis, self.position)
    }
}

impl FromStr for SliceCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::param(format!("非法切片编码: `{s}`"));
        let digits: Vec<u32> = s
            .chars()
            .map(|c| c.to_digit(10))
            .collect::<Option<_>>()
            .ok_or_else(bad)?;
        match digits.as_slice() {
            &[a, p] => Self::new(a as u8, p as u8).map_err(|_| bad()),
            _ => Err(bad()),
        }
    }
}

impl TryFrom<String> for SliceCode {
    type Error = Error;

    #[inline]
    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SliceCode> for String {
    #[inline]
    fn from(value: SliceCode) -> Self {
        value.to_string()
    }
}

/// 一次扫描的全部特征, 连同计算时所用的偏移与患者标签.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanFeatures {
    /// 扫描 ID.
    pub scan_id: ScanId,
    /// 所属患者.
    pub patient_id: PatientId,
    /// 计算时患者的轨迹标签.
    pub label: PatientLabel,
    /// 计算时三个逻辑轴上的切片偏移.
    pub distances: [f64; 3],
    /// 每个切片编码对应的特征向量.
    pub slices: BTreeMap<SliceCode, Vec<f32>>,
}

impl ScanFeatures {
    /// 将 `codes` 对应的特征向量按编码升序拼接.
    ///
    /// 任一编码缺失时返回 `Err(NotFound)`.
    pub fn concat(&self, codes: &[SliceCode]) -> Result<Vec<f32>> {
        let mut codes = codes.to_vec();
        codes.sort_unstable();
        codes.dedup();
        let mut out = Vec::new();
        for code in codes {
            let v = self
                .slices
                .get(&code)
                .ok_or_else(|| Error::not_found(format!("扫描 {} 的切片 {code}", self.scan_id)))?;
            out.extend_from_slice(v);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_code_parse() {
        let all: Vec<String> = SliceCode::all().map(|c| c.to_string()).collect();
        assert_eq!(all, ["01", "02", "03", "11", "12", "13", "21", "22", "23"]);
        for s in &all {
            assert_eq!(&s.parse::<SliceCode>().unwrap().to_string(), s);
        }
        for bad in ["", "0", "00", "04", "31", "1a", "012", "-1"] {
            assert!(bad.parse::<SliceCode>().is_err(), "`{bad}`");
        }
    }

    #[test]
    fn test_slice_distance() {
        let code: SliceCode = "21".parse().unwrap();
        assert_eq!(code.axis(), 2);
        assert_eq!(code.distance(0.3), -0.3);
        assert_eq!("22".parse::<SliceCode>().unwrap().distance(0.3), 0.0);
        assert_eq!("23".parse::<SliceCode>().unwrap().distance(0.3), 0.3);
    }

    #[test]
    fn test_concat_in_code_order() {
        let slices = SliceCode::all()
            .enumerate()
            .map(|(i, c)| (c, vec![i as f32; 2]))
            .collect();
        let f = ScanFeatures {
            scan_id: 7,
            patient_id: "P1".into(),
            label: PatientLabel::HEALTHY_TRACK,
            distances: [0.1, 0.2, 0.3],
            slices,
        };
        let codes = ["12".parse().unwrap(), "01".parse().unwrap()];
        assert_eq!(f.concat(&codes).unwrap(), vec![0.0, 0.0, 4.0, 4.0]);

        let mut partial = f.clone();
        partial.slices.clear();
        assert!(matches!(partial.concat(&codes), Err(Error::NotFound(_))));
    }
}
