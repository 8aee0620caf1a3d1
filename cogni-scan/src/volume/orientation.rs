//! 逻辑轴到物理轴的映射, 以及每个物理轴上的旋转计数.
//!
//! 不同来源 (如 Oasis-2 与 Oasis-3) 的体数据存储方向不一致.
//! 我们用 "逻辑轴" 表示用户想看的方向 (0, 1, 2), 用轴映射将其换算成体数据的
//! "物理轴", 再按该物理轴上记录的 1/4 圈数旋转切片.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// 轴的个数.
const AXES: usize = 3;

/// 检查轴索引是否合法.
#[inline]
fn check_axis(axis: usize) -> Result<usize> {
    if axis < AXES {
        Ok(axis)
    } else {
        Err(Error::param(format!("轴必须为 0, 1 或 2, 但得到了 `{axis}`")))
    }
}

/// 逻辑轴到物理轴的双射. 保证永远是 {0, 1, 2} 的一个排列.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[usize; 3]", into = "[usize; 3]")]
pub struct AxisMapping([usize; AXES]);

impl AxisMapping {
    /// 恒等映射.
    pub const IDENTITY: AxisMapping = AxisMapping([0, 1, 2]);

    /// 由数组直接构建. 数组不是 {0, 1, 2} 的排列时返回 `Err(InvalidAxisMapping)`.
    pub fn new(perm: [usize; AXES]) -> Result<Self> {
        let mut seen = [false; AXES];
        for &p in perm.iter() {
            match seen.get_mut(p) {
                Some(s) if !*s => *s = true,
                _ => return Err(Error::InvalidAxisMapping(format!("{perm:?}"))),
            }
        }
        Ok(Self(perm))
    }

    /// 逻辑轴 `logical` 对应的物理轴.
    #[inline]
    pub fn physical(&self, logical: usize) -> Result<usize> {
        Ok(self.0[check_axis(logical)?])
    }

    /// 以数组形式获取映射.
    #[inline]
    pub fn as_array(&self) -> [usize; AXES] {
        self.0
    }
}

impl Default for AxisMapping {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl TryFrom<[usize; AXES]> for AxisMapping {
    type Error = Error;

    #[inline]
    fn try_from(value: [usize; AXES]) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AxisMapping> for [usize; AXES] {
    #[inline]
    fn from(value: AxisMapping) -> Self {
        value.0
    }
}

/// 解析形如 `"1-2-0"` 的描述. 必须恰好有三个以 `-` 分隔的整数.
impl FromStr for AxisMapping {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InvalidAxisMapping(s.to_string());
        let tokens: Vec<&str> = s.split('-').map(str::trim).collect();
        let [a, b, c] = tokens.as_slice() else {
            return Err(bad());
        };
        let mut perm = [0usize; AXES];
        for (slot, tok) in perm.iter_mut().zip([a, b, c]) {
            *slot = tok.parse().map_err(|_| bad())?;
        }
        Self::new(perm).map_err(|_| bad())
    }
}

impl Display for AxisMapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}-{b}-{c}")
    }
}

/// 每个物理轴上的逆时针 90° 旋转次数, 取值 `[0, 3]`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u8; 3]", into = "[u8; 3]")]
pub struct RotationState([u8; AXES]);

impl RotationState {
    /// 由数组直接构建. 任一分量不小于 4 时返回 `Err(InvalidParameter)`.
    pub fn new(turns: [u8; AXES]) -> Result<Self> {
        if turns.iter().all(|&t| t < 4) {
            Ok(Self(turns))
        } else {
            Err(Error::param(format!("旋转次数必须在 [0, 3] 内: {turns:?}")))
        }
    }

    /// 物理轴 `physical` 上的旋转次数.
    #[inline]
    pub fn turns(&self, physical: usize) -> Result<u8> {
        Ok(self.0[check_axis(physical)?])
    }

    /// 以数组形式获取旋转状态.
    #[inline]
    pub fn as_array(&self) -> [u8; AXES] {
        self.0
    }

    /// 物理轴 `physical` 上的计数加一 (模 4).
    #[inline]
    fn turn(&mut self, physical: usize) {
        self.0[physical] = (self.0[physical] + 1) % 4;
    }
}

impl TryFrom<[u8; AXES]> for RotationState {
    type Error = Error;

    #[inline]
    fn try_from(value: [u8; AXES]) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RotationState> for [u8; AXES] {
    #[inline]
    fn from(value: RotationState) -> Self {
        value.0
    }
}

/// 轴映射 + 旋转状态, 即切片寻址所需的全部方向信息.
///
/// 相同初始状态下相同的调用序列总是得到相同的结果.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Orientation {
    mapping: AxisMapping,
    rotation: RotationState,
}

impl Orientation {
    /// 直接组合.
    #[inline]
    pub fn new(mapping: AxisMapping, rotation: RotationState) -> Self {
        Self { mapping, rotation }
    }

    /// 当前轴映射.
    #[inline]
    pub fn mapping(&self) -> AxisMapping {
        self.mapping
    }

    /// 当前旋转状态.
    #[inline]
    pub fn rotation(&self) -> RotationState {
        self.rotation
    }

    /// 解析 `mapping` (形如 `"0-2-1"`) 并设置轴映射. 成功时所有旋转计数清零;
    /// 失败时返回 `Err(InvalidAxisMapping)`, 且状态不变.
    pub fn set_mapping(&mut self, mapping: &str) -> Result<()> {
        self.mapping = mapping.parse()?;
        self.rotation = RotationState::default();
        Ok(())
    }

    /// 逻辑轴对应的物理轴. `logical` 不在 {0, 1, 2} 中时返回 `Err(InvalidParameter)`.
    #[inline]
    pub fn resolve(&self, logical: usize) -> Result<usize> {
        self.mapping.physical(logical)
    }

    /// 将逻辑轴 `logical` **所对应物理轴** 的旋转计数加一 (模 4).
    pub fn rotate(&mut self, logical: usize) -> Result<()> {
        let physical = self.resolve(logical)?;
        self.rotation.turn(physical);
        Ok(())
    }

    /// 逻辑轴 `logical` 解析后应施加的逆时针 1/4 圈数.
    #[inline]
    pub fn quarter_turns(&self, logical: usize) -> Result<u8> {
        self.rotation.turns(self.resolve(logical)?)
    }
}
