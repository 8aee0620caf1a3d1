//! 运行时错误.

use thiserror::Error;

/// 统一错误类型.
///
/// 所有参数检查都发生在公开接口的边界上, 内部算法不会再收到非法值.
#[derive(Error, Debug)]
pub enum Error {
    /// 非法参数 (轴、偏移、状态码等).
    #[error("非法参数: {0}")]
    InvalidParameter(String),

    /// 轴映射不是 {0, 1, 2} 的一个排列.
    #[error("非法轴映射: `{0}`")]
    InvalidAxisMapping(String),

    /// 划分比例不合法.
    #[error("非法划分比例: {0}")]
    InvalidSplitConfig(String),

    /// 平衡率不在 (0, 1) 内.
    #[error("非法平衡率: {0}")]
    InvalidBalanceRate(f64),

    /// 未知的患者、扫描或数据集 ID.
    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 体数据文件无法读取或已损坏 (包括文件不存在).
    #[error("体数据解码错误: {0}")]
    Decode(String),

    /// 存储层错误, 原样向上传递.
    #[error("存储错误: {0}")]
    Storage(String),
}

impl Error {
    /// 便捷构造 [`Error::InvalidParameter`].
    #[inline]
    pub(crate) fn param(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// 便捷构造 [`Error::NotFound`].
    #[inline]
    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

impl From<nifti::NiftiError> for Error {
    fn from(value: nifti::NiftiError) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(value: bincode::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

/// 本 crate 的运行结果类型.
pub type Result<T> = std::result::Result<T, Error>;
