#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 管理纵向脑部 MRI 队列: 每位患者多次扫描, 每次扫描附带诊断出的健康状态.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 体数据按 nifti 格式读取, 首次访问时解码并缓存在扫描记录中.
//! 2. 所有持久化都通过 [`store::ScanStore`] 进行, 核心算法不直接接触文件.
//! 3. 数据集划分以患者为单位, 同一患者的扫描永远不会跨池泄漏.
//!
//! # 开发计划
//!
//! ### 切片提取 ✅
//!
//! 三个正交平面, 轴映射与逐轴旋转, 保持宽高比缩放并居中放入正方形.
//!
//! 实现位于 `cogni-scan/src/volume`.
//!
//! ### 扫描/患者/患者集合 ✅
//!
//! 可回滚的编辑状态, 标签计算, 按标签与审核状态过滤.
//!
//! 实现位于 `cogni-scan/src/scan`.
//!
//! ### 存储 ✅
//!
//! 1. 内存存储 ✅
//! 2. 单文件存储 (bincode + zlib, 原子替换) ✅
//!
//! 实现位于 `cogni-scan/src/store`.
//!
//! ### 数据集划分与平衡 ✅
//!
//! 按患者分层的 (训练, 验证, 测试) 划分, 标签间平衡, 统计与特征矩阵导出.
//!
//! 实现位于 `cogni-scan/src/dataset`.
//!
//! ### 并行特征计算 ✅
//!
//! 需要 `rayon` feature.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 扫描 ID.
pub type ScanId = u32;

/// 患者 ID.
pub type PatientId = String;

pub mod config;
pub mod consts;
pub mod dataset;
pub mod error;
pub mod prelude;
pub mod scan;
pub mod store;
pub mod volume;

pub use error::{Error, Result};
