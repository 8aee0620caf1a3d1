//! 通用常量.

/// 健康状态编码.
pub mod health {
    /// 健康.
    pub const HEALTHY: u8 = 0;

    /// 不确定.
    pub const UNCERTAIN: u8 = 1;

    /// 痴呆.
    pub const DEMENTED: u8 = 2;

    /// 健康状态缺失时使用的标签字符.
    pub const MISSING_CODE: char = '?';
}

/// 扫描审核状态编码.
pub mod validation {
    /// 尚未审核.
    pub const UNDEFINED: u8 = 0;

    /// 扫描无效 (信息不足).
    pub const INVALID: u8 = 1;

    /// 扫描有效 (可用于建模).
    pub const VALID: u8 = 2;
}

/// 默认的 (训练, 验证, 测试) 划分比例.
pub const DEFAULT_SPLITS: [f64; 3] = [0.70, 0.15, 0.15];

/// 划分比例之和与 1 的最大允许误差.
pub const SPLIT_TOLERANCE: f64 = 1e-9;

/// 浏览切片时的默认正方形边长.
pub const SLICE_SQUARE_LENGTH: usize = 400;

/// 计算特征时切片的正方形边长.
pub const FEATURE_SQUARE_LENGTH: usize = 200;

/// 默认的 "痴呆轨迹" 标签.
pub const DEMENTED_TRACK: &str = "HD";

/// 默认的 "健康轨迹" 标签.
pub const HEALTHY_TRACK: &str = "HH";
