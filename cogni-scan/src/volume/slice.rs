//! 从 3D 体数据中提取固定大小的二维切片.
//!
//! 算法流程:
//!
//! 1. 通过 [`Orientation`] 将逻辑轴换算为物理轴;
//! 2. 按 `floor(floor(dim / 2) * (1 + distance))` 计算切片索引;
//! 3. 取出该索引处的截面, 按物理轴上记录的次数逆时针旋转 90°;
//! 4. 保持长宽比缩放, 使长边恰为 `size`;
//! 5. 粘贴到 `size * size` 的全零画布中心.
//!
//! 该函数是纯函数: 相同输入总是得到逐位相同的输出.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{s, Array2, ArrayView2, ArrayView3, Axis};
use num::ToPrimitive;

use crate::error::{Error, Result};
use crate::volume::Orientation;
use crate::Idx2d;

/// 灰度浮点图像. 像素值需位于 `[0, 1]`, 否则缩放时会被截断.
type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 计算切片索引 `floor(floor(dim / 2) * (1 + distance))`.
///
/// # 注意
///
/// 该公式对奇数维度并不对称, 且在 `distance = 1` 时对偶数维度会得到 `dim`
/// (越界). 为保持与已保存偏移的兼容性, 这里按原样实现, 越界由调用方检查.
#[inline]
pub fn slice_index(dim: usize, distance: f64) -> Option<usize> {
    let half = (dim / 2) as f64;
    (half * (1.0 + distance)).floor().to_usize()
}

/// 提取切片. 参数含义见模块文档.
///
/// # 返回值
///
/// - `axis` 不在 {0, 1, 2} 中, `distance` 不在 `[-1, 1]` 中, `size` 为 0,
///   或切片索引越界时, 返回 `Err(InvalidParameter)`;
/// - 否则返回形状恰为 `(size, size)` 的画布, 像素值归一化到 `[0, 1]`.
pub fn extract(
    volume: ArrayView3<f32>,
    orientation: &Orientation,
    axis: usize,
    distance: f64,
    size: usize,
) -> Result<Array2<f32>> {
    let physical = orientation.resolve(axis)?;
    if !(-1.0..=1.0).contains(&distance) {
        return Err(Error::param(format!("切片偏移必须在 [-1, 1] 内: {distance}")));
    }
    if size == 0 {
        return Err(Error::param("画布边长不能为 0"));
    }

    let dim = volume.len_of(Axis(physical));
    let n = slice_index(dim, distance)
        .filter(|&n| n < dim)
        .ok_or_else(|| Error::param(format!("偏移 {distance} 超出物理轴 {physical} 的范围 {dim}")))?;

    let mut plane = volume.index_axis(Axis(physical), n).to_owned();
    for _ in 0..orientation.rotation().turns(physical)? {
        plane = rotate_ccw(plane.view());
    }
    let (rows, cols) = plane.dim();
    if rows == 0 || cols == 0 {
        return Err(Error::param(format!("空截面: {rows} x {cols}")));
    }

    let (h, w) = fit_into_square((rows, cols), size);
    let resized = resize(normalized(plane.view()), (h, w))?;

    let mut canvas = Array2::<f32>::zeros((size, size));
    let (top, left) = ((size - h) / 2, (size - w) / 2);
    canvas
        .slice_mut(s![top..top + h, left..left + w])
        .assign(&resized);
    Ok(canvas)
}

/// 逆时针旋转 90°. `(h, w)` 的输入得到 `(w, h)` 的输出.
#[inline]
fn rotate_ccw(plane: ArrayView2<f32>) -> Array2<f32> {
    plane.slice_move(s![.., ..;-1]).reversed_axes().to_owned()
}

/// 保持长宽比缩放到 `size` 正方形中后的 (高, 宽). 长边恰为 `size`, 短边向下取整且至少为 1.
fn fit_into_square((rows, cols): Idx2d, size: usize) -> Idx2d {
    let scaled = |short: usize, long: usize| {
        let ratio = short as f64 / long as f64;
        ((size as f64 * ratio) as usize).max(1)
    };
    match rows.cmp(&cols) {
        std::cmp::Ordering::Greater => (size, scaled(cols, rows)),
        std::cmp::Ordering::Less => (scaled(rows, cols), size),
        std::cmp::Ordering::Equal => (size, size),
    }
}

/// 按最小/最大值线性归一化到 `[0, 1]`. 常数截面与非有限值均映射为 0.
fn normalized(plane: ArrayView2<f32>) -> Array2<f32> {
    let (lo, hi) = plane
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !(hi > lo) {
        return Array2::zeros(plane.raw_dim());
    }
    let span = hi - lo;
    plane.mapv(|v| if v.is_finite() { (v - lo) / span } else { 0.0 })
}

/// 三次 (Catmull-Rom) 插值缩放到 `(h, w)`.
fn resize(plane: Array2<f32>, (h, w): Idx2d) -> Result<Array2<f32>> {
    let to_u32 = |v: usize| v.to_u32().ok_or_else(|| Error::param(format!("图像过大: {v}")));
    let (rows, cols) = plane.dim();
    if (rows, cols) == (h, w) {
        return Ok(plane);
    }

    // `iter` 按逻辑行优先序遍历, 与图像缓冲区的布局一致.
    let raw: Vec<f32> = plane.iter().copied().collect();
    let img = GrayF32::from_raw(to_u32(cols)?, to_u32(rows)?, raw)
        .ok_or_else(|| Error::param("图像缓冲区大小不符"))?;
    let out = imageops::resize(&img, to_u32(w)?, to_u32(h)?, FilterType::CatmullRom);
    Array2::from_shape_vec((h, w), out.into_raw()).map_err(|e| Error::param(e.to_string()))
}
