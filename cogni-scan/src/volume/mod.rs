//! 3D MRI 体数据, 方向信息与切片提取.

use std::ops::Index;
use std::path::Path;

use log::debug;
use ndarray::{Array2, Array3, ArrayView3, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::error::{Error, Result};
use crate::Idx3d;

pub mod orientation;
pub mod slice;

pub use orientation::{AxisMapping, Orientation, RotationState};

/// 3D 体数据. 体素值以 `f32` 保存, 轴顺序与 nifti 文件一致.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, (a, b, c): Idx3d) -> &Self::Output {
        &self.data[[a, b, c]]
    }
}

impl From<Array3<f32>> for Volume {
    #[inline]
    fn from(data: Array3<f32>) -> Self {
        Self { data }
    }
}

impl Volume {
    /// 打开 nii (或 nii.gz) 格式的 MRI 扫描. `path` 为本地路径.
    ///
    /// 文件不存在、格式错误或维度不是 3 时返回 `Err(Decode)`.
    /// 末尾带有长度为 1 的第四维 (单帧时间序列) 的文件会被当作 3D 处理.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let obj = ReaderOptions::new().read_file(path)?;
        let mut data = obj.into_volume().into_ndarray::<f32>()?;

        if data.ndim() == 4 && data.shape()[3] == 1 {
            data = data.index_axis_move(Axis(3), 0);
        }
        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|e| Error::Decode(format!("{}: {e}", path.display())))?;

        debug!("decoded {} with shape {:?}", path.display(), data.dim());
        Ok(Self { data })
    }

    /// 体数据形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 按方向信息 `orientation` 提取逻辑轴 `axis` 上、距中心归一化偏移为
    /// `distance` 的切片, 并缩放到 `size * size` 的正方形画布上.
    ///
    /// 详见 [`slice::extract`].
    #[inline]
    pub fn slice(
        &self,
        orientation: &Orientation,
        axis: usize,
        distance: f64,
        size: usize,
    ) -> Result<Array2<f32>> {
        slice::extract(self.data(), orientation, axis, distance, size)
    }
}

/// 体数据解码器. 将磁盘上的文件读取为 [`Volume`].
pub trait VolumeDecoder {
    /// 读取 `path` 处的体数据. 任何失败都应以 [`Error::Decode`] 返回.
    fn load_volume(&self, path: &Path) -> Result<Volume>;
}

/// 基于 `nifti` crate 的默认解码器.
#[derive(Copy, Clone, Debug, Default)]
pub struct NiftiDecoder;

impl VolumeDecoder for NiftiDecoder {
    #[inline]
    fn load_volume(&self, path: &Path) -> Result<Volume> {
        Volume::open(path)
    }
}

/// 闭包也可直接作为解码器使用, 便于在内存中构造数据.
impl<F> VolumeDecoder for F
where
    F: Fn(&Path) -> Result<Volume>,
{
    #[inline]
    fn load_volume(&self, path: &Path) -> Result<Volume> {
        self(path)
    }
}
