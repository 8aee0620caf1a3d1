//! 单次扫描.

use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::Array2;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scan::{
    FeatureExtractor, HealthStatus, PatientLabel, ScanFeatures, SliceCode, ValidationStatus,
};
use crate::store::{ScanRow, ScanStore};
use crate::volume::{Orientation, Volume, VolumeDecoder};
use crate::{PatientId, ScanId};

/// 扫描中可编辑、需持久化的部分.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanState {
    /// 轴映射与旋转.
    pub orientation: Orientation,
    /// 三个逻辑轴上计算特征时使用的切片偏移, 取值 `[0, 1)`.
    pub slice_distances: [f64; 3],
    /// 审核状态.
    pub validation: ValidationStatus,
}

/// 当前状态与上次持久化状态的一对快照.
///
/// "脏" 当且仅当两者不同. 因此把某个值改回原值后记录重新变为干净.
#[derive(Copy, Clone, Debug, Default)]
pub struct TrackedState {
    current: ScanState,
    persisted: ScanState,
}

impl TrackedState {
    /// 以 `state` 作为已持久化状态.
    #[inline]
    pub fn new(state: ScanState) -> Self {
        Self {
            current: state,
            persisted: state,
        }
    }

    /// 当前状态.
    #[inline]
    pub fn current(&self) -> &ScanState {
        &self.current
    }

    /// 是否有未保存的修改.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.current != self.persisted
    }

    /// 在当前状态的副本上执行 `edit`; 成功且确有变化时才写回.
    fn update(&mut self, edit: impl FnOnce(&mut ScanState) -> Result<()>) -> Result<()> {
        let mut next = self.current;
        edit(&mut next)?;
        if next != self.current {
            self.current = next;
        }
        Ok(())
    }

    #[inline]
    fn mark_persisted(&mut self) {
        self.persisted = self.current;
    }
}

/// 一次扫描: 标识、元数据、可编辑状态及惰性加载的体数据.
///
/// 体数据在第一次切片时解码, 之后缓存在记录上, 直到
/// [`ScanRecord::restore_original_state`] 或 [`ScanRecord::release_volume`] 被调用.
#[derive(Debug)]
pub struct ScanRecord {
    scan_id: ScanId,
    path: PathBuf,
    days: u32,
    patient_id: PatientId,
    origin: String,
    health_status: HealthStatus,
    state: TrackedState,
    has_features: bool,
    volume: OnceCell<Volume>,
}

impl ScanRecord {
    /// 由扫描表的一行构建.
    pub fn from_row(row: ScanRow, has_features: bool) -> Self {
        let ScanRow {
            scan_id,
            path,
            days,
            patient_id,
            origin,
            health_status,
            state,
        } = row;
        Self {
            scan_id,
            path,
            days,
            patient_id,
            origin,
            health_status,
            state: TrackedState::new(state),
            has_features,
            volume: OnceCell::new(),
        }
    }

    /// 扫描 ID.
    #[inline]
    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }

    /// 体数据文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 距首次就诊的天数.
    #[inline]
    pub fn days(&self) -> u32 {
        self.days
    }

    /// 所属患者.
    #[inline]
    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    /// 数据来源.
    #[inline]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// 扫描时的健康状态.
    #[inline]
    pub fn health_status(&self) -> HealthStatus {
        self.health_status
    }

    /// 当前 (可能未保存的) 状态.
    #[inline]
    pub fn state(&self) -> &ScanState {
        self.state.current()
    }

    /// 当前方向信息.
    #[inline]
    pub fn orientation(&self) -> &Orientation {
        &self.state().orientation
    }

    /// 当前切片偏移.
    #[inline]
    pub fn slice_distances(&self) -> [f64; 3] {
        self.state().slice_distances
    }

    /// 当前审核状态.
    #[inline]
    pub fn validation_status(&self) -> ValidationStatus {
        self.state().validation
    }

    /// 是否有未保存的修改.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    /// 是否已有预计算特征.
    #[inline]
    pub fn has_features(&self) -> bool {
        self.has_features
    }

    /// 体数据是否已解码并缓存.
    #[inline]
    pub fn is_volume_cached(&self) -> bool {
        self.volume.get().is_some()
    }

    /// 显示用 ID: `"{id}:{days:>5}:{code}"`, 如 `"12:  365:H"`.
    pub fn mri_id(&self) -> String {
        format!("{}:{:>5}:{}", self.scan_id, self.days, self.health_status.code())
    }

    /// 设置轴映射 (形如 `"0-2-1"`), 同时清零旋转计数.
    ///
    /// 解析失败时返回 `Err(InvalidAxisMapping)`, 记录不变.
    pub fn set_axis_mapping(&mut self, mapping: &str) -> Result<()> {
        self.state.update(|s| s.orientation.set_mapping(mapping))
    }

    /// 将逻辑轴 `axis` 对应物理轴的旋转计数加一.
    pub fn change_orientation(&mut self, axis: usize) -> Result<()> {
        self.state.update(|s| s.orientation.rotate(axis))
    }

    /// 设置第 `index` 个逻辑轴上的切片偏移. `value` 必须在 `[0, 1)`.
    pub fn set_slice_distance(&mut self, index: usize, value: f64) -> Result<()> {
        if !(0.0..1.0).contains(&value) {
            return Err(Error::param(format!("切片偏移必须在 [0, 1) 内: {value}")));
        }
        self.state.update(|s| {
            let slot = s
                .slice_distances
                .get_mut(index)
                .ok_or_else(|| Error::param(format!("偏移索引必须为 0, 1 或 2: {index}")))?;
            *slot = value;
            Ok(())
        })
    }

    /// 设置审核状态.
    pub fn set_validation_status(&mut self, status: ValidationStatus) -> Result<()> {
        self.state.update(|s| {
            s.validation = status;
            Ok(())
        })
    }

    /// 设置审核状态并立即保存.
    pub fn set_validation_status_and_save<S>(
        &mut self,
        status: ValidationStatus,
        store: &mut S,
    ) -> Result<()>
    where
        S: ScanStore + ?Sized,
    {
        self.set_validation_status(status)?;
        self.save(store)
    }

    /// 持久化当前状态并清除脏标记.
    pub fn save<S: ScanStore + ?Sized>(&mut self, store: &mut S) -> Result<()> {
        store.update_scan_state(self.scan_id, self.state())?;
        self.state.mark_persisted();
        debug!("saved scan {}", self.scan_id);
        Ok(())
    }

    /// 释放已缓存的体数据. 下次切片时重新解码.
    #[inline]
    pub fn release_volume(&mut self) {
        self.volume.take();
    }

    /// 从存储重新加载全部字段, 丢弃未保存的修改和已缓存的体数据.
    ///
    /// # 注意
    ///
    /// 重新加载的 `days` 可能与之前不同. 记录属于某个患者时应通过
    /// [`crate::scan::PatientAggregate::restore_scan`] 调用, 以保持扫描按天数有序.
    pub fn restore_original_state<S: ScanStore + ?Sized>(&mut self, store: &S) -> Result<()> {
        let row = store.scan_row(self.scan_id)?;
        *self = Self::from_row(row, self.has_features);
        debug!("restored scan {}", self.scan_id);
        Ok(())
    }

    /// 提取逻辑轴 `axis` 上偏移为 `distance` 的 `size * size` 切片.
    ///
    /// 体数据只在第一次调用时经 `decoder` 解码. 解码失败不会缓存, 下次调用会重试.
    pub fn slice<D>(
        &self,
        decoder: &D,
        distance: f64,
        axis: usize,
        size: usize,
    ) -> Result<Array2<f32>>
    where
        D: VolumeDecoder + ?Sized,
    {
        let volume = self.volume.get_or_try_init(|| decoder.load_volume(&self.path))?;
        volume.slice(self.orientation(), axis, distance, size)
    }

    /// 计算全部 9 张切片的特征. `label` 为所属患者当前的轨迹标签.
    ///
    /// 已缓存的体数据直接使用; 否则解码一次, 用完即丢弃, 不写入缓存.
    pub fn compute_features<D, E>(
        &self,
        decoder: &D,
        extractor: &E,
        label: PatientLabel,
        size: usize,
    ) -> Result<ScanFeatures>
    where
        D: VolumeDecoder + ?Sized,
        E: FeatureExtractor + ?Sized,
    {
        let local;
        let volume = match self.volume.get() {
            Some(v) => v,
            None => {
                local = decoder.load_volume(&self.path)?;
                &local
            }
        };
        let distances = self.slice_distances();
        let mut slices = std::collections::BTreeMap::new();
        for code in SliceCode::all() {
            let d = code.distance(distances[code.axis()]);
            let tile = volume.slice(self.orientation(), code.axis(), d, size)?;
            slices.insert(code, extractor.extract(tile.view())?);
        }
        info!("computed features for scan {}", self.scan_id);
        Ok(ScanFeatures {
            scan_id: self.scan_id,
            patient_id: self.patient_id.clone(),
            label,
            distances,
            slices,
        })
    }

    #[inline]
    pub(crate) fn mark_has_features(&mut self) {
        self.has_features = true;
    }
}
