//! 单个患者及其扫描序列.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::scan::{HealthStatus, PatientLabel, ScanRecord};
use crate::store::ScanStore;
use crate::{PatientId, ScanId};

/// 一个患者: 按天数升序排列的扫描, 以及最后一次诊断的健康状态.
#[derive(Debug)]
pub struct PatientAggregate {
    patient_id: PatientId,
    scans: Vec<ScanRecord>,
    exit_status: Option<HealthStatus>,
}

/// 患者的描述性统计.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PatientSummary {
    /// 患者 ID.
    pub patient_id: PatientId,
    /// 轨迹标签.
    pub label: PatientLabel,
    /// 扫描个数.
    pub scan_count: usize,
    /// 不同扫描天数的个数.
    pub distinct_days: usize,
}

impl Display for PatientSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Patient ID ........ {}", self.patient_id)?;
        writeln!(f, "Health Status ..... {}", self.label)?;
        writeln!(f, "Number Of Scans ... {}", self.scan_count)?;
        write!(f, "Distinct Days ..... {}", self.distinct_days)
    }
}

impl PatientAggregate {
    /// 没有任何扫描的新患者.
    #[inline]
    pub fn new(patient_id: impl Into<PatientId>) -> Self {
        Self {
            patient_id: patient_id.into(),
            scans: Vec::new(),
            exit_status: None,
        }
    }

    /// 患者 ID.
    #[inline]
    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    /// 全部扫描, 按天数升序.
    #[inline]
    pub fn scans(&self) -> &[ScanRecord] {
        &self.scans
    }

    /// 全部扫描的可变引用. 顺序不可改变, 故只暴露切片.
    #[inline]
    pub(crate) fn scans_mut(&mut self) -> &mut [ScanRecord] {
        &mut self.scans
    }

    /// 从存储重新加载扫描 `scan_id`, 之后按天数重新排序 (相同天数保持原有先后).
    ///
    /// 扫描不属于该患者时返回 `Err(NotFound)`.
    pub fn restore_scan<S>(&mut self, scan_id: ScanId, store: &S) -> Result<()>
    where
        S: ScanStore + ?Sized,
    {
        self.scans
            .iter_mut()
            .find(|s| s.scan_id() == scan_id)
            .ok_or_else(|| Error::not_found(format!("扫描 {scan_id}")))?
            .restore_original_state(store)?;
        self.scans.sort_by_key(ScanRecord::days);
        Ok(())
    }

    /// 扫描个数.
    #[inline]
    pub fn scan_count(&self) -> usize {
        self.scans.len()
    }

    /// 是否没有任何扫描.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    /// 插入扫描, 保持天数升序. 天数相同时保持插入顺序.
    pub fn add_scan(&mut self, scan: ScanRecord) {
        let at = self.scans.partition_point(|s| s.days() <= scan.days());
        self.scans.insert(at, scan);
    }

    /// 最后一次诊断时的健康状态.
    #[inline]
    pub fn exit_status(&self) -> Option<HealthStatus> {
        self.exit_status
    }

    /// 设置最后一次诊断时的健康状态.
    #[inline]
    pub fn set_exit_status(&mut self, status: HealthStatus) {
        self.exit_status = Some(status);
    }

    /// 轨迹标签: 首次扫描的状态 + 出组状态. 没有扫描或没有诊断记录时对应位置为 `'?'`.
    #[inline]
    pub fn label(&self) -> PatientLabel {
        let entry = self.scans.first().map(ScanRecord::health_status);
        PatientLabel::new(entry, self.exit_status)
    }

    /// 就地删除所有非健康扫描, 其余扫描顺序不变.
    ///
    /// # 注意
    ///
    /// 该操作会改变 [`Self::label`] 的首字母.
    pub fn keep_only_healthy_scans(&mut self) {
        self.scans
            .retain(|s| s.health_status() == HealthStatus::Healthy);
    }

    /// 是否有任一扫描带有预计算特征.
    #[inline]
    pub fn has_features(&self) -> bool {
        self.scans.iter().any(ScanRecord::has_features)
    }

    /// 不同扫描天数的个数.
    pub fn distinct_days(&self) -> usize {
        self.scans
            .iter()
            .map(ScanRecord::days)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// 标题: `"{id} {label}"`.
    #[inline]
    pub fn title(&self) -> String {
        format!("{} {}", self.patient_id, self.label())
    }

    /// 描述性统计.
    pub fn descriptive_data(&self) -> PatientSummary {
        PatientSummary {
            patient_id: self.patient_id.clone(),
            label: self.label(),
            scan_count: self.scan_count(),
            distinct_days: self.distinct_days(),
        }
    }
}
