//! 数据集统计.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::dataset::PoolEntry;
use crate::error::{Error, Result};
use crate::scan::PatientLabel;
use crate::store::ScanStore;
use crate::{PatientId, ScanId};

/// 扫描 ID 到患者 ID 的查找表.
///
/// 显式构建并在调用间传递; 存储中的特征表变化后需调用 [`Self::rebuild`].
#[derive(Clone, Debug, Default)]
pub struct ScanPatientLookup {
    owners: HashMap<ScanId, PatientId>,
}

impl ScanPatientLookup {
    /// 由存储中全部带特征的扫描构建.
    pub fn build<S: ScanStore + ?Sized>(store: &S) -> Result<Self> {
        Ok(store
            .labeled_scans()?
            .into_iter()
            .map(|s| (s.scan_id, s.patient_id))
            .collect())
    }

    /// 重新从存储构建.
    pub fn rebuild<S: ScanStore + ?Sized>(&mut self, store: &S) -> Result<()> {
        *self = Self::build(store)?;
        Ok(())
    }

    /// 扫描所属的患者. 未知扫描返回 `Err(NotFound)`.
    #[inline]
    pub fn patient_of(&self, scan_id: ScanId) -> Result<&str> {
        self.owners
            .get(&scan_id)
            .map(String::as_str)
            .ok_or_else(|| Error::not_found(format!("扫描 {scan_id} 的患者")))
    }

    /// 表项个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl FromIterator<(ScanId, PatientId)> for ScanPatientLookup {
    fn from_iter<T: IntoIterator<Item = (ScanId, PatientId)>>(iter: T) -> Self {
        Self {
            owners: iter.into_iter().collect(),
        }
    }
}

/// 单个池 (训练/验证/测试) 的统计.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PoolStats {
    /// 每个标签的扫描数.
    pub scans_per_label: BTreeMap<PatientLabel, usize>,
    /// 每个标签的不同患者数.
    pub patients_per_label: BTreeMap<PatientLabel, usize>,
    /// 不同患者数.
    pub distinct_patients: usize,
    /// 扫描总数.
    pub total_scans: usize,
}

impl PoolStats {
    /// 统计 `pool`. 任一扫描在 `lookup` 中缺失时返回 `Err(NotFound)`.
    pub fn compute(pool: &[PoolEntry], lookup: &ScanPatientLookup) -> Result<Self> {
        let mut scans_per_label = BTreeMap::new();
        let mut patients: BTreeMap<PatientLabel, BTreeSet<&str>> = BTreeMap::new();
        let mut distinct = BTreeSet::new();
        for entry in pool {
            let pid = lookup.patient_of(entry.scan_id)?;
            *scans_per_label.entry(entry.label).or_insert(0) += 1;
            patients.entry(entry.label).or_default().insert(pid);
            distinct.insert(pid);
        }
        Ok(Self {
            scans_per_label,
            patients_per_label: patients.into_iter().map(|(k, v)| (k, v.len())).collect(),
            distinct_patients: distinct.len(),
            total_scans: pool.len(),
        })
    }
}

/// 数据集三个池的统计.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DatasetStats {
    /// 训练池.
    pub training: PoolStats,
    /// 验证池.
    pub validation: PoolStats,
    /// 测试池.
    pub testing: PoolStats,
}
