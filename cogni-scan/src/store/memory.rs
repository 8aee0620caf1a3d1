use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetRecord;
use crate::error::{Error, Result};
use crate::scan::{HealthStatus, PatientLabel, ScanFeatures, ScanState};
use crate::store::{LabeledScan, ScanRow, ScanStore};
use crate::{PatientId, ScanId};

/// 一次诊断记录: (天数, 健康状态).
type Diagnosis = (u32, HealthStatus);

/// 纯内存存储. 也是 [`crate::store::FileStore`] 的序列化载体.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    scans: BTreeMap<ScanId, ScanRow>,
    diagnoses: BTreeMap<PatientId, Vec<Diagnosis>>,
    features: BTreeMap<ScanId, ScanFeatures>,
    labels: BTreeMap<PatientId, PatientLabel>,
    datasets: Vec<DatasetRecord>,
}

impl MemoryStore {
    /// 空存储.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入 (或覆盖) 一行扫描.
    pub fn insert_scan(&mut self, row: ScanRow) {
        self.scans.insert(row.scan_id, row);
    }

    /// 记录一次诊断. 患者的 "出组状态" 取天数最大的一次 (相同天数取后记录者).
    pub fn record_diagnosis(&mut self, patient_id: &str, days: u32, status: HealthStatus) {
        self.diagnoses
            .entry(patient_id.to_string())
            .or_default()
            .push((days, status));
    }

    /// 扫描行数.
    #[inline]
    pub fn scan_count(&self) -> usize {
        self.scans.len()
    }

    #[inline]
    fn row_mut(&mut self, scan_id: ScanId) -> Result<&mut ScanRow> {
        self.scans
            .get_mut(&scan_id)
            .ok_or_else(|| Error::not_found(format!("扫描 {scan_id}")))
    }
}

impl ScanStore for MemoryStore {
    fn scan_rows(&self) -> Result<Vec<ScanRow>> {
        let mut rows: Vec<ScanRow> = self.scans.values().cloned().collect();
        rows.sort_by(|a, b| {
            (&a.patient_id, a.days, a.scan_id).cmp(&(&b.patient_id, b.days, b.scan_id))
        });
        Ok(rows)
    }

    fn scan_row(&self, scan_id: ScanId) -> Result<ScanRow> {
        self.scans
            .get(&scan_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("扫描 {scan_id}")))
    }

    fn update_scan_state(&mut self, scan_id: ScanId, state: &ScanState) -> Result<()> {
        self.row_mut(scan_id)?.state = *state;
        Ok(())
    }

    fn delete_scan(&mut self, scan_id: ScanId) -> Result<()> {
        self.scans
            .remove(&scan_id)
            .ok_or_else(|| Error::not_found(format!("扫描 {scan_id}")))?;
        self.features.remove(&scan_id);
        Ok(())
    }

    fn exit_health_statuses(&self) -> Result<HashMap<PatientId, HealthStatus>> {
        Ok(self
            .diagnoses
            .iter()
            .filter_map(|(pid, list)| {
                // `max_by_key` 在相等时返回最后一个元素.
                let &(_, status) = list.iter().max_by_key(|(days, _)| *days)?;
                Some((pid.clone(), status))
            })
            .collect())
    }

    fn scans_with_features(&self) -> Result<HashSet<ScanId>> {
        Ok(self.features.keys().copied().collect())
    }

    fn labeled_scans(&self) -> Result<Vec<LabeledScan>> {
        Ok(self
            .features
            .values()
            .map(|f| LabeledScan {
                patient_id: f.patient_id.clone(),
                scan_id: f.scan_id,
                label: f.label,
            })
            .collect())
    }

    fn scan_features(&self, scan_id: ScanId) -> Result<ScanFeatures> {
        self.features
            .get(&scan_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("扫描 {scan_id} 的特征")))
    }

    fn insert_scan_features(&mut self, features: ScanFeatures) -> Result<()> {
        self.features.insert(features.scan_id, features);
        Ok(())
    }

    fn replace_patient_labels(&mut self, labels: Vec<(PatientId, PatientLabel)>) -> Result<()> {
        self.labels = labels.into_iter().collect();
        Ok(())
    }

    fn patient_labels(&self) -> Result<HashMap<PatientId, PatientLabel>> {
        Ok(self.labels.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    fn insert_dataset(&mut self, record: &DatasetRecord) -> Result<()> {
        if self.datasets.iter().any(|d| d.id == record.id) {
            return Err(Error::Storage(format!("数据集 {} 已存在", record.id)));
        }
        self.datasets.push(record.clone());
        Ok(())
    }

    fn dataset(&self, dataset_id: &str) -> Result<DatasetRecord> {
        self.datasets
            .iter()
            .find(|d| d.id == dataset_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("数据集 {dataset_id}")))
    }

    fn datasets(&self) -> Result<Vec<DatasetRecord>> {
        Ok(self.datasets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ValidationStatus;

    fn row(scan_id: ScanId, patient: &str, days: u32) -> ScanRow {
        ScanRow {
            scan_id,
            path: format!("/nowhere/{scan_id}.nii").into(),
            days,
            patient_id: patient.to_string(),
            origin: "oasis3".into(),
            health_status: HealthStatus::Healthy,
            state: ScanState::default(),
        }
    }

    #[test]
    fn test_scan_rows_are_ordered() {
        let mut store = MemoryStore::new();
        store.insert_scan(row(3, "B", 0));
        store.insert_scan(row(1, "B", 10));
        store.insert_scan(row(2, "A", 5));
        store.insert_scan(row(4, "B", 0));
        let ids: Vec<ScanId> = store.scan_rows().unwrap().iter().map(|r| r.scan_id).collect();
        assert_eq!(ids, [2, 3, 4, 1]);
    }

    #[test]
    fn test_update_and_delete() {
        let mut store = MemoryStore::new();
        store.insert_scan(row(1, "A", 0));
        let mut state = ScanState::default();
        state.validation = ValidationStatus::Valid;
        store.update_scan_state(1, &state).unwrap();
        assert_eq!(store.scan_row(1).unwrap().state.validation, ValidationStatus::Valid);

        assert!(matches!(store.update_scan_state(9, &state), Err(Error::NotFound(_))));
        store.delete_scan(1).unwrap();
        assert!(matches!(store.scan_row(1), Err(Error::NotFound(_))));
        assert!(matches!(store.delete_scan(1), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_exit_status_is_latest_diagnosis() {
        let mut store = MemoryStore::new();
        store.record_diagnosis("A", 0, HealthStatus::Healthy);
        store.record_diagnosis("A", 900, HealthStatus::Demented);
        store.record_diagnosis("A", 300, HealthStatus::Uncertain);
        store.record_diagnosis("B", 5, HealthStatus::Uncertain);
        store.record_diagnosis("B", 5, HealthStatus::Healthy);
        let exit = store.exit_health_statuses().unwrap();
        assert_eq!(exit["A"], HealthStatus::Demented);
        assert_eq!(exit["B"], HealthStatus::Healthy);
        assert!(!exit.contains_key("C"));
    }

    #[test]
    fn test_duplicate_dataset_is_rejected() {
        let mut store = MemoryStore::new();
        let record = DatasetRecord {
            id: "d1".into(),
            description: "Balanced".into(),
            train_pool: vec![],
            val_pool: vec![],
            test_pool: vec![],
        };
        store.insert_dataset(&record).unwrap();
        assert!(matches!(store.insert_dataset(&record), Err(Error::Storage(_))));
        assert_eq!(store.dataset("d1").unwrap(), record);
        assert!(matches!(store.dataset("d2"), Err(Error::NotFound(_))));
        assert_eq!(store.datasets().unwrap().len(), 1);
    }
}
