//! 内存中的患者 + 扫描图.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use log::{info, warn};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::scan::{
    FeatureExtractor, LabelFilter, PatientAggregate, PatientLabel, ScanFeatures, ScanRecord,
    ValidationFilter,
};
use crate::store::ScanStore;
use crate::volume::VolumeDecoder;
use crate::{PatientId, ScanId};

/// 一次批量加载得到的患者集合, 按患者 ID 升序.
///
/// 集合拥有全部患者, 患者拥有各自的扫描.
#[derive(Debug, Default)]
pub struct PatientCollectionIndex {
    patients: BTreeMap<PatientId, PatientAggregate>,
    scan_owner: HashMap<ScanId, PatientId>,
}

/// 集合的描述性统计.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CollectionSummary {
    /// 患者数.
    pub patients: usize,
    /// `"HH"` 患者数.
    pub healthy_track: usize,
    /// `"HD"` 患者数.
    pub demented_track: usize,
    /// 扫描总数.
    pub total_scans: usize,
    /// 各患者不同扫描天数之和.
    pub distinct_days: usize,
    /// 至少有一次扫描带预计算特征的患者数.
    pub patients_with_features: usize,
}

impl Display for CollectionSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Number of Patients ........... {}", self.patients)?;
        writeln!(f, "Number of HH Patients ........ {}", self.healthy_track)?;
        writeln!(f, "Number of HD Patients ........ {}", self.demented_track)?;
        writeln!(f, "Total Number of Scans ........ {}", self.total_scans)?;
        writeln!(f, "Distinct Days ................ {}", self.distinct_days)?;
        write!(f, "Patients with features ....... {}", self.patients_with_features)
    }
}

impl PatientCollectionIndex {
    /// 从 `store` 加载.
    ///
    /// 1. 读取带特征的扫描集合, 一次遍历扫描表构建扫描与患者 (不满足
    ///    `validation` 的扫描直接跳过), 并关联出组状态;
    /// 2. 若 `only_healthy`, 对每个患者执行 [`PatientAggregate::keep_only_healthy_scans`];
    /// 3. 只保留标签通过 `labels` 的患者;
    /// 4. 丢弃没有任何扫描的患者.
    pub fn load<S>(
        store: &S,
        labels: &LabelFilter,
        only_healthy: bool,
        validation: ValidationFilter,
    ) -> Result<Self>
    where
        S: ScanStore + ?Sized,
    {
        let with_features = store.scans_with_features()?;
        let exit = store.exit_health_statuses()?;

        let mut patients: BTreeMap<PatientId, PatientAggregate> = BTreeMap::new();
        let mut skipped = 0usize;
        for row in store.scan_rows()? {
            if !validation.accepts(row.state.validation) {
                skipped += 1;
                continue;
            }
            let has_features = with_features.contains(&row.scan_id);
            patients
                .entry(row.patient_id.clone())
                .or_insert_with(|| PatientAggregate::new(row.patient_id.clone()))
                .add_scan(ScanRecord::from_row(row, has_features));
        }

        for (pid, patient) in patients.iter_mut() {
            if let Some(&status) = exit.get(pid) {
                patient.set_exit_status(status);
            }
            if only_healthy {
                patient.keep_only_healthy_scans();
            }
        }
        patients.retain(|_, p| !p.is_empty() && labels.accepts(&p.label()));

        let scan_owner = patients
            .iter()
            .flat_map(|(pid, p)| p.scans().iter().map(move |s| (s.scan_id(), pid.clone())))
            .collect::<HashMap<_, _>>();
        info!(
            "loaded {} patients with {} scans ({skipped} rows skipped by validation filter)",
            patients.len(),
            scan_owner.len()
        );
        Ok(Self {
            patients,
            scan_owner,
        })
    }

    /// 患者个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.patients.len()
    }

    /// 是否没有任何患者.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    /// 全部患者 ID, 升序.
    #[inline]
    pub fn patient_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.patients.keys().map(String::as_str)
    }

    /// 全部患者, 按 ID 升序.
    #[inline]
    pub fn patients(&self) -> impl Iterator<Item = &PatientAggregate> + '_ {
        self.patients.values()
    }

    /// 获取患者. 未知 ID 返回 `Err(NotFound)`.
    pub fn patient(&self, patient_id: &str) -> Result<&PatientAggregate> {
        self.patients
            .get(patient_id)
            .ok_or_else(|| Error::not_found(format!("患者 {patient_id}")))
    }

    /// 获取患者的可变引用. 未知 ID 返回 `Err(NotFound)`.
    pub fn patient_mut(&mut self, patient_id: &str) -> Result<&mut PatientAggregate> {
        self.patients
            .get_mut(patient_id)
            .ok_or_else(|| Error::not_found(format!("患者 {patient_id}")))
    }

    /// 患者的全部扫描, 按天数升序.
    #[inline]
    pub fn scans_by_patient(&self, patient_id: &str) -> Result<&[ScanRecord]> {
        Ok(self.patient(patient_id)?.scans())
    }

    /// 按扫描 ID 获取扫描. 未知 ID 返回 `Err(NotFound)`.
    pub fn scan(&self, scan_id: ScanId) -> Result<&ScanRecord> {
        let pid = self.owner_of(scan_id)?;
        self.patient(pid)?
            .scans()
            .iter()
            .find(|s| s.scan_id() == scan_id)
            .ok_or_else(|| Error::not_found(format!("扫描 {scan_id}")))
    }

    /// 按扫描 ID 获取扫描的可变引用. 未知 ID 返回 `Err(NotFound)`.
    ///
    /// # 注意
    ///
    /// 重新加载扫描请用 [`PatientCollectionIndex::restore_scan`], 以保持患者内的天数顺序.
    pub fn scan_mut(&mut self, scan_id: ScanId) -> Result<&mut ScanRecord> {
        let pid = self.owner_of(scan_id)?.to_string();
        self.patient_mut(&pid)?
            .scans_mut()
            .iter_mut()
            .find(|s| s.scan_id() == scan_id)
            .ok_or_else(|| Error::not_found(format!("扫描 {scan_id}")))
    }

    /// 从存储重新加载扫描 `scan_id`, 见 [`PatientAggregate::restore_scan`].
    pub fn restore_scan<S>(&mut self, scan_id: ScanId, store: &S) -> Result<()>
    where
        S: ScanStore + ?Sized,
    {
        let pid = self.owner_of(scan_id)?.to_string();
        self.patient_mut(&pid)?.restore_scan(scan_id, store)
    }

    #[inline]
    fn owner_of(&self, scan_id: ScanId) -> Result<&str> {
        self.scan_owner
            .get(&scan_id)
            .map(String::as_str)
            .ok_or_else(|| Error::not_found(format!("扫描 {scan_id}")))
    }

    /// 描述性统计.
    pub fn descriptive_data(&self) -> CollectionSummary {
        let mut out = CollectionSummary {
            patients: self.patients.len(),
            ..Default::default()
        };
        for p in self.patients.values() {
            match p.label() {
                PatientLabel::HEALTHY_TRACK => out.healthy_track += 1,
                PatientLabel::DEMENTED_TRACK => out.demented_track += 1,
                _ => {}
            }
            out.total_scans += p.scan_count();
            out.distinct_days += p.distinct_days();
            out.patients_with_features += usize::from(p.has_features());
        }
        out
    }

    /// 以当前各患者的标签整体替换存储中的患者标签表.
    pub fn save_labels<S: ScanStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        let labels = self
            .patients
            .iter()
            .map(|(pid, p)| (pid.clone(), p.label()))
            .collect::<Vec<_>>();
        info!("saving {} patient labels", labels.len());
        store.replace_patient_labels(labels)
    }

    /// 为全部扫描计算特征并整批写入 `store`. 返回写入的扫描个数.
    ///
    /// 每个扫描的体数据用完即释放. 任一扫描失败时不写入任何特征.
    pub fn compute_features<S, D, E>(
        &mut self,
        store: &mut S,
        decoder: &D,
        extractor: &E,
        size: usize,
    ) -> Result<usize>
    where
        S: ScanStore + ?Sized,
        D: VolumeDecoder + ?Sized,
        E: FeatureExtractor + ?Sized,
    {
        let mut features = Vec::new();
        for patient in self.patients.values_mut() {
            let label = patient.label();
            for scan in patient.scans_mut() {
                features.push(scan.compute_features(decoder, extractor, label, size)?);
                scan.release_volume();
            }
        }
        self.commit_features(store, features)
    }

    /// 将已计算的特征整批写入存储并标记对应扫描.
    fn commit_features<S>(&mut self, store: &mut S, features: Vec<ScanFeatures>) -> Result<usize>
    where
        S: ScanStore + ?Sized,
    {
        let ids: Vec<ScanId> = features.iter().map(|f| f.scan_id).collect();
        store.insert_scan_features_batch(features)?;
        for &scan_id in &ids {
            let scan = self.scan_mut(scan_id)?;
            scan.mark_has_features();
            scan.release_volume();
        }
        info!("stored features for {} scans", ids.len());
        Ok(ids.len())
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl PatientCollectionIndex {
    /// 借助 `rayon`, 以患者为单位并行计算特征, 再整批写入 `store`.
    ///
    /// 任一扫描失败时不写入任何特征.
    pub fn par_compute_features<S, D, E>(
        &mut self,
        store: &mut S,
        decoder: &D,
        extractor: &E,
        size: usize,
    ) -> Result<usize>
    where
        S: ScanStore + ?Sized,
        D: VolumeDecoder + Sync + ?Sized,
        E: FeatureExtractor + Sync + ?Sized,
    {
        let per_patient = self
            .patients
            .par_iter()
            .map(|(_, p)| {
                let label = p.label();
                p.scans()
                    .iter()
                    .map(|s| s.compute_features(decoder, extractor, label, size))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        self.commit_features(store, per_patient.into_iter().flatten().collect())
    }
}

/// 删除体数据文件已不存在的扫描. 返回被删除的扫描 ID.
pub fn remove_missing_scans<S: ScanStore + ?Sized>(store: &mut S) -> Result<Vec<ScanId>> {
    let missing: Vec<ScanId> = store
        .scan_rows()?
        .into_iter()
        .filter(|r| !r.path.exists())
        .map(|r| r.scan_id)
        .collect();
    for &scan_id in &missing {
        warn!("removing scan {scan_id}: file not found");
        store.delete_scan(scan_id)?;
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{HealthStatus, ScanState, ValidationStatus};
    use crate::store::{FileStore, MemoryStore, ScanRow};
    use crate::volume::Volume;
    use ndarray::{Array3, ArrayView2};
    use std::collections::HashSet;
    use std::path::Path;

    fn small_volume(_: &Path) -> Result<Volume> {
        Ok(Volume::from(Array3::from_shape_fn((5, 6, 7), |(a, b, c)| (a + b + c) as f32)))
    }

    fn sum_extractor(t: ArrayView2<'_, f32>) -> Result<Vec<f32>> {
        Ok(vec![t.sum()])
    }

    fn row(scan_id: ScanId, patient: &str, days: u32, status: HealthStatus) -> ScanRow {
        ScanRow {
            scan_id,
            path: format!("/nowhere/{scan_id}.nii").into(),
            days,
            patient_id: patient.into(),
            origin: "oasis3".into(),
            health_status: status,
            state: ScanState::default(),
        }
    }

    /// A: HD (H, U, D), B: HH (H, H), C: DD (D), D: 无诊断记录 (H).
    fn cohort() -> MemoryStore {
        use HealthStatus::*;
        let mut store = MemoryStore::new();
        store.insert_scan(row(1, "A", 0, Healthy));
        store.insert_scan(row(2, "A", 400, Uncertain));
        store.insert_scan(row(3, "A", 800, Demented));
        store.insert_scan(row(4, "B", 0, Healthy));
        store.insert_scan(row(5, "B", 365, Healthy));
        store.insert_scan(row(6, "C", 10, Demented));
        store.insert_scan(row(7, "D", 0, Healthy));
        store.record_diagnosis("A", 900, Demented);
        store.record_diagnosis("B", 400, Healthy);
        store.record_diagnosis("C", 10, Demented);
        store
    }

    fn load(store: &MemoryStore, labels: &str, only_healthy: bool) -> PatientCollectionIndex {
        let labels = labels.parse::<LabelFilter>().unwrap();
        PatientCollectionIndex::load(store, &labels, only_healthy, ValidationFilter::All).unwrap()
    }

    #[test]
    fn test_load_all() {
        let store = cohort();
        let c = load(&store, "*", false);
        assert_eq!(c.patient_ids().collect::<Vec<_>>(), ["A", "B", "C", "D"]);
        assert_eq!(c.patient("A").unwrap().label().to_string(), "HD");
        assert_eq!(c.patient("D").unwrap().label().to_string(), "H?");
        assert_eq!(c.scans_by_patient("A").unwrap().len(), 3);
        assert_eq!(c.scan(6).unwrap().patient_id(), "C");
        assert!(matches!(c.patient("Z"), Err(Error::NotFound(_))));
        assert!(matches!(c.scans_by_patient("Z"), Err(Error::NotFound(_))));
        assert!(matches!(c.scan(99), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_label_filter() {
        let store = cohort();
        let c = load(&store, "HH-HD", false);
        assert_eq!(c.patient_ids().collect::<Vec<_>>(), ["A", "B"]);
        let summary = c.descriptive_data();
        assert_eq!(summary.patients, 2);
        assert_eq!(summary.healthy_track, 1);
        assert_eq!(summary.demented_track, 1);
        assert_eq!(summary.total_scans, 5);
        assert_eq!(summary.distinct_days, 5);
        assert_eq!(summary.patients_with_features, 0);
    }

    #[test]
    fn test_only_healthy_drops_empty_patients() {
        let store = cohort();
        let c = load(&store, "*", true);
        // C 只有痴呆扫描, 被整体丢弃.
        assert_eq!(c.patient_ids().collect::<Vec<_>>(), ["A", "B", "D"]);
        assert_eq!(c.scans_by_patient("A").unwrap().len(), 1);
        assert!(matches!(c.scan(2), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_validation_filter_applies_before_grouping() {
        let mut store = cohort();
        let valid = ScanState {
            validation: ValidationStatus::Valid,
            ..Default::default()
        };
        store.update_scan_state(2, &valid).unwrap();
        store.update_scan_state(4, &valid).unwrap();
        let c = PatientCollectionIndex::load(
            &store,
            &LabelFilter::All,
            false,
            ValidationFilter::Only(ValidationStatus::Valid),
        )
        .unwrap();
        assert_eq!(c.patient_ids().collect::<Vec<_>>(), ["A", "B"]);
        // A 的首次扫描被过滤, 标签首字母随之变化.
        assert_eq!(c.patient("A").unwrap().label().to_string(), "UD");
    }

    #[test]
    fn test_edit_and_save_through_index() {
        let mut store = cohort();
        let mut c = load(&store, "*", false);
        let scan = c.scan_mut(3).unwrap();
        scan.set_axis_mapping("2-1-0").unwrap();
        assert!(scan.is_dirty());
        scan.save(&mut store).unwrap();
        assert_eq!(store.scan_row(3).unwrap().state.orientation.mapping().to_string(), "2-1-0");
    }

    #[test]
    fn test_restore_scan_through_index() {
        let mut store = cohort();
        let mut c = load(&store, "*", false);
        c.scan_mut(1).unwrap().set_slice_distance(1, 0.3).unwrap();
        // 首次扫描的天数在存储中被改为最晚.
        store.insert_scan(row(1, "A", 1000, HealthStatus::Healthy));
        c.restore_scan(1, &store).unwrap();
        let scans = c.scans_by_patient("A").unwrap();
        let days: Vec<u32> = scans.iter().map(ScanRecord::days).collect();
        assert_eq!(days, [400, 800, 1000]);
        assert!(!c.scan(1).unwrap().is_dirty());
        assert!(matches!(c.restore_scan(99, &store), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_save_labels() {
        let mut store = cohort();
        let c = load(&store, "*", false);
        c.save_labels(&mut store).unwrap();
        let labels = store.patient_labels().unwrap();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels["C"].to_string(), "DD");
    }

    #[test]
    fn test_compute_features() {
        let mut store = cohort();
        let mut c = load(&store, "HH", false);
        let decoder = |_: &Path| -> Result<Volume> {
            Ok(Volume::from(Array3::from_shape_fn((5, 6, 7), |(a, b, c)| (a + b + c) as f32)))
        };
        let extractor = |t: ArrayView2<'_, f32>| -> Result<Vec<f32>> { Ok(vec![t.sum()]) };
        assert_eq!(c.compute_features(&mut store, &decoder, &extractor, 8).unwrap(), 2);
        assert!(c.patient("B").unwrap().has_features());
        assert_eq!(c.descriptive_data().patients_with_features, 1);

        let labeled = store.labeled_scans().unwrap();
        assert_eq!(labeled.len(), 2);
        assert!(labeled.iter().all(|l| l.label == PatientLabel::HEALTHY_TRACK));
        assert_eq!(store.scan_features(4).unwrap().slices.len(), 9);
    }

    #[test]
    fn test_compute_features_releases_volumes() {
        let mut store = cohort();
        let mut c = load(&store, "*", false);
        c.scan(1).unwrap().slice(&small_volume, 0.0, 0, 8).unwrap();
        assert!(c.scan(1).unwrap().is_volume_cached());

        let n = c.compute_features(&mut store, &small_volume, &sum_extractor, 8).unwrap();
        assert_eq!(n, 7);
        assert!(c.patients.values().flat_map(|p| p.scans()).all(|s| !s.is_volume_cached()));
    }

    #[test]
    fn test_compute_features_failure_writes_nothing() {
        let mut store = cohort();
        let mut c = load(&store, "*", false);
        let decoder = |p: &Path| -> Result<Volume> {
            if p.ends_with("6.nii") {
                Err(Error::Decode(p.display().to_string()))
            } else {
                small_volume(p)
            }
        };
        let r = c.compute_features(&mut store, &decoder, &sum_extractor, 8);
        assert!(matches!(r, Err(Error::Decode(_))));
        assert!(store.scans_with_features().unwrap().is_empty());
        assert_eq!(c.descriptive_data().patients_with_features, 0);
    }

    #[test]
    fn test_compute_features_into_file_store() {
        let path = std::env::temp_dir().join(format!("cogni-scan-{}.bin", uuid::Uuid::new_v4()));
        let mut file_store = FileStore::open(&path).unwrap();
        let mut c = load(&cohort(), "*", false);
        c.compute_features(&mut file_store, &small_volume, &sum_extractor, 8)
            .unwrap();

        let reopened = FileStore::open(&path).unwrap();
        let expected: HashSet<ScanId> = (1..=7).collect();
        assert_eq!(reopened.scans_with_features().unwrap(), expected);
        std::fs::remove_file(&path).unwrap();
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_par_compute_features_matches_sequential() {
        let decoder = |p: &Path| -> Result<Volume> {
            let seed = p.to_string_lossy().len() as f32;
            Ok(Volume::from(Array3::from_shape_fn((5, 6, 7), |(a, b, c)| {
                (a * b + c) as f32 + seed
            })))
        };
        let extractor =
            |t: ArrayView2<'_, f32>| -> Result<Vec<f32>> { Ok(t.iter().copied().collect()) };

        let mut seq_store = cohort();
        let mut seq = load(&seq_store, "*", false);
        seq.compute_features(&mut seq_store, &decoder, &extractor, 8).unwrap();

        let mut par_store = cohort();
        let mut par = load(&par_store, "*", false);
        assert_eq!(par.par_compute_features(&mut par_store, &decoder, &extractor, 8).unwrap(), 7);
        for id in 1..=7 {
            assert_eq!(seq_store.scan_features(id).unwrap(), par_store.scan_features(id).unwrap());
        }
    }

    #[test]
    fn test_remove_missing_scans() {
        let mut store = cohort();
        let existing = std::env::temp_dir().join(format!("{}.nii", uuid::Uuid::new_v4()));
        std::fs::write(&existing, b"").unwrap();
        let mut keep = row(8, "E", 0, HealthStatus::Healthy);
        keep.path = existing.clone();
        store.insert_scan(keep);

        let removed = remove_missing_scans(&mut store).unwrap();
        assert_eq!(removed.len(), 7);
        assert_eq!(store.scan_rows().unwrap().len(), 1);
        std::fs::remove_file(existing).unwrap();
    }
}
