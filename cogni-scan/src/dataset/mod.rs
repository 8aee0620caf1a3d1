//! 数据集: 持久化的训练/验证/测试扫描池, 以及由其生成的特征矩阵.

use std::fs::File;
use std::path::Path;

use log::info;
use ndarray::{Array1, Array2};
use ndarray_npy::NpzWriter;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scan::{PatientLabel, SliceCode};
use crate::store::ScanStore;
use crate::ScanId;

pub mod split;
pub mod stats;

pub use split::{balance, DatasetSplitter, Pools, SplitConfig};
pub use stats::{DatasetStats, PoolStats, ScanPatientLookup};

/// 池中的一项.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolEntry {
    /// 扫描 ID.
    pub scan_id: ScanId,
    /// 所属患者的轨迹标签.
    pub label: PatientLabel,
}

/// 持久化的数据集记录. 写入后只读.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRecord {
    /// 唯一 ID (uuid).
    pub id: String,
    /// 描述, 如 `"Balanced"`.
    pub description: String,
    /// 训练池.
    pub train_pool: Vec<PoolEntry>,
    /// 验证池.
    pub val_pool: Vec<PoolEntry>,
    /// 测试池.
    pub test_pool: Vec<PoolEntry>,
}

impl DatasetRecord {
    /// 导出为 JSON.
    #[inline]
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// 从 JSON 读取.
    #[inline]
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// 一个数据集的全部特征矩阵.
///
/// `x_*` 每行对应一次扫描, 为所选切片特征按编码升序的拼接; `y_*` 为 0/1 标签.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMatrices {
    /// 训练特征.
    pub x_train: Array2<f32>,
    /// 训练标签.
    pub y_train: Array1<u8>,
    /// 验证特征.
    pub x_val: Array2<f32>,
    /// 验证标签.
    pub y_val: Array1<u8>,
    /// 测试特征.
    pub x_test: Array2<f32>,
    /// 测试标签.
    pub y_test: Array1<u8>,
}

impl FeatureMatrices {
    /// 以 `X_train`, `Y_train`, ... 为名写入压缩的 `.npz` 文件.
    pub fn write_npz<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let storage =
            |e: &dyn std::fmt::Display| Error::Storage(format!("{}: {e}", path.display()));
        let file = File::create(path).map_err(|e| storage(&e))?;
        let mut npz = NpzWriter::new_compressed(file);
        let xs = [("X_train", &self.x_train), ("X_val", &self.x_val), ("X_test", &self.x_test)];
        for (name, x) in xs {
            npz.add_array(name, x).map_err(|e| storage(&e))?;
        }
        let ys = [("Y_train", &self.y_train), ("Y_val", &self.y_val), ("Y_test", &self.y_test)];
        for (name, y) in ys {
            npz.add_array(name, y).map_err(|e| storage(&e))?;
        }
        npz.finish().map_err(|e| storage(&e))?;
        Ok(())
    }
}

/// 数据集接口.
pub trait ScanDataset {
    /// 数据集 ID.
    fn dataset_id(&self) -> &str;

    /// 描述.
    fn description(&self) -> &str;

    /// 三个池的统计.
    fn stats(&self) -> &DatasetStats;

    /// 由存储中的扫描特征生成特征矩阵.
    ///
    /// 三个池先各自打乱; 标签等于 `negative` 的扫描记为 0, 其余记为 1.
    /// `slices` 为空时返回 `Err(InvalidParameter)`.
    fn features<S, R>(
        &self,
        store: &S,
        slices: &[SliceCode],
        negative: PatientLabel,
        rng: &mut R,
    ) -> Result<FeatureMatrices>
    where
        S: ScanStore + ?Sized,
        R: Rng + ?Sized;
}

/// 存储中的数据集.
#[derive(Clone, Debug)]
pub struct StoredDataset {
    record: DatasetRecord,
    stats: DatasetStats,
}

impl StoredDataset {
    /// 由记录构建, 同时计算统计信息.
    pub fn new(record: DatasetRecord, lookup: &ScanPatientLookup) -> Result<Self> {
        let stats = DatasetStats {
            training: PoolStats::compute(&record.train_pool, lookup)?,
            validation: PoolStats::compute(&record.val_pool, lookup)?,
            testing: PoolStats::compute(&record.test_pool, lookup)?,
        };
        Ok(Self { record, stats })
    }

    /// 按 ID 读取. 不存在时返回 `Err(NotFound)`.
    pub fn load<S: ScanStore + ?Sized>(
        store: &S,
        dataset_id: &str,
        lookup: &ScanPatientLookup,
    ) -> Result<Self> {
        Self::new(store.dataset(dataset_id)?, lookup)
    }

    /// 读取全部数据集.
    pub fn all<S: ScanStore + ?Sized>(store: &S, lookup: &ScanPatientLookup) -> Result<Vec<Self>> {
        store
            .datasets()?
            .into_iter()
            .map(|r| Self::new(r, lookup))
            .collect()
    }

    /// 底层记录.
    #[inline]
    pub fn record(&self) -> &DatasetRecord {
        &self.record
    }
}

impl ScanDataset for StoredDataset {
    #[inline]
    fn dataset_id(&self) -> &str {
        &self.record.id
    }

    #[inline]
    fn description(&self) -> &str {
        &self.record.description
    }

    #[inline]
    fn stats(&self) -> &DatasetStats {
        &self.stats
    }

    fn features<S, R>(
        &self,
        store: &S,
        slices: &[SliceCode],
        negative: PatientLabel,
        rng: &mut R,
    ) -> Result<FeatureMatrices>
    where
        S: ScanStore + ?Sized,
        R: Rng + ?Sized,
    {
        if slices.is_empty() {
            return Err(Error::param("至少需要选择一张切片"));
        }
        let mut pool_rows = |pool: &[PoolEntry]| -> Result<(Vec<Vec<f32>>, Array1<u8>)> {
            let mut pool = pool.to_vec();
            pool.shuffle(&mut *rng);
            let rows = pool
                .iter()
                .map(|e| store.scan_features(e.scan_id)?.concat(slices))
                .collect::<Result<Vec<_>>>()?;
            let y = pool.iter().map(|e| u8::from(e.label != negative)).collect();
            Ok((rows, y))
        };
        let (train, y_train) = pool_rows(&self.record.train_pool)?;
        let (val, y_val) = pool_rows(&self.record.val_pool)?;
        let (test, y_test) = pool_rows(&self.record.test_pool)?;

        // 三个矩阵共用列数, 空池也是 `(0, k)`.
        let k = [&train, &val, &test]
            .into_iter()
            .find_map(|rows| rows.first())
            .map_or(0, Vec::len);
        let x_train = stack_rows(train, k)?;
        let x_val = stack_rows(val, k)?;
        let x_test = stack_rows(test, k)?;
        info!(
            "features of dataset {}: train {:?}, val {:?}, test {:?}",
            self.record.id,
            x_train.dim(),
            x_val.dim(),
            x_test.dim()
        );
        Ok(FeatureMatrices {
            x_train,
            y_train,
            x_val,
            y_val,
            x_test,
            y_test,
        })
    }
}

/// 将长度均为 `k` 的行拼为 `(n, k)` 矩阵.
fn stack_rows(rows: Vec<Vec<f32>>, k: usize) -> Result<Array2<f32>> {
    let n = rows.len();
    if rows.iter().any(|r| r.len() != k) {
        return Err(Error::Storage("各扫描的特征长度不一致".to_string()));
    }
    Array2::from_shape_vec((n, k), rows.concat()).map_err(|e| Error::Storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanFeatures;
    use crate::store::MemoryStore;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn record() -> DatasetRecord {
        let e = |scan_id, label: &str| PoolEntry {
            scan_id,
            label: label.parse().unwrap(),
        };
        DatasetRecord {
            id: "ds-1".into(),
            description: "Balanced".into(),
            train_pool: vec![e(1, "HD"), e(2, "HH"), e(3, "HH")],
            val_pool: vec![e(4, "HD")],
            test_pool: vec![],
        }
    }

    /// 扫描 `i` 的切片 `c` 特征为 `[i * 100 + c.axis() * 10 + c.position()]`.
    fn store_for(record: &DatasetRecord) -> MemoryStore {
        let mut store = MemoryStore::new();
        let pools = [&record.train_pool, &record.val_pool, &record.test_pool];
        for e in pools.into_iter().flatten() {
            let value = |c: SliceCode| {
                (e.scan_id as usize * 100 + c.axis() * 10 + c.position() as usize) as f32
            };
            let slices = SliceCode::all().map(|c| (c, vec![value(c)])).collect();
            store
                .insert_scan_features(ScanFeatures {
                    scan_id: e.scan_id,
                    patient_id: format!("P{}", e.scan_id % 2),
                    label: e.label,
                    distances: [0.1; 3],
                    slices,
                })
                .unwrap();
        }
        store.insert_dataset(record).unwrap();
        store
    }

    #[test]
    fn test_json_layout() {
        let json = record().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], "ds-1");
        assert_eq!(value["trainPool"][0]["scanId"], 1);
        assert_eq!(value["trainPool"][0]["label"], "HD");
        assert!(value["valPool"].is_array());
        assert!(value["testPool"].as_array().unwrap().is_empty());
        assert_eq!(DatasetRecord::from_json(&json).unwrap(), record());
    }

    #[test]
    fn test_stats_through_lookup() {
        let store = store_for(&record());
        let lookup = ScanPatientLookup::build(&store).unwrap();
        let ds = StoredDataset::load(&store, "ds-1", &lookup).unwrap();
        assert_eq!(ds.dataset_id(), "ds-1");
        assert_eq!(ds.description(), "Balanced");
        assert_eq!(ds.stats().training.total_scans, 3);
        assert_eq!(ds.stats().training.distinct_patients, 2);
        assert_eq!(ds.stats().validation.total_scans, 1);
        assert_eq!(ds.stats().testing, PoolStats::default());

        assert!(matches!(
            StoredDataset::load(&store, "nope", &lookup),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            StoredDataset::new(record(), &ScanPatientLookup::default()),
            Err(Error::NotFound(_))
        ));
        assert_eq!(StoredDataset::all(&store, &lookup).unwrap().len(), 1);
    }

    #[test]
    fn test_features() {
        let store = store_for(&record());
        let lookup = ScanPatientLookup::build(&store).unwrap();
        let ds = StoredDataset::load(&store, "ds-1", &lookup).unwrap();
        let slices: Vec<SliceCode> = ["22", "01"].iter().map(|s| s.parse().unwrap()).collect();
        let mut rng = Pcg64::seed_from_u64(11);
        let m = ds
            .features(&store, &slices, PatientLabel::HEALTHY_TRACK, &mut rng)
            .unwrap();

        assert_eq!(m.x_train.dim(), (3, 2));
        assert_eq!(m.x_val.dim(), (1, 2));
        assert_eq!(m.x_test.dim(), (0, 2));
        assert_eq!(m.y_test.len(), 0);
        assert_eq!(m.y_val.to_vec(), vec![1]);
        for (row, &y) in m.x_train.rows().into_iter().zip(m.y_train.iter()) {
            let scan_id = (row[0] as usize) / 100;
            // 按编码升序: 先 "01" 再 "22".
            assert_eq!(row[0] as usize, scan_id * 100 + 1);
            assert_eq!(row[1] as usize, scan_id * 100 + 22);
            assert_eq!(y, u8::from(scan_id == 1));
        }

        assert!(matches!(
            ds.features(&store, &[], PatientLabel::HEALTHY_TRACK, &mut rng),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_stack_rows() {
        assert_eq!(stack_rows(Vec::new(), 3).unwrap().dim(), (0, 3));
        let x = stack_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]], 2).unwrap();
        assert_eq!(x[(1, 0)], 3.0);
        assert!(matches!(
            stack_rows(vec![vec![1.0, 2.0], vec![3.0]], 2),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_write_npz() {
        let store = store_for(&record());
        let lookup = ScanPatientLookup::build(&store).unwrap();
        let ds = StoredDataset::load(&store, "ds-1", &lookup).unwrap();
        let all: Vec<SliceCode> = SliceCode::all().collect();
        let m = ds
            .features(&store, &all, PatientLabel::HEALTHY_TRACK, &mut Pcg64::seed_from_u64(0))
            .unwrap();
        let path = std::env::temp_dir().join(format!("{}.npz", uuid::Uuid::new_v4()));
        m.write_npz(&path).unwrap();

        let mut npz = ndarray_npy::NpzReader::new(File::open(&path).unwrap()).unwrap();
        let x: Array2<f32> = npz.by_index(0).unwrap();
        assert_eq!(x, m.x_train);
        std::fs::remove_file(path).unwrap();
    }
}
