use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{debug, info};

use crate::dataset::DatasetRecord;
use crate::error::{Error, Result};
use crate::scan::{HealthStatus, PatientLabel, ScanFeatures, ScanState};
use crate::store::{LabeledScan, MemoryStore, ScanRow, ScanStore};
use crate::{PatientId, ScanId};

#[inline]
fn io_err(path: &Path, e: std::io::Error) -> Error {
    Error::Storage(format!("{}: {e}", path.display()))
}

/// 单文件存储.
///
/// 全部表以 bincode 序列化后经 zlib 压缩保存. 每次写请求先写入同目录下的
/// 临时文件, 再重命名覆盖目标文件; 写入失败时内存与磁盘状态都保持不变.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    tables: MemoryStore,
}

impl FileStore {
    /// 打开 `path` 处的存储. 文件不存在时视为空存储 (首次写入时创建).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let file = File::open(&path).map_err(|e| io_err(&path, e))?;
            let tables: MemoryStore =
                bincode::deserialize_from(ZlibDecoder::new(BufReader::new(file)))?;
            info!("opened store {} ({} scans)", path.display(), tables.scan_count());
            tables
        } else {
            info!("store {} does not exist yet, starting empty", path.display());
            MemoryStore::new()
        };
        Ok(Self { path, tables })
    }

    /// 存储文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入 (或覆盖) 一行扫描.
    pub fn insert_scan(&mut self, row: ScanRow) -> Result<()> {
        self.commit(|t| {
            t.insert_scan(row);
            Ok(())
        })
    }

    /// 记录一次诊断. 见 [`MemoryStore::record_diagnosis`].
    pub fn record_diagnosis(
        &mut self,
        patient_id: &str,
        days: u32,
        status: HealthStatus,
    ) -> Result<()> {
        self.commit(|t| {
            t.record_diagnosis(patient_id, days, status);
            Ok(())
        })
    }

    /// 在副本上执行 `op`, 成功后原子地落盘并替换内存状态.
    fn commit<T>(&mut self, op: impl FnOnce(&mut MemoryStore) -> Result<T>) -> Result<T> {
        let mut next = self.tables.clone();
        let out = op(&mut next)?;
        self.write_atomic(&next)?;
        self.tables = next;
        Ok(out)
    }

    fn write_atomic(&self, tables: &MemoryStore) -> Result<()> {
        let tmp = self.path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        let result = (|| {
            let file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
            let mut enc = ZlibEncoder::new(BufWriter::new(file), Compression::default());
            bincode::serialize_into(&mut enc, tables)?;
            let mut inner = enc.finish().map_err(|e| io_err(&tmp, e))?;
            inner.flush().map_err(|e| io_err(&tmp, e))?;
            fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))
        })();
        match result {
            Ok(()) => debug!("wrote store {}", self.path.display()),
            Err(_) => {
                let _ = fs::remove_file(&tmp);
            }
        }
        result
    }
}

impl ScanStore for FileStore {
    #[inline]
    fn scan_rows(&self) -> Result<Vec<ScanRow>> {
        self.tables.scan_rows()
    }

    #[inline]
    fn scan_row(&self, scan_id: ScanId) -> Result<ScanRow> {
        self.tables.scan_row(scan_id)
    }

    fn update_scan_state(&mut self, scan_id: ScanId, state: &ScanState) -> Result<()> {
        self.commit(|t| t.update_scan_state(scan_id, state))
    }

    fn delete_scan(&mut self, scan_id: ScanId) -> Result<()> {
        self.commit(|t| t.delete_scan(scan_id))
    }

    #[inline]
    fn exit_health_statuses(&self) -> Result<HashMap<PatientId, HealthStatus>> {
        self.tables.exit_health_statuses()
    }

    #[inline]
    fn scans_with_features(&self) -> Result<HashSet<ScanId>> {
        self.tables.scans_with_features()
    }

    #[inline]
    fn labeled_scans(&self) -> Result<Vec<LabeledScan>> {
        self.tables.labeled_scans()
    }

    #[inline]
    fn scan_features(&self, scan_id: ScanId) -> Result<ScanFeatures> {
        self.tables.scan_features(scan_id)
    }

    fn insert_scan_features(&mut self, features: ScanFeatures) -> Result<()> {
        self.commit(|t| t.insert_scan_features(features))
    }

    /// 整批只落盘一次; 任一条失败时存储不变.
    fn insert_scan_features_batch(&mut self, features: Vec<ScanFeatures>) -> Result<()> {
        self.commit(|t| t.insert_scan_features_batch(features))
    }

    fn replace_patient_labels(&mut self, labels: Vec<(PatientId, PatientLabel)>) -> Result<()> {
        self.commit(|t| t.replace_patient_labels(labels))
    }

    #[inline]
    fn patient_labels(&self) -> Result<HashMap<PatientId, PatientLabel>> {
        self.tables.patient_labels()
    }

    fn insert_dataset(&mut self, record: &DatasetRecord) -> Result<()> {
        self.commit(|t| t.insert_dataset(record))
    }

    #[inline]
    fn dataset(&self, dataset_id: &str) -> Result<DatasetRecord> {
        self.tables.dataset(dataset_id)
    }

    #[inline]
    fn datasets(&self) -> Result<Vec<DatasetRecord>> {
        self.tables.datasets()
    }
}
