//! 持久化存储.
//!
//! 核心算法只通过 [`ScanStore`] 访问数据; 每次调用都是一次原子请求.
//! 提供两个实现:
//!
//! - [`MemoryStore`]: 纯内存, 用于测试与一次性计算;
//! - [`FileStore`]: 整体以 zlib 压缩的 bincode 格式保存在单个文件中.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetRecord;
use crate::error::Result;
use crate::scan::{HealthStatus, PatientLabel, ScanFeatures, ScanState};
use crate::{PatientId, ScanId};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// 扫描表中的一行.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRow {
    /// 扫描 ID.
    pub scan_id: ScanId,
    /// 体数据文件路径.
    pub path: PathBuf,
    /// 距该患者首次就诊的天数.
    pub days: u32,
    /// 所属患者.
    pub patient_id: PatientId,
    /// 数据来源, 如 `"oasis3"`.
    pub origin: String,
    /// 扫描时的健康状态.
    pub health_status: HealthStatus,
    /// 可编辑的方向、偏移与审核状态.
    pub state: ScanState,
}

/// 带标签的扫描, 数据集划分的输入.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LabeledScan {
    /// 所属患者.
    pub patient_id: PatientId,
    /// 扫描 ID.
    pub scan_id: ScanId,
    /// 患者轨迹标签.
    pub label: PatientLabel,
}

/// 存储协作者.
///
/// 读取方法不修改存储; 写入方法要么完全生效, 要么返回 `Err(Storage)` 且不留痕迹.
pub trait ScanStore {
    /// 全部扫描, 按 (患者, 天数, 扫描 ID) 升序.
    fn scan_rows(&self) -> Result<Vec<ScanRow>>;

    /// 单个扫描. 不存在时返回 `Err(NotFound)`.
    fn scan_row(&self, scan_id: ScanId) -> Result<ScanRow>;

    /// 覆盖扫描的可编辑状态. 不存在时返回 `Err(NotFound)`.
    fn update_scan_state(&mut self, scan_id: ScanId, state: &ScanState) -> Result<()>;

    /// 删除扫描 (连同其特征). 不存在时返回 `Err(NotFound)`.
    fn delete_scan(&mut self, scan_id: ScanId) -> Result<()>;

    /// 每个患者最后一次诊断时的健康状态.
    fn exit_health_statuses(&self) -> Result<HashMap<PatientId, HealthStatus>>;

    /// 已有预计算特征的扫描集合.
    fn scans_with_features(&self) -> Result<HashSet<ScanId>>;

    /// 全部带特征的扫描及其标签, 按扫描 ID 升序.
    fn labeled_scans(&self) -> Result<Vec<LabeledScan>>;

    /// 单个扫描的特征. 不存在时返回 `Err(NotFound)`.
    fn scan_features(&self, scan_id: ScanId) -> Result<ScanFeatures>;

    /// 写入 (或覆盖) 扫描特征.
    fn insert_scan_features(&mut self, features: ScanFeatures) -> Result<()>;

    /// 批量写入 (或覆盖) 扫描特征.
    ///
    /// 默认逐个调用 [`ScanStore::insert_scan_features`]; 需要整批原子写入的实现应覆盖此方法.
    fn insert_scan_features_batch(&mut self, features: Vec<ScanFeatures>) -> Result<()> {
        features
            .into_iter()
            .try_for_each(|f| self.insert_scan_features(f))
    }

    /// 以 `labels` 整体替换患者标签表.
    fn replace_patient_labels(&mut self, labels: Vec<(PatientId, PatientLabel)>) -> Result<()>;

    /// 当前患者标签表.
    fn patient_labels(&self) -> Result<HashMap<PatientId, PatientLabel>>;

    /// 写入数据集. ID 已存在时返回 `Err(Storage)`.
    fn insert_dataset(&mut self, record: &DatasetRecord) -> Result<()>;

    /// 按 ID 读取数据集. 不存在时返回 `Err(NotFound)`.
    fn dataset(&self, dataset_id: &str) -> Result<DatasetRecord>;

    /// 全部数据集, 按写入顺序.
    fn datasets(&self) -> Result<Vec<DatasetRecord>>;
}
