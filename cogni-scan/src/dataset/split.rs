//! 按患者分层的训练/验证/测试划分, 以及标签间的平衡.
//!
//! # 算法
//!
//! 对每个标签独立地:
//!
//! 1. 找出拥有该标签扫描的全部患者及其扫描数;
//! 2. 给每个患者一个均匀随机的次序键;
//! 3. 按 (扫描数, 次序键) 降序排列;
//! 4. 依次将 `floor(n * train)` 个患者放入训练池, `floor(n * val)` 个放入验证池, 其余放入测试池;
//! 5. 将患者展开为扫描, 各池内部打乱.
//!
//! 同一患者的扫描永远只出现在一个池中. 之后在每个池上对两个标签做平衡, 合并后再打乱.

use std::cmp::Reverse;

use itertools::Itertools;
use log::info;
use ordered_float::OrderedFloat;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

use crate::consts::{DEFAULT_SPLITS, SPLIT_TOLERANCE};
use crate::dataset::{DatasetRecord, PoolEntry};
use crate::error::{Error, Result};
use crate::scan::PatientLabel;
use crate::store::{LabeledScan, ScanStore};
use crate::{PatientId, ScanId};

/// 划分参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SplitConfig {
    splits: [f64; 3],
    balance_rate: Option<f64>,
    labels: [PatientLabel; 2],
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            splits: DEFAULT_SPLITS,
            balance_rate: Some(0.5),
            labels: [PatientLabel::DEMENTED_TRACK, PatientLabel::HEALTHY_TRACK],
        }
    }
}

impl SplitConfig {
    /// 构造.
    ///
    /// - `splits` 为 (训练, 验证, 测试) 比例, 每项非负且总和与 1 的误差不超过 `1e-9`,
    ///   否则返回 `Err(InvalidSplitConfig)`;
    /// - `balance_rate` 为 `None` 时不做平衡; 否则必须在 `(0, 1)` 内,
    ///   否则返回 `Err(InvalidBalanceRate)`. 小于 0.5 的值按 `1 - r` 处理.
    pub fn new(splits: [f64; 3], balance_rate: Option<f64>) -> Result<Self> {
        if splits.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(Error::InvalidSplitConfig(format!("比例必须非负: {splits:?}")));
        }
        let sum: f64 = splits.iter().sum();
        if (sum - 1.0).abs() > SPLIT_TOLERANCE {
            return Err(Error::InvalidSplitConfig(format!("比例之和必须为 1, 实际为 {sum}")));
        }
        let balance_rate = match balance_rate {
            Some(r) if !(r > 0.0 && r < 1.0) => return Err(Error::InvalidBalanceRate(r)),
            Some(r) if r < 0.5 => Some(1.0 - r),
            other => other,
        };
        Ok(Self {
            splits,
            balance_rate,
            labels: [PatientLabel::DEMENTED_TRACK, PatientLabel::HEALTHY_TRACK],
        })
    }

    /// 指定参与划分的两个标签. 默认为 `"HD"` 与 `"HH"`.
    ///
    /// # 注意
    ///
    /// 两个标签相同时返回 `Err(InvalidSplitConfig)`.
    pub fn with_labels(mut self, first: PatientLabel, second: PatientLabel) -> Result<Self> {
        if first == second {
            return Err(Error::InvalidSplitConfig(format!("两个标签不能相同: {first}")));
        }
        self.labels = [first, second];
        Ok(self)
    }

    /// (训练, 验证, 测试) 比例.
    #[inline]
    pub fn splits(&self) -> [f64; 3] {
        self.splits
    }

    /// 归一化到 `[0.5, 1)` 的平衡率. `None` 表示不平衡.
    #[inline]
    pub fn balance_rate(&self) -> Option<f64> {
        self.balance_rate
    }

    /// 参与划分的两个标签.
    #[inline]
    pub fn labels(&self) -> [PatientLabel; 2] {
        self.labels
    }

    /// 数据集描述.
    pub fn description(&self) -> String {
        match self.balance_rate {
            None => "Use all.".to_string(),
            Some(r) if r == 0.5 => "Balanced".to_string(),
            Some(r) => format!("Ratio: {r}"),
        }
    }
}

/// 训练, 验证, 测试三个池.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pools {
    /// 训练池.
    pub train: Vec<PoolEntry>,
    /// 验证池.
    pub val: Vec<PoolEntry>,
    /// 测试池.
    pub test: Vec<PoolEntry>,
}

impl Pools {
    /// 扫描总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    /// 是否三个池都为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 平衡两个池: 较大的池截断为 `min(floor(A * r / (1 - r)), B)`, 其中 `A`, `B`
/// 分别为较小、较大池的长度. 从不填充. `rate` 须已归一化到 `[0.5, 1)`.
///
/// 返回值保持输入的先后顺序.
///
/// # 注意
///
/// `1 - rate` 无法精确表示 (如 `1 - 0.6 = 0.4000000000000001`), 取整前加上
/// [`SPLIT_TOLERANCE`] 以免少保留一个.
pub fn balance(
    mut first: Vec<PoolEntry>,
    mut second: Vec<PoolEntry>,
    rate: f64,
) -> (Vec<PoolEntry>, Vec<PoolEntry>) {
    let keep = |small: usize, large: usize| {
        let m = ((small as f64 * rate) / (1.0 - rate) + SPLIT_TOLERANCE).floor() as usize;
        m.min(large)
    };
    let (a, b) = (first.len(), second.len());
    if a < b {
        second.truncate(keep(a, b));
    } else if a > b {
        first.truncate(keep(b, a));
    }
    (first, second)
}

/// 按患者分层的数据集划分器.
#[derive(Copy, Clone, Debug, Default)]
pub struct DatasetSplitter {
    config: SplitConfig,
}

impl DatasetSplitter {
    /// 构造.
    #[inline]
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    /// 划分参数.
    #[inline]
    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// 对标签为 `label` 的扫描做按患者分层的划分. 见模块文档.
    ///
    /// 没有任何患者时返回三个空池.
    pub fn partition_label<R: Rng + ?Sized>(
        &self,
        scans: &[LabeledScan],
        label: PatientLabel,
        rng: &mut R,
    ) -> Pools {
        // 先按患者 ID 排序, 使次序键的分配只依赖于 `rng`.
        let mut patients: Vec<(PatientId, Vec<ScanId>, OrderedFloat<f64>)> = scans
            .iter()
            .filter(|s| s.label == label)
            .map(|s| (s.patient_id.clone(), s.scan_id))
            .into_group_map()
            .into_iter()
            .sorted_unstable_by(|a, b| a.0.cmp(&b.0))
            .map(|(pid, ids)| (pid, ids, OrderedFloat(rng.random::<f64>())))
            .collect();
        patients.sort_by_key(|(_, ids, key)| Reverse((ids.len(), *key)));

        let n = patients.len();
        let [train_ratio, val_ratio, _] = self.config.splits;
        let train_n = (n as f64 * train_ratio).floor() as usize;
        let val_n = ((n as f64 * val_ratio).floor() as usize).min(n - train_n.min(n));

        let expand = |group: &[(PatientId, Vec<ScanId>, OrderedFloat<f64>)]| -> Vec<PoolEntry> {
            group
                .iter()
                .flat_map(|(_, ids, _)| ids.iter().map(|&scan_id| PoolEntry { scan_id, label }))
                .collect()
        };
        let (train, rest) = patients.split_at(train_n.min(n));
        let (val, test) = rest.split_at(val_n);
        let mut pools = Pools {
            train: expand(train),
            val: expand(val),
            test: expand(test),
        };
        pools.train.shuffle(rng);
        pools.val.shuffle(rng);
        pools.test.shuffle(rng);
        pools
    }

    /// 由带标签的扫描构建一个新数据集 (不写入存储).
    pub fn build<R: Rng + ?Sized>(&self, scans: &[LabeledScan], rng: &mut R) -> DatasetRecord {
        let [first, second] = self.config.labels;
        let a = self.partition_label(scans, first, rng);
        let b = self.partition_label(scans, second, rng);

        let merge = |x: Vec<PoolEntry>, y: Vec<PoolEntry>, rng: &mut R| {
            let (mut x, y) = match self.config.balance_rate {
                Some(r) => balance(x, y, r),
                None => (x, y),
            };
            x.extend(y);
            x.shuffle(rng);
            x
        };
        let train_pool = merge(a.train, b.train, rng);
        let val_pool = merge(a.val, b.val, rng);
        let test_pool = merge(a.test, b.test, rng);

        let mut id = [0u8; 16];
        rng.fill_bytes(&mut id);
        DatasetRecord {
            id: uuid::Builder::from_random_bytes(id).into_uuid().to_string(),
            description: self.config.description(),
            train_pool,
            val_pool,
            test_pool,
        }
    }

    /// 读取存储中全部带特征的扫描, 构建数据集并一次性写入存储.
    pub fn make_dataset<S, R>(&self, store: &mut S, rng: &mut R) -> Result<DatasetRecord>
    where
        S: ScanStore + ?Sized,
        R: Rng + ?Sized,
    {
        let scans = store.labeled_scans()?;
        let record = self.build(&scans, rng);
        store.insert_dataset(&record)?;
        info!(
            "created dataset {} ({}): train {}, val {}, test {}",
            record.id,
            record.description,
            record.train_pool.len(),
            record.val_pool.len(),
            record.test_pool.len()
        );
        Ok(record)
    }
}
