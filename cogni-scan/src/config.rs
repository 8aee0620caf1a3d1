//! 运行配置.
//!
//! 配置文件为 `settings.json`, 查找顺序:
//!
//! 1. 若环境变量 `$COGNI_SCAN_HOME` 非空, 则为 `$COGNI_SCAN_HOME/settings.json`;
//! 2. 否则为 `$HOME/.cogni_scan/settings.json`.
//!
//! 文件不存在时使用默认值; 缺失的字段同样取默认值.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_SPLITS, FEATURE_SQUARE_LENGTH, SLICE_SQUARE_LENGTH};
use crate::dataset::SplitConfig;
use crate::error::{Error, Result};
use crate::scan::PatientLabel;

/// 指定配置目录的环境变量.
pub const HOME_ENV: &str = "COGNI_SCAN_HOME";

/// 配置文件名.
pub const SETTINGS_FILE: &str = "settings.json";

/// 默认存储文件名, 位于配置目录下.
pub const STORE_FILE: &str = "scans.bin";

/// 获取配置目录. 见模块文档.
pub fn settings_dir() -> Option<PathBuf> {
    match env::var(HOME_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => {
            let mut ans = dirs::home_dir()?;
            ans.push(".cogni_scan");
            Some(ans)
        }
    }
}

/// 运行配置.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// [`crate::store::FileStore`] 的文件路径.
    pub store_path: PathBuf,
    /// 浏览切片时的正方形边长.
    pub slice_square_length: usize,
    /// 计算特征时的正方形边长.
    pub feature_square_length: usize,
    /// (训练, 验证, 测试) 比例.
    pub splits: [f64; 3],
    /// 平衡率. `null` 表示不平衡.
    pub balance_rate: Option<f64>,
    /// 参与划分的两个标签.
    pub labels: [PatientLabel; 2],
    /// 导出特征时记为 0 的标签, 必须是 `labels` 之一.
    pub negative_label: PatientLabel,
}

impl Default for Settings {
    fn default() -> Self {
        let store_path =
            settings_dir().map_or_else(|| PathBuf::from(STORE_FILE), |d| d.join(STORE_FILE));
        Self {
            store_path,
            slice_square_length: SLICE_SQUARE_LENGTH,
            feature_square_length: FEATURE_SQUARE_LENGTH,
            splits: DEFAULT_SPLITS,
            balance_rate: Some(0.5),
            labels: [PatientLabel::DEMENTED_TRACK, PatientLabel::HEALTHY_TRACK],
            negative_label: PatientLabel::HEALTHY_TRACK,
        }
    }
}

impl Settings {
    /// 从默认位置加载. 见模块文档.
    pub fn load() -> Result<Self> {
        match settings_dir() {
            Some(dir) => Self::load_from(dir.join(SETTINGS_FILE)),
            None => {
                info!("no home directory, using default settings");
                Ok(Self::default())
            }
        }
    }

    /// 从 `path` 加载. 文件不存在时返回默认值.
    ///
    /// 文件无法读取或格式错误时返回 `Err(Storage)`; 数值不合法时返回相应的参数错误.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("{} not found, using default settings", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        info!("loaded settings from {}", path.display());
        Ok(settings)
    }

    /// 检查各项取值.
    pub fn validate(&self) -> Result<()> {
        if self.slice_square_length == 0 || self.feature_square_length == 0 {
            return Err(Error::param("切片边长不能为 0"));
        }
        if !self.labels.contains(&self.negative_label) {
            return Err(Error::param(format!(
                "负类标签 {} 不在划分标签中",
                self.negative_label
            )));
        }
        self.split_config().map(|_| ())
    }

    /// 由配置构建划分参数.
    pub fn split_config(&self) -> Result<SplitConfig> {
        let [first, second] = self.labels;
        SplitConfig::new(self.splits, self.balance_rate)?.with_labels(first, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_json(content: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = env::temp_dir().join(format!("{}.json", uuid::Uuid::new_v4()));
        let s = Settings::load_from(&path).unwrap();
        assert_eq!(s.slice_square_length, 400);
        assert_eq!(s.feature_square_length, 200);
        assert_eq!(s.splits, [0.70, 0.15, 0.15]);
        assert_eq!(s.labels[0].to_string(), "HD");
    }

    #[test]
    fn test_partial_file() {
        let path = temp_json(
            r#"{"store_path": "/data/scans.bin", "balance_rate": 0.3, "labels": ["HD", "HH"]}"#,
        );
        let s = Settings::load_from(&path).unwrap();
        assert_eq!(s.store_path, PathBuf::from("/data/scans.bin"));
        assert_eq!(s.feature_square_length, 200);
        assert_eq!(s.split_config().unwrap().balance_rate(), Some(0.7));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_negative_label_ignores_label_order() {
        let path = temp_json(r#"{"labels": ["HH", "HD"]}"#);
        let s = Settings::load_from(&path).unwrap();
        assert_eq!(s.negative_label, PatientLabel::HEALTHY_TRACK);
        fs::remove_file(path).unwrap();

        let path = temp_json(r#"{"labels": ["HH", "HD"], "negative_label": "HD"}"#);
        let s = Settings::load_from(&path).unwrap();
        assert_eq!(s.negative_label, PatientLabel::DEMENTED_TRACK);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_invalid_values() {
        let bad_splits = temp_json(r#"{"splits": [0.5, 0.5, 0.5]}"#);
        assert!(matches!(Settings::load_from(&bad_splits), Err(Error::InvalidSplitConfig(_))));
        let bad_rate = temp_json(r#"{"balance_rate": 1.0}"#);
        assert!(matches!(Settings::load_from(&bad_rate), Err(Error::InvalidBalanceRate(_))));
        let bad_len = temp_json(r#"{"slice_square_length": 0}"#);
        assert!(matches!(Settings::load_from(&bad_len), Err(Error::InvalidParameter(_))));
        let bad_json = temp_json("{");
        assert!(matches!(Settings::load_from(&bad_json), Err(Error::Storage(_))));
        let bad_negative = temp_json(r#"{"labels": ["HD", "DD"]}"#);
        assert!(matches!(Settings::load_from(&bad_negative), Err(Error::InvalidParameter(_))));
        for p in [bad_splits, bad_rate, bad_len, bad_json, bad_negative] {
            fs::remove_file(p).unwrap();
        }
    }
}
