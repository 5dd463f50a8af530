use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use piero_core::geometry::Color;
use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub style: StyleConfig,
    #[serde(default)]
    pub picking: PickingConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `PIERO_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("PIERO_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 标注与量测的显示颜色。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub shape_color: Color,
    pub highlight_shape_color: Color,
    /// 编辑中的标注使用的颜色。
    pub edit_shape_color: Color,
    pub measure_color: Color,
    pub highlight_measure_color: Color,
    pub point_radius: f64,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            shape_color: Color::from_hex(0x377c5f),
            highlight_shape_color: Color::from_hex(0x50bf91),
            edit_shape_color: Color::from_hex(0x73d1bd),
            measure_color: Color::from_hex(0xffff00),
            highlight_measure_color: Color::from_hex(0xffd500),
            point_radius: 5.0,
        }
    }
}

/// 标注绘制时拾取候选的来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationMode {
    /// 模型优先，未命中时退回底图。
    #[default]
    Normal,
    MapOnly,
    ObjectsOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PickingConfig {
    /// 拾取半径（像素）。
    pub radius: f64,
    pub annotation_mode: AnnotationMode,
}

impl Default for PickingConfig {
    fn default() -> Self {
        Self {
            radius: 1.0,
            annotation_mode: AnnotationMode::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub show_labels: bool,
    /// 屏幕上短于该像素数的线段不显示长度标签。
    pub min_segment_pixels: f64,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            show_labels: true,
            min_segment_pixels: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// 法线方向二次射线的最小命中距离。
    pub ray_epsilon: f64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self { ray_epsilon: 1e-5 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// 导出要素 ID 的前缀，形如 `{base_url}#{uuid}`。
    pub base_url: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            base_url: "https://piero.local/".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
