use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, feature::Id};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use piero_core::{
    geometry::{Point3, ReferenceFrame},
    scene::Metadata,
    shape::GeometryKind,
};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid GeoJSON: {0}")]
    InvalidGeoJson(#[from] geojson::Error),
    #[error("failed to serialize GeoJSON: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("expected a Feature or FeatureCollection, found {0}")]
    NotAFeature(&'static str),
    #[error("feature has no geometry")]
    MissingGeometry,
    #[error("Cannot import geometry type {0}")]
    UnsupportedGeometry(String),
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),
}

/// 导入来源：磁盘文件或已读入内存的文本（如拖放的文件）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    Path(PathBuf),
    Text { name: String, contents: String },
}

impl ImportSource {
    pub fn name(&self) -> String {
        match self {
            ImportSource::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            ImportSource::Text { name, .. } => name.clone(),
        }
    }

    pub fn read(&self) -> Result<String, IoError> {
        match self {
            ImportSource::Path(path) => fs::read_to_string(path).map_err(|source| IoError::ReadError {
                path: path.clone(),
                source,
            }),
            ImportSource::Text { contents, .. } => Ok(contents.clone()),
        }
    }
}

/// 批量导入的汇总结果。单个要素失败只记入 `errors`，不会中断同批次的其他要素。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl ImportOutcome {
    pub fn merge(&mut self, other: ImportOutcome) {
        self.imported += other.imported;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }

    #[inline]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub trait FeatureLoader {
    fn load(&self, source: &ImportSource) -> Result<Vec<Feature>, IoError>;
}

pub trait FeatureSaver {
    fn save(&self, collection: &FeatureCollection, path: &Path) -> Result<(), IoError>;
}

pub struct GeoJsonFacade;

impl GeoJsonFacade {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GeoJsonFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureLoader for GeoJsonFacade {
    fn load(&self, source: &ImportSource) -> Result<Vec<Feature>, IoError> {
        let text = source.read()?;
        let features = read_features(&text)?;
        debug!(source = %source.name(), count = features.len(), "已解析 GeoJSON 要素");
        Ok(features)
    }
}

impl FeatureSaver for GeoJsonFacade {
    fn save(&self, collection: &FeatureCollection, path: &Path) -> Result<(), IoError> {
        let text = write_collection(collection)?;
        fs::write(path, text).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), count = collection.features.len(), "已写出 GeoJSON");
        Ok(())
    }
}

/// 解析单个 Feature 或 FeatureCollection；其他 GeoJSON 对象视为错误。
pub fn read_features(text: &str) -> Result<Vec<Feature>, IoError> {
    match text.parse::<GeoJson>()? {
        GeoJson::Feature(feature) => Ok(vec![feature]),
        GeoJson::FeatureCollection(collection) => Ok(collection.features),
        GeoJson::Geometry(geometry) => Err(IoError::NotAFeature(geometry_type(&geometry.value))),
    }
}

pub fn write_collection(collection: &FeatureCollection) -> Result<String, IoError> {
    Ok(serde_json::to_string_pretty(collection)?)
}

fn geometry_type(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// 要素属性的副本；缺省时为空表。
pub fn feature_properties(feature: &Feature) -> Metadata {
    feature.properties.clone().unwrap_or_default()
}

/// `title` 属性；null 或缺失时返回 `None`，非字符串值按 JSON 文本处理。
pub fn feature_title(properties: &Metadata) -> Option<String> {
    match properties.get("title")? {
        Value::Null => None,
        Value::String(title) => Some(title.clone()),
        other => Some(other.to_string()),
    }
}

fn feature_title_matches(value: &Value, title: &str) -> bool {
    match value {
        Value::Null | Value::String(_) => false,
        other => other.to_string() == title,
    }
}

fn position_to_point(position: &[f64], frame: &dyn ReferenceFrame) -> Result<Point3, IoError> {
    let coordinates = match *position {
        [x, y] => glam::DVec3::new(x, y, 0.0),
        [x, y, z] => glam::DVec3::new(x, y, z),
        _ => {
            return Err(IoError::InvalidCoordinates(format!(
                "expected 2 or 3 values, found {}",
                position.len()
            )));
        }
    };
    if !coordinates.is_finite() {
        return Err(IoError::InvalidCoordinates(format!("{position:?}")));
    }
    Ok(frame.to_scene(coordinates))
}

fn positions_to_points(
    positions: &[Vec<f64>],
    frame: &dyn ReferenceFrame,
) -> Result<Vec<Point3>, IoError> {
    positions
        .iter()
        .map(|position| position_to_point(position, frame))
        .collect()
}

/// 要素几何到形状几何类型与场景坐标顶点。多边形只取外环。
pub fn shape_geometry(
    feature: &Feature,
    frame: &dyn ReferenceFrame,
) -> Result<(GeometryKind, Vec<Point3>), IoError> {
    let geometry = feature.geometry.as_ref().ok_or(IoError::MissingGeometry)?;
    match &geometry.value {
        geojson::Value::Point(position) => Ok((
            GeometryKind::Point,
            vec![position_to_point(position, frame)?],
        )),
        geojson::Value::MultiPoint(positions) => {
            Ok((GeometryKind::MultiPoint, positions_to_points(positions, frame)?))
        }
        geojson::Value::LineString(positions) => {
            Ok((GeometryKind::LineString, positions_to_points(positions, frame)?))
        }
        geojson::Value::Polygon(rings) => {
            let exterior = rings
                .first()
                .ok_or_else(|| IoError::InvalidCoordinates("polygon without rings".to_string()))?;
            Ok((GeometryKind::Polygon, positions_to_points(exterior, frame)?))
        }
        other => Err(IoError::UnsupportedGeometry(geometry_type(other).to_string())),
    }
}

/// 量测只接受恰好两个顶点的 LineString。
pub fn measure_endpoints(
    feature: &Feature,
    frame: &dyn ReferenceFrame,
) -> Result<(Point3, Point3), IoError> {
    let geometry = feature.geometry.as_ref().ok_or(IoError::MissingGeometry)?;
    match &geometry.value {
        geojson::Value::LineString(positions) if positions.len() == 2 => Ok((
            position_to_point(&positions[0], frame)?,
            position_to_point(&positions[1], frame)?,
        )),
        geojson::Value::LineString(positions) => Err(IoError::UnsupportedGeometry(format!(
            "LineString with {} positions",
            positions.len()
        ))),
        other => Err(IoError::UnsupportedGeometry(geometry_type(other).to_string())),
    }
}

/// 导出时的公共参数。
pub struct ExportContext<'a> {
    pub base_url: &'a str,
    pub frame: &'a dyn ReferenceFrame,
    pub updated: DateTime<Utc>,
}

impl ExportContext<'_> {
    fn feature_id(&self, uuid: Uuid) -> Id {
        Id::String(format!("{}#{uuid}", self.base_url))
    }

    fn timestamp(&self) -> String {
        self.updated.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn position(&self, point: Point3) -> Vec<f64> {
        self.frame.to_external(point).to_array().to_vec()
    }

    fn positions(&self, points: &[Point3]) -> Vec<Vec<f64>> {
        points.iter().map(|point| self.position(*point)).collect()
    }
}

/// 标注或量测记录中参与导出的字段。
pub struct RecordExport<'a> {
    pub uuid: Uuid,
    pub title: &'a str,
    pub properties: &'a Metadata,
}

fn record_properties(record: &RecordExport<'_>, context: &ExportContext<'_>) -> Metadata {
    let mut properties = record.properties.clone();
    // 导入时的非字符串标题按原值写回
    let original = properties
        .get("title")
        .is_some_and(|title| feature_title_matches(title, record.title));
    if !original {
        properties.insert("title".to_string(), Value::String(record.title.to_string()));
    }
    properties.insert("updated".to_string(), Value::String(context.timestamp()));
    properties
}

pub fn annotation_feature(
    record: &RecordExport<'_>,
    kind: GeometryKind,
    points: &[Point3],
    context: &ExportContext<'_>,
) -> Feature {
    let value = match kind {
        GeometryKind::Point => match points.first() {
            Some(point) => geojson::Value::Point(context.position(*point)),
            None => geojson::Value::MultiPoint(Vec::new()),
        },
        GeometryKind::MultiPoint => geojson::Value::MultiPoint(context.positions(points)),
        GeometryKind::LineString => geojson::Value::LineString(context.positions(points)),
        GeometryKind::Polygon => geojson::Value::Polygon(vec![context.positions(points)]),
    };
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: Some(context.feature_id(record.uuid)),
        properties: Some(record_properties(record, context)),
        foreign_members: None,
    }
}

pub fn measure_feature(
    record: &RecordExport<'_>,
    from: Point3,
    to: Point3,
    context: &ExportContext<'_>,
) -> Feature {
    let value = geojson::Value::LineString(vec![context.position(from), context.position(to)]);
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: Some(context.feature_id(record.uuid)),
        properties: Some(record_properties(record, context)),
        foreign_members: None,
    }
}

const OWC_PROFILE: &str = "http://www.opengis.net/spec/owc-atom/1.0/req/core";

/// 带 OGC Context 成员的要素集合；`id` 与 `properties` 作为外部成员写入顶层。
pub fn owc_collection(
    features: Vec<Feature>,
    title: &str,
    context: &ExportContext<'_>,
) -> FeatureCollection {
    let mut members = Metadata::new();
    members.insert(
        "id".to_string(),
        Value::String(format!("{}#{}", context.base_url, Uuid::new_v4())),
    );
    members.insert(
        "properties".to_string(),
        json!({
            "lang": "en",
            "title": title,
            "updated": context.timestamp(),
            "creator": "Piero",
            "generator": {
                "title": "Piero",
                "uri": context.base_url,
            },
            "links": [{
                "rel": "profile",
                "href": OWC_PROFILE,
                "title": "This file is compliant with version 1.0 of OGC Context",
            }],
        }),
    );
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    }
}
