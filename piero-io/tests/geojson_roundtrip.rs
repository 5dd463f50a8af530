use std::fs;

use chrono::{TimeZone, Utc};
use glam::DVec3;
use serde_json::{Value, json};
use uuid::Uuid;

use piero_core::{
    geometry::{Color, IdentityFrame, LocalOrigin},
    shape::{GeometryKind, Shape, ShapeStyle},
};
use piero_io::{
    ExportContext, FeatureLoader, FeatureSaver, GeoJsonFacade, ImportSource, RecordExport,
    annotation_feature, feature_properties, feature_title, measure_feature, owc_collection,
    read_features, shape_geometry,
};

const COLLECTION: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "geometry": {"type": "Polygon", "coordinates": [[[0,0,1],[10,0,1],[10,10,1],[0,10,1],[0,0,1]]]},
      "properties": {"title": "Parcel", "owner": "city", "floors": 3}
    },
    {
      "type": "Feature",
      "geometry": {"type": "LineString", "coordinates": [[0,0],[3,4]]},
      "properties": {"title": "Fence", "updated": "2020-01-01T00:00:00.000Z"}
    }
  ]
}"#;

fn style() -> ShapeStyle {
    ShapeStyle {
        color: Color::from_hex(0x377c5f),
        highlight_color: Color::from_hex(0x50bf91),
        vertex_radius: 5.0,
    }
}

fn context() -> ExportContext<'static> {
    ExportContext {
        base_url: "https://piero.local/",
        frame: &IdentityFrame,
        updated: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    }
}

fn without_updated(value: &Value) -> Value {
    let mut value = value.clone();
    if let Some(object) = value.as_object_mut() {
        object.remove("updated");
    }
    value
}

#[test]
fn load_from_file_and_export_preserves_properties_and_vertices() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("annotations.geojson");
    fs::write(&path, COLLECTION).expect("写入测试文件失败");

    let loader = GeoJsonFacade::new();
    let features = loader
        .load(&ImportSource::Path(path.clone()))
        .expect("读取 GeoJSON 失败");
    assert_eq!(features.len(), 2);

    let context = context();
    for feature in &features {
        let properties = feature_properties(feature);
        let title = feature_title(&properties).expect("缺少 title");
        let (kind, points) = shape_geometry(feature, &IdentityFrame).expect("几何无法转换");
        let shape = Shape::new(kind, style(), kind.flags(true)).with_points(points);

        let record = RecordExport {
            uuid: Uuid::new_v4(),
            title: &title,
            properties: &properties,
        };
        let exported = annotation_feature(&record, shape.kind(), shape.points(), &context);
        let exported = serde_json::to_value(&exported).expect("序列化失败");
        let original = serde_json::to_value(feature).expect("序列化失败");

        assert_eq!(
            without_updated(&exported["properties"]),
            without_updated(&original["properties"])
        );
        assert_eq!(exported["geometry"]["type"], original["geometry"]["type"]);

        let count = |value: &Value| match value["geometry"]["type"].as_str() {
            Some("Polygon") => value["geometry"]["coordinates"][0].as_array().map(Vec::len),
            _ => value["geometry"]["coordinates"].as_array().map(Vec::len),
        };
        assert_eq!(count(&exported), count(&original));
    }
}

#[test]
fn exported_vertices_keep_order_and_altitude() {
    let features = read_features(COLLECTION).expect("解析失败");
    let (kind, points) = shape_geometry(&features[1], &IdentityFrame).unwrap();
    assert_eq!(kind, GeometryKind::LineString);

    let properties = feature_properties(&features[1]);
    let record = RecordExport {
        uuid: Uuid::nil(),
        title: "Fence",
        properties: &properties,
    };
    let exported = annotation_feature(&record, kind, &points, &context());
    let exported = serde_json::to_value(&exported).unwrap();

    assert_eq!(
        exported["geometry"]["coordinates"],
        json!([[0.0, 0.0, 0.0], [3.0, 4.0, 0.0]])
    );
    assert_eq!(
        exported["id"],
        json!("https://piero.local/#00000000-0000-0000-0000-000000000000")
    );
    assert_eq!(exported["properties"]["updated"], json!("2024-05-01T12:00:00.000Z"));
}

#[test]
fn reference_frame_is_applied_both_ways() {
    let frame = LocalOrigin::new(DVec3::new(1000.0, 2000.0, 0.0));
    let text = r#"{"type":"Feature","geometry":{"type":"Point","coordinates":[1001,2002,5]},"properties":{"title":"P"}}"#;
    let features = read_features(text).unwrap();
    let (_, points) = shape_geometry(&features[0], &frame).unwrap();
    assert_eq!(points[0].to_array(), [1.0, 2.0, 5.0]);

    let properties = feature_properties(&features[0]);
    let record = RecordExport {
        uuid: Uuid::new_v4(),
        title: "P",
        properties: &properties,
    };
    let context = ExportContext {
        frame: &frame,
        ..context()
    };
    let exported = serde_json::to_value(measure_feature(&record, points[0], points[0], &context)).unwrap();
    assert_eq!(
        exported["geometry"]["coordinates"],
        json!([[1001.0, 2002.0, 5.0], [1001.0, 2002.0, 5.0]])
    );
}

#[test]
fn collection_carries_owc_members_and_saves_to_disk() {
    let context = context();
    let properties = serde_json::Map::new();
    let record = RecordExport {
        uuid: Uuid::new_v4(),
        title: "Only",
        properties: &properties,
    };
    let shape = Shape::new(GeometryKind::Point, style(), GeometryKind::Point.flags(false))
        .with_points(vec![piero_core::geometry::Point3::new(1.0, 1.0, 1.0)]);
    let feature = annotation_feature(&record, shape.kind(), shape.points(), &context);
    let collection = owc_collection(vec![feature], "Piero annotations", &context);

    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("export.geojson");
    GeoJsonFacade::new()
        .save(&collection, &path)
        .expect("写出 GeoJSON 失败");

    let text = fs::read_to_string(&path).unwrap();
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "FeatureCollection");
    assert!(
        value["id"]
            .as_str()
            .is_some_and(|id| id.starts_with("https://piero.local/#"))
    );
    assert_eq!(value["properties"]["title"], "Piero annotations");
    assert_eq!(value["properties"]["lang"], "en");
    assert_eq!(value["features"].as_array().map(Vec::len), Some(1));

    let reloaded = GeoJsonFacade::new()
        .load(&ImportSource::Text {
            name: "export.geojson".to_string(),
            contents: text,
        })
        .unwrap();
    assert_eq!(reloaded.len(), 1);
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = GeoJsonFacade::new()
        .load(&ImportSource::Path(dir.path().join("missing.geojson")))
        .unwrap_err();
    assert!(matches!(err, piero_io::IoError::ReadError { .. }));
}
