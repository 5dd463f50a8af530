//! 拾取结果分类：把不同来源的拾取统一为分组属性表。

use piero_core::{
    feature::{
        Attribute, AttributeGroups, AttributeValue, CITYJSON_GROUP, DATASET_GROUP, FEATURE_GROUP,
        Feature, GEOJSON_GROUP, IFC_GROUP, MEASUREMENT_GROUP, PLY_GROUP,
    },
    geometry::Color,
    pick::{CityObjectFeature, IfcFeature, PickKind, PickResult, VectorFeature, VertexColor},
    scene::{Metadata, ObjectTree},
    shape::{GeometryKind, Shape, ShapeId},
    units::{self, Precision},
};
use serde_json::Value;

use crate::store::{Annotation, Measure};

const NULL_VALUE: &str = "NULL";

/// 通用元数据收集时跳过的键。
const SKIPPED_METADATA_KEYS: [&str; 7] = [
    "geometry",
    "geometryProperty",
    "metadata",
    "entity",
    "dataset",
    "bbox",
    "hover",
];

/// 用户属性（GeoJSON 分组）中跳过的键。
const SKIPPED_PROPERTY_KEYS: [&str; 4] = ["geometry", "geometryProperty", "metadata", "entity"];

/// 形状所属的记录。
pub enum ShapeOwner<'a> {
    Annotation {
        annotation: &'a Annotation,
        shape: &'a Shape,
    },
    Measure {
        measure: &'a Measure,
        shape: &'a Shape,
    },
}

/// 形状 ID 到所属记录的查询表，由各会话维护。
pub trait ShapeDirectory {
    fn shape_owner(&self, id: ShapeId) -> Option<ShapeOwner<'_>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 分类结果缓存到拾取结果上，重复调用直接返回缓存。
    pub fn classify_cached<'p>(
        &self,
        pick: &'p mut PickResult,
        objects: &ObjectTree,
        shapes: &dyn ShapeDirectory,
    ) -> Option<&'p Feature> {
        if pick.cached_feature().is_none() {
            let feature = self.classify(pick, objects, shapes)?;
            pick.cache_feature(feature);
        }
        pick.cached_feature()
    }

    /// 底图拾取未命中任何矢量要素时返回 `None`。
    pub fn classify(
        &self,
        pick: &PickResult,
        objects: &ObjectTree,
        shapes: &dyn ShapeDirectory,
    ) -> Option<Feature> {
        let object = objects.object(pick.object);
        let entity = pick
            .entity
            .or_else(|| object.and_then(|object| object.entity))
            .and_then(|id| objects.entity(id));

        let mut name = entity
            .and_then(|entity| entity.dataset.as_ref())
            .or_else(|| object.and_then(|object| object.dataset.as_ref()))
            .and_then(|dataset| dataset.name.clone())
            .or_else(|| object.map(|object| object.name.clone()))
            .unwrap_or_default();
        let parent = match (entity, object) {
            (Some(entity), _) => entity.id.to_string(),
            (None, Some(object)) => object.id.to_string(),
            (None, None) => pick.object.to_string(),
        };

        let mut groups = AttributeGroups::new();

        match &pick.kind {
            PickKind::Map { features } => {
                let feature = features.first()?;
                if let Some(title) = vector_feature_name(feature) {
                    name = title;
                }
                append_vector_feature(feature, &mut groups);
            }
            PickKind::Ifc { features } => {
                if let Some(feature) = features.first() {
                    let site = entity
                        .and_then(|entity| entity.dataset.as_ref())
                        .and_then(|dataset| dataset.name.as_deref());
                    append_ifc(feature, site, &mut groups);
                }
            }
            PickKind::CityObject { features } => {
                if let Some(feature) = features.first() {
                    append_city_object(feature, &mut groups);
                }
            }
            PickKind::PointCloud => {
                if let Some(object) = object {
                    groups.push(DATASET_GROUP, "Tile", object.name.as_str());
                }
            }
            // 要素集合的属性由下方的对象元数据收集覆盖
            PickKind::FeatureCollection => {}
            PickKind::Mesh { colors } => {
                if let Some(color) = colors.first() {
                    append_vertex_color(*color, &mut groups);
                }
            }
            PickKind::Shape { shape } => match shapes.shape_owner(*shape) {
                Some(ShapeOwner::Annotation { annotation, shape }) => {
                    name = annotation.title.clone();
                    append_properties(&annotation.properties, &mut groups);
                    append_shape_measurements(shape, &mut groups);
                }
                Some(ShapeOwner::Measure { measure, shape }) => {
                    name = measure.title.clone();
                    append_properties(&measure.properties, &mut groups);
                    append_measure(shape, &mut groups);
                }
                None => {}
            },
            PickKind::Surface => {}
        }

        if let Some(entity) = entity {
            collect_metadata(&entity.metadata, groups.group_mut(FEATURE_GROUP));
        }
        if object.is_some() {
            collect_object_metadata(objects, pick, groups.group_mut(FEATURE_GROUP));
            collect_dataset_tags(objects, pick, groups.group_mut(DATASET_GROUP));
        }

        Some(Feature {
            name,
            parent,
            point: pick.point,
            attributes: groups,
        })
    }
}

fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// 名称取 `nom`，其次 `name`，最后为要素 ID。
fn vector_feature_name(feature: &VectorFeature) -> Option<String> {
    ["nom", "name"]
        .iter()
        .find_map(|key| feature.properties.get(*key).and_then(json_text))
        .or_else(|| feature.id.as_ref().and_then(json_text))
}

fn append_vector_feature(feature: &VectorFeature, groups: &mut AttributeGroups) {
    let attributes = groups.group_mut(FEATURE_GROUP);
    if let Some(id) = &feature.id {
        attributes.push(Attribute {
            key: "fid".to_string(),
            value: AttributeValue::from_json(id),
        });
    }
    for (key, value) in &feature.properties {
        if key == "geometry" || key == "geometryProperty" {
            continue;
        }
        attributes.push(Attribute {
            key: key.clone(),
            value: AttributeValue::from_json(value),
        });
    }
    groups.push(DATASET_GROUP, "Layer", feature.layer.as_str());
}

fn append_ifc(feature: &IfcFeature, site: Option<&str>, groups: &mut AttributeGroups) {
    let item = &feature.item;
    let or_null = |value: Option<&str>| value.unwrap_or(NULL_VALUE).to_string();

    groups.push(IFC_GROUP, "Site", or_null(site));
    groups.push(IFC_GROUP, "IFCType", or_null(item.category.as_deref()));
    groups.push(IFC_GROUP, "Name", or_null(item.name.as_deref()));
    groups.push(IFC_GROUP, "ID", item.express_id);
    groups.push(IFC_GROUP, "GlobalId", or_null(item.global_id.as_deref()));
    let optional = [
        ("Description", &item.description),
        ("PredefinedType", &item.predefined_type),
        ("ObjectType", &item.object_type),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            groups.push(IFC_GROUP, key, value.as_str());
        }
    }

    // 属性集与数量集各自成组
    for property in &feature.properties {
        groups.push(
            &property.set_name,
            property.name.as_str(),
            AttributeValue::from_json(&property.value),
        );
    }
}

fn append_city_object(feature: &CityObjectFeature, groups: &mut AttributeGroups) {
    groups.push(CITYJSON_GROUP, "ID", feature.object_id.as_str());
    groups.push(CITYJSON_GROUP, "Type", feature.object_type.as_str());
    if let Some(lod) = &feature.lod {
        groups.push(CITYJSON_GROUP, "LoD", lod.as_str());
        if let Some(surface) = &feature.surface_type {
            groups.push(CITYJSON_GROUP, "Surface type", surface.as_str());
        }
    }
}

fn append_vertex_color(color: VertexColor, groups: &mut AttributeGroups) {
    groups.push(PLY_GROUP, "Color", Color::from_unit_rgb(color.r, color.g, color.b));
}

fn append_properties(properties: &Metadata, groups: &mut AttributeGroups) {
    let attributes = groups.group_mut(GEOJSON_GROUP);
    for (key, value) in properties {
        if SKIPPED_PROPERTY_KEYS.contains(&key.as_str()) {
            continue;
        }
        attributes.push(Attribute {
            key: key.clone(),
            value: AttributeValue::from_json(value),
        });
    }
}

fn altitude(value: f64) -> String {
    format!("{} m", units::format_number(value, Precision::Fixed(2)))
}

fn append_shape_measurements(shape: &Shape, groups: &mut AttributeGroups) {
    let measurements = shape.measurements();
    let attributes = groups.group_mut(MEASUREMENT_GROUP);
    let mut push = |key: &str, value: AttributeValue| {
        attributes.push(Attribute {
            key: key.to_string(),
            value,
        })
    };

    if shape.kind() == GeometryKind::MultiPoint {
        push("Number of points", shape.points().len().into());
    }
    if let Some(area) = measurements.area {
        push("Area", units::format_area(area, Precision::Fixed(2)).into());
    }
    if let Some(perimeter) = measurements.perimeter {
        let key = if shape.kind() == GeometryKind::Polygon {
            "Perimeter"
        } else {
            "Length"
        };
        push(key, units::format_length(perimeter, Precision::Fixed(2)).into());
    }
    if measurements.has_altitudes() {
        push("Min altitude", altitude(measurements.min_altitude).into());
        push("Max altitude", altitude(measurements.max_altitude).into());
    }
}

fn append_measure(shape: &Shape, groups: &mut AttributeGroups) {
    if let [from, to] = shape.points() {
        groups.push(MEASUREMENT_GROUP, "From", *from);
        groups.push(MEASUREMENT_GROUP, "To", *to);
        groups.push(
            MEASUREMENT_GROUP,
            "Length",
            units::format_length(from.distance(*to), Precision::Fixed(2)),
        );
    }
}

/// 收集元数据中的基本类型字段；`properties` 与内嵌 `feature` 递归展开，`id` 改名为 `fid`。
fn collect_metadata(metadata: &Metadata, attributes: &mut Vec<Attribute>) {
    for (key, value) in metadata {
        if SKIPPED_METADATA_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let ("properties" | "feature", Value::Object(inner)) = (key.as_str(), value) {
            collect_metadata(inner, attributes);
            continue;
        }
        let Some(value) = AttributeValue::from_primitive(value) else {
            continue;
        };
        let key = if key == "id" { "fid" } else { key.as_str() };
        attributes.push(Attribute {
            key: key.to_string(),
            value,
        });
    }
}

/// 自拾取对象沿父链向上收集元数据，遇到要素瓦片节点时停止。
fn collect_object_metadata(objects: &ObjectTree, pick: &PickResult, attributes: &mut Vec<Attribute>) {
    for object in objects.ancestors(pick.object) {
        collect_metadata(&object.metadata, attributes);
        let stop = object
            .parent
            .and_then(|parent| objects.object(parent))
            .is_some_and(|parent| parent.is_feature_tile);
        if stop {
            break;
        }
    }
}

fn collect_dataset_tags(objects: &ObjectTree, pick: &PickResult, attributes: &mut Vec<Attribute>) {
    for object in objects.ancestors(pick.object) {
        let Some(dataset) = &object.dataset else {
            continue;
        };
        if let Some(name) = &dataset.name {
            attributes.push(Attribute {
                key: "Dataset".to_string(),
                value: name.as_str().into(),
            });
        }
        if let Some(filename) = &dataset.filename {
            attributes.push(Attribute {
                key: "File".to_string(),
                value: filename.as_str().into(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use piero_core::{
        geometry::Point3,
        pick::{IfcItem, IfcProperty},
        scene::DatasetTag,
        shape::{ShapeFlags, ShapeStyle},
    };
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    struct NoShapes;

    impl ShapeDirectory for NoShapes {
        fn shape_owner(&self, _id: ShapeId) -> Option<ShapeOwner<'_>> {
            None
        }
    }

    struct OneAnnotation {
        annotation: Annotation,
        shape: Shape,
    }

    impl ShapeDirectory for OneAnnotation {
        fn shape_owner(&self, id: ShapeId) -> Option<ShapeOwner<'_>> {
            (id == self.shape.id()).then_some(ShapeOwner::Annotation {
                annotation: &self.annotation,
                shape: &self.shape,
            })
        }
    }

    fn metadata(value: Value) -> Metadata {
        match value {
            Value::Object(map) => map,
            _ => Metadata::new(),
        }
    }

    fn values<'a>(feature: &'a Feature, group: &str) -> Vec<(&'a str, String)> {
        feature
            .attributes
            .get(group)
            .unwrap_or_default()
            .iter()
            .map(|a| (a.key.as_str(), a.value.to_string()))
            .collect()
    }

    #[test]
    fn map_pick_uses_vector_feature() {
        let mut tree = ObjectTree::new();
        let entity = tree.add_entity("basemap", Some(DatasetTag::named("Base map")));
        let root = tree.entity(entity).unwrap().root;
        let tile = tree.add_object(Some(root), "tile");

        let feature = VectorFeature {
            id: Some(json!(17)),
            properties: metadata(json!({"nom": "Rue de la Paix", "geometry": [1, 2], "lanes": 2})),
            layer: "roads".to_string(),
        };
        let pick = PickResult::new(Point3::new(1.0, 2.0, 0.0), 10.0, tile)
            .with_entity(entity)
            .with_kind(PickKind::Map {
                features: vec![feature],
            });

        let feature = FeatureExtractor::new().classify(&pick, &tree, &NoShapes).unwrap();
        assert_eq!(feature.name, "Rue de la Paix");
        assert_eq!(feature.parent, entity.to_string());
        assert_eq!(
            values(&feature, FEATURE_GROUP),
            [("fid", "17".to_string()), ("lanes", "2".to_string()), ("nom", "Rue de la Paix".to_string())]
        );
        assert_eq!(
            values(&feature, DATASET_GROUP),
            [("Layer", "roads".to_string()), ("Dataset", "Base map".to_string())]
        );
    }

    #[test]
    fn map_pick_without_features_yields_nothing() {
        let mut tree = ObjectTree::new();
        let tile = tree.add_object(None, "tile");
        let pick = PickResult::new(Point3::new(0.0, 0.0, 0.0), 1.0, tile)
            .with_kind(PickKind::Map { features: Vec::new() });
        assert!(FeatureExtractor::new().classify(&pick, &tree, &NoShapes).is_none());
    }

    #[test]
    fn ifc_pick_groups_property_sets() {
        let mut tree = ObjectTree::new();
        let entity = tree.add_entity("model", Some(DatasetTag::named("Campus").with_filename("campus.ifc")));
        let root = tree.entity(entity).unwrap().root;
        let mesh = tree.add_object(Some(root), "fragment");

        let feature = IfcFeature {
            item: IfcItem {
                item_id: "42".to_string(),
                express_id: 42,
                category: Some("IFCWALL".to_string()),
                name: Some("Wall-01".to_string()),
                description: Some("Load bearing".to_string()),
                ..IfcItem::default()
            },
            properties: vec![
                IfcProperty {
                    set_name: "Pset_WallCommon".to_string(),
                    name: "IsExternal".to_string(),
                    value: json!(true),
                },
                IfcProperty {
                    set_name: "Qto_WallBaseQuantities".to_string(),
                    name: "Width".to_string(),
                    value: json!(0.3),
                },
            ],
        };
        let pick = PickResult::new(Point3::new(0.0, 0.0, 0.0), 3.0, mesh)
            .with_kind(PickKind::Ifc { features: vec![feature] });

        let feature = FeatureExtractor::new().classify(&pick, &tree, &NoShapes).unwrap();
        assert_eq!(feature.name, "Campus");
        assert_eq!(
            values(&feature, IFC_GROUP),
            [
                ("Site", "Campus".to_string()),
                ("IFCType", "IFCWALL".to_string()),
                ("Name", "Wall-01".to_string()),
                ("ID", "42".to_string()),
                ("GlobalId", "NULL".to_string()),
                ("Description", "Load bearing".to_string()),
            ]
        );
        assert_eq!(values(&feature, "Pset_WallCommon"), [("IsExternal", "true".to_string())]);
        assert_eq!(values(&feature, "Qto_WallBaseQuantities"), [("Width", "0.3".to_string())]);
        assert_eq!(
            values(&feature, DATASET_GROUP),
            [("Dataset", "Campus".to_string()), ("File", "campus.ifc".to_string())]
        );
    }

    #[test]
    fn metadata_walk_stops_at_feature_tile() {
        let mut tree = ObjectTree::new();
        let root = tree.add_object(None, "collection");
        let tile = tree.add_object(Some(root), "tile");
        let mesh = tree.add_object(Some(tile), "mesh");
        tree.object_mut(root).unwrap().metadata = metadata(json!({"source": "wfs"}));
        tree.object_mut(root).unwrap().dataset = Some(DatasetTag::named("Buildings"));
        tree.object_mut(tile).unwrap().is_feature_tile = true;
        tree.object_mut(tile).unwrap().metadata = metadata(json!({"zoom": 14}));
        tree.object_mut(mesh).unwrap().metadata = metadata(json!({
            "id": "b-1",
            "bbox": [0, 0, 1, 1],
            "hover": true,
            "properties": {"height": 12.5, "tags": ["a"]},
            "feature": {"usage": "residential", "extra": null},
        }));

        let pick = PickResult::new(Point3::new(0.0, 0.0, 0.0), 3.0, mesh)
            .with_kind(PickKind::FeatureCollection);
        let feature = FeatureExtractor::new().classify(&pick, &tree, &NoShapes).unwrap();

        assert_eq!(feature.name, "mesh");
        assert_eq!(feature.parent, mesh.to_string());
        assert_eq!(
            values(&feature, FEATURE_GROUP),
            [
                ("usage", "residential".to_string()),
                ("fid", "b-1".to_string()),
                ("height", "12.5".to_string()),
            ]
        );
        // 数据集标签不受要素瓦片边界限制
        assert_eq!(values(&feature, DATASET_GROUP), [("Dataset", "Buildings".to_string())]);
    }

    #[test]
    fn point_cloud_and_mesh_picks() {
        let mut tree = ObjectTree::new();
        let node = tree.add_object(None, "r0123");
        let pick = PickResult::new(Point3::new(0.0, 0.0, 0.0), 3.0, node).with_kind(PickKind::PointCloud);
        let feature = FeatureExtractor::new().classify(&pick, &tree, &NoShapes).unwrap();
        assert_eq!(values(&feature, DATASET_GROUP), [("Tile", "r0123".to_string())]);

        let pick = PickResult::new(Point3::new(0.0, 0.0, 0.0), 3.0, node).with_kind(PickKind::Mesh {
            colors: vec![VertexColor { r: 1.0, g: 0.0, b: 0.0 }],
        });
        let feature = FeatureExtractor::new().classify(&pick, &tree, &NoShapes).unwrap();
        assert_eq!(values(&feature, PLY_GROUP), [("Color", "#ff0000".to_string())]);
    }

    #[test]
    fn city_object_pick() {
        let mut tree = ObjectTree::new();
        let node = tree.add_object(None, "city");
        let pick = PickResult::new(Point3::new(0.0, 0.0, 0.0), 3.0, node).with_kind(PickKind::CityObject {
            features: vec![CityObjectFeature {
                object_id: "NL.IMBAG.1".to_string(),
                object_type: "Building".to_string(),
                lod: Some("2.2".to_string()),
                surface_type: Some("RoofSurface".to_string()),
            }],
        });
        let feature = FeatureExtractor::new().classify(&pick, &tree, &NoShapes).unwrap();
        assert_eq!(
            values(&feature, CITYJSON_GROUP),
            [
                ("ID", "NL.IMBAG.1".to_string()),
                ("Type", "Building".to_string()),
                ("LoD", "2.2".to_string()),
                ("Surface type", "RoofSurface".to_string()),
            ]
        );
    }

    #[test]
    fn shape_pick_reports_owner_and_measurements() {
        let style = ShapeStyle {
            color: Color::from_hex(0x377c5f),
            highlight_color: Color::from_hex(0x50bf91),
            vertex_radius: 5.0,
        };
        let shape = Shape::new(GeometryKind::Polygon, style, ShapeFlags::default()).with_points(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2000.0, 0.0, 0.0),
            Point3::new(2000.0, 1000.0, 3.0),
            Point3::new(0.0, 1000.0, 3.0),
        ]);
        let annotation = Annotation {
            uuid: Uuid::new_v4(),
            title: "Field".to_string(),
            visible: true,
            is_editing: false,
            shape: shape.id(),
            properties: metadata(json!({"crop": "wheat", "geometry": "x"})),
        };
        let directory = OneAnnotation { annotation, shape };

        let mut tree = ObjectTree::new();
        let object = tree.add_object(None, "shape");
        let mut pick = PickResult::new(Point3::new(0.0, 0.0, 0.0), 3.0, object).with_kind(PickKind::Shape {
            shape: directory.shape.id(),
        });

        let extractor = FeatureExtractor::new();
        let feature = extractor
            .classify_cached(&mut pick, &tree, &directory)
            .unwrap()
            .clone();
        assert_eq!(feature.name, "Field");
        assert_eq!(values(&feature, GEOJSON_GROUP), [("crop", "wheat".to_string())]);
        let measurement = values(&feature, MEASUREMENT_GROUP);
        assert_eq!(measurement[0].0, "Area");
        assert_eq!(measurement[0].1, "2.00 km²");
        assert_eq!(measurement[1], ("Perimeter", "6.00 km".to_string()));
        assert_eq!(measurement[2], ("Min altitude", "0.00 m".to_string()));
        assert_eq!(measurement[3], ("Max altitude", "3.00 m".to_string()));
        assert!(pick.cached_feature().is_some());
    }
}
