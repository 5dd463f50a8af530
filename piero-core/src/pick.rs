use glam::DMat4;
use serde_json::Value;

use crate::feature::Feature;
use crate::geometry::{Bounds3, Point3, Vector3};
use crate::scene::{EntityId, Metadata, ObjectId};
use crate::shape::ShapeId;

/// 命中三角形的顶点索引（几何体局部）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Face {
    pub a: u32,
    pub b: u32,
    pub c: u32,
}

/// 底图矢量瓦片中的要素。
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFeature {
    pub id: Option<Value>,
    pub properties: Metadata,
    pub layer: String,
}

/// BIM 构件的标识字段，由实体在拾取时解析。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IfcItem {
    /// 稳定的构件 ID，高亮时用于选择集。
    pub item_id: String,
    pub express_id: u64,
    pub category: Option<String>,
    pub name: Option<String>,
    pub global_id: Option<String>,
    pub description: Option<String>,
    pub predefined_type: Option<String>,
    pub object_type: Option<String>,
}

/// 属性集或数量集中的一项，`set_name` 为所属集合名。
#[derive(Debug, Clone, PartialEq)]
pub struct IfcProperty {
    pub set_name: String,
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfcFeature {
    pub item: IfcItem,
    pub properties: Vec<IfcProperty>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityObjectFeature {
    pub object_id: String,
    pub object_type: String,
    pub lod: Option<String>,
    pub surface_type: Option<String>,
}

/// 逐顶点颜色，分量范围 `[0, 1]`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

/// 拾取结果的种类。新增种类时，分类器中的 `match` 会强制补齐处理分支。
#[derive(Debug, Clone, PartialEq)]
pub enum PickKind {
    /// 底图瓦片，附带光标下的矢量要素。
    Map { features: Vec<VectorFeature> },
    /// 结构化模型（IFC）构件。
    Ifc { features: Vec<IfcFeature> },
    /// 层级场景对象（CityJSON）。
    CityObject { features: Vec<CityObjectFeature> },
    PointCloud,
    FeatureCollection,
    /// 网格级要素（如 PLY 顶点颜色）。
    Mesh { colors: Vec<VertexColor> },
    /// 标注或量测的形状。
    Shape { shape: ShapeId },
    /// 无实体特定信息的普通表面。
    Surface,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickResult {
    pub point: Point3,
    pub distance: f64,
    pub normal: Option<Vector3>,
    pub face: Option<Face>,
    pub object: ObjectId,
    pub entity: Option<EntityId>,
    pub object_matrix: DMat4,
    pub kind: PickKind,
    feature: Option<Feature>,
}

impl PickResult {
    pub fn new(point: Point3, distance: f64, object: ObjectId) -> Self {
        Self {
            point,
            distance,
            normal: None,
            face: None,
            object,
            entity: None,
            object_matrix: DMat4::IDENTITY,
            kind: PickKind::Surface,
            feature: None,
        }
    }

    pub fn with_normal(mut self, normal: Vector3) -> Self {
        self.normal = Some(normal);
        self
    }

    pub fn with_face(mut self, face: Face) -> Self {
        self.face = Some(face);
        self
    }

    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_kind(mut self, kind: PickKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_matrix(mut self, matrix: DMat4) -> Self {
        self.object_matrix = matrix;
        self
    }

    #[inline]
    pub fn is_shape(&self) -> bool {
        matches!(self.kind, PickKind::Shape { .. })
    }

    #[inline]
    pub fn is_map(&self) -> bool {
        matches!(self.kind, PickKind::Map { .. })
    }

    pub fn shape_id(&self) -> Option<ShapeId> {
        match self.kind {
            PickKind::Shape { shape } => Some(shape),
            _ => None,
        }
    }

    /// 最近一次分类得到的要素缓存。
    #[inline]
    pub fn cached_feature(&self) -> Option<&Feature> {
        self.feature.as_ref()
    }

    pub fn cache_feature(&mut self, feature: Feature) -> &Feature {
        self.feature.insert(feature)
    }
}

/// 射线求交结果；`shape` 表示命中的是哪个形状对象。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Point3,
    pub distance: f64,
    pub object: Option<ObjectId>,
    pub shape: Option<ShapeId>,
}

/// 相机的近/远裁剪距离。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub near: f64,
    pub far: f64,
}

impl DepthRange {
    #[inline]
    pub fn contains(&self, distance: f64) -> bool {
        distance >= self.near && distance <= self.far
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipMode {
    /// 仅保留盒内的拾取。
    #[default]
    Include,
    /// 仅保留盒外的拾取。
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippingBox {
    pub bounds: Bounds3,
    pub mode: ClipMode,
}

impl ClippingBox {
    pub fn accepts(&self, point: Point3) -> bool {
        let inside = self.bounds.contains_point(point);
        match self.mode {
            ClipMode::Include => inside,
            ClipMode::Exclude => !inside,
        }
    }
}

/// 拾取过滤：裁剪盒之外（或反向模式下之内）及相机深度范围之外的结果被丢弃。
pub fn is_pick_accepted(pick: &PickResult, clipping: Option<&ClippingBox>, range: DepthRange) -> bool {
    if let Some(clipping) = clipping {
        if !clipping.accepts(pick.point) {
            return false;
        }
    }
    range.contains(pick.distance)
}
