//! 无界面的内存场景：透视相机、三角网格、形状快照与实体选择集。

use std::collections::HashMap;

use glam::{DMat4, DVec3};
use piero_core::{
    geometry::{Color, IdentityFrame, Point2, Point3, ReferenceFrame, Vector3},
    pick::{ClippingBox, DepthRange, Face, PickKind, PickResult, RayHit},
    scene::{DatasetTag, EntityId, ObjectId, ObjectRole, ObjectTree},
    shape::{GeometryKind, Shape, ShapeId, ShapeLabel, Viewport},
};
use tracing::debug;

use crate::host::{PickOptions, PickSource, PickTarget, SceneHost};

const DEFAULT_FOV_Y: f64 = std::f64::consts::FRAC_PI_3;
const DEFAULT_NEAR: f64 = 0.1;
const DEFAULT_FAR: f64 = 10_000.0;
/// 射线与形状顶点的命中容差（世界单位）。
const SHAPE_RAY_TOLERANCE: f64 = 0.05;
const TRIANGLE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: DVec3,
    pub target: DVec3,
    pub up: DVec3,
    /// 垂直视场角（弧度）。
    pub fov_y: f64,
    pub near: f64,
    pub far: f64,
    /// 视口像素尺寸。
    pub width: f64,
    pub height: f64,
}

impl Camera {
    pub fn look_at(position: Point3, target: Point3, width: f64, height: f64) -> Self {
        Self {
            position: position.as_vec3(),
            target: target.as_vec3(),
            up: DVec3::Z,
            fov_y: DEFAULT_FOV_Y,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
            width,
            height,
        }
    }

    fn aspect(&self) -> f64 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }

    fn view(&self) -> DMat4 {
        DMat4::look_at_rh(self.position, self.target, self.up)
    }

    fn view_projection(&self) -> DMat4 {
        DMat4::perspective_rh_gl(self.fov_y, self.aspect(), self.near, self.far) * self.view()
    }

    /// 屏幕像素（左上角为原点）对应的世界射线：起点为相机位置，方向已归一化。
    pub fn ray(&self, screen: Point2) -> (DVec3, DVec3) {
        let x = 2.0 * screen.x() / self.width - 1.0;
        let y = 1.0 - 2.0 * screen.y() / self.height;
        let inverse = self.view_projection().inverse();
        let near = inverse.project_point3(DVec3::new(x, y, -1.0));
        let far = inverse.project_point3(DVec3::new(x, y, 1.0));
        (self.position, (far - near).normalize_or_zero())
    }

    /// 相机前方的点投影到屏幕像素坐标；近裁剪面之后的点返回 `None`。
    pub fn to_screen(&self, point: Point3) -> Option<Point2> {
        let view = self.view().transform_point3(point.as_vec3());
        if view.z > -self.near {
            return None;
        }
        let ndc = self.view_projection().project_point3(point.as_vec3());
        Some(Point2::new(
            (ndc.x + 1.0) * 0.5 * self.width,
            (1.0 - ndc.y) * 0.5 * self.height,
        ))
    }

    #[inline]
    pub fn depth_range(&self) -> DepthRange {
        DepthRange {
            near: self.near,
            far: self.far,
        }
    }
}

impl Viewport for Camera {
    fn project(&self, point: Point3) -> DVec3 {
        self.view_projection().project_point3(point.as_vec3())
    }

    fn width(&self) -> f64 {
        self.width
    }
}

/// 对象局部坐标下的三角网格。
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<DVec3>,
    pub triangles: Vec<[u32; 3]>,
    /// 命中该网格时报告的拾取种类。
    pub kind: PickKind,
}

#[derive(Debug, Clone, Copy)]
struct MeshHit {
    distance: f64,
    point: DVec3,
    face: Face,
    /// 局部坐标系下的面法线。
    normal: DVec3,
}

impl Mesh {
    pub fn new(vertices: Vec<DVec3>, triangles: Vec<[u32; 3]>, kind: PickKind) -> Self {
        Self {
            vertices,
            triangles,
            kind,
        }
    }

    /// 四边形；顶点逆时针排列时法线朝向观察者。
    pub fn quad(corners: [Point3; 4], kind: PickKind) -> Self {
        Self::new(
            corners.iter().map(|corner| corner.as_vec3()).collect(),
            vec![[0, 1, 2], [0, 2, 3]],
            kind,
        )
    }

    fn hits(&self, origin: DVec3, direction: DVec3, matrix: &DMat4) -> Vec<MeshHit> {
        self.triangles
            .iter()
            .filter_map(|&[a, b, c]| {
                let local = [
                    *self.vertices.get(a as usize)?,
                    *self.vertices.get(b as usize)?,
                    *self.vertices.get(c as usize)?,
                ];
                let world = local.map(|vertex| matrix.transform_point3(vertex));
                let distance = intersect_triangle(origin, direction, world)?;
                Some(MeshHit {
                    distance,
                    point: origin + direction * distance,
                    face: Face { a, b, c },
                    normal: (local[1] - local[0])
                        .cross(local[2] - local[0])
                        .normalize_or_zero(),
                })
            })
            .collect()
    }

    fn nearest_hit(&self, origin: DVec3, direction: DVec3, matrix: &DMat4) -> Option<MeshHit> {
        self.hits(origin, direction, matrix)
            .into_iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

/// Möller–Trumbore 射线三角形求交（双面），返回沿射线的距离。
fn intersect_triangle(origin: DVec3, direction: DVec3, [a, b, c]: [DVec3; 3]) -> Option<f64> {
    let edge1 = b - a;
    let edge2 = c - a;
    let p = direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < TRIANGLE_EPSILON {
        return None;
    }
    let inv = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = direction.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv;
    (t > TRIANGLE_EPSILON).then_some(t)
}

/// 场景中形状的显示状态。
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeSnapshot {
    pub object: ObjectId,
    pub kind: GeometryKind,
    pub points: Vec<Point3>,
    pub color: Color,
    pub visible: bool,
    pub vertex_radius: f64,
    pub labels: Vec<ShapeLabel>,
}

impl ShapeSnapshot {
    fn capture(object: ObjectId, shape: &Shape) -> Self {
        Self {
            object,
            kind: shape.kind(),
            points: shape.points().to_vec(),
            color: shape.color(),
            visible: shape.visible(),
            vertex_radius: shape.style().vertex_radius,
            labels: shape.labels().to_vec(),
        }
    }
}

fn target_accepts(target: PickTarget, role: ObjectRole) -> bool {
    match target {
        PickTarget::All => true,
        PickTarget::MapsOnly => role == ObjectRole::Map,
        PickTarget::NonMaps => role == ObjectRole::Model,
    }
}

pub struct Scene {
    objects: ObjectTree,
    camera: Camera,
    meshes: HashMap<ObjectId, Mesh>,
    shapes: HashMap<ShapeId, ShapeSnapshot>,
    selections: HashMap<(EntityId, String), String>,
    clipping: Option<ClippingBox>,
    frame: Box<dyn ReferenceFrame>,
    redraws: u64,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            objects: ObjectTree::new(),
            camera,
            meshes: HashMap::new(),
            shapes: HashMap::new(),
            selections: HashMap::new(),
            clipping: None,
            frame: Box::new(IdentityFrame),
            redraws: 0,
        }
    }

    pub fn with_frame(mut self, frame: impl ReferenceFrame + 'static) -> Self {
        self.frame = Box::new(frame);
        self
    }

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    #[inline]
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    #[inline]
    pub fn objects_mut(&mut self) -> &mut ObjectTree {
        &mut self.objects
    }

    pub fn add_entity(&mut self, name: impl Into<String>, dataset: Option<DatasetTag>) -> EntityId {
        self.objects.add_entity(name, dataset)
    }

    /// 在 `parent` 下创建对象并挂载网格。
    pub fn add_mesh(&mut self, parent: Option<ObjectId>, name: impl Into<String>, mesh: Mesh) -> ObjectId {
        let id = self.objects.add_object(parent, name);
        self.meshes.insert(id, mesh);
        id
    }

    pub fn set_role(&mut self, id: ObjectId, role: ObjectRole) {
        if let Some(object) = self.objects.object_mut(id) {
            object.role = role;
        }
    }

    pub fn set_clipping_box(&mut self, clipping: Option<ClippingBox>) {
        self.clipping = clipping;
    }

    pub fn shape(&self, id: ShapeId) -> Option<&ShapeSnapshot> {
        self.shapes.get(&id)
    }

    #[inline]
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn selection(&self, entity: EntityId, set: &str) -> Option<&str> {
        self.selections
            .get(&(entity, set.to_string()))
            .map(String::as_str)
    }

    #[inline]
    pub fn redraw_count(&self) -> u64 {
        self.redraws
    }

    pub fn screen_position(&self, point: Point3) -> Option<Point2> {
        self.camera.to_screen(point)
    }

    fn pick_shape(&self, id: ShapeId, shape: &ShapeSnapshot, position: Point2, radius: f64) -> Option<PickResult> {
        let threshold = radius + shape.vertex_radius;
        shape
            .points
            .iter()
            .filter_map(|point| {
                let screen = self.camera.to_screen(*point)?;
                let offset = screen.as_vec2().distance(position.as_vec2());
                (offset <= threshold).then_some((offset, *point))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, point)| {
                let distance = point.as_vec3().distance(self.camera.position);
                PickResult::new(point, distance, shape.object).with_kind(PickKind::Shape { shape: id })
            })
    }
}

impl PickSource for Scene {
    fn pick_at(&self, position: Point2, options: &PickOptions<'_>) -> Vec<PickResult> {
        let (origin, direction) = self.camera.ray(position);
        let mut picked = Vec::new();

        for (id, mesh) in &self.meshes {
            let Some(object) = self.objects.object(*id) else {
                continue;
            };
            if !target_accepts(options.target, object.role) {
                continue;
            }
            let Some(hit) = mesh.nearest_hit(origin, direction, &object.world_matrix) else {
                continue;
            };
            let mut pick = PickResult::new(Point3(hit.point), hit.distance, *id)
                .with_face(hit.face)
                .with_normal(Vector3(hit.normal))
                .with_matrix(object.world_matrix)
                .with_kind(mesh.kind.clone());
            if let Some(entity) = object.entity {
                pick = pick.with_entity(entity);
            }
            if options.accepts(&pick) {
                picked.push(pick);
            }
        }

        if options.target != PickTarget::MapsOnly {
            for (id, shape) in &self.shapes {
                if !shape.visible {
                    continue;
                }
                if let Some(pick) = self.pick_shape(*id, shape, position, options.radius) {
                    if options.accepts(&pick) {
                        picked.push(pick);
                    }
                }
            }
        }

        if options.sort_by_distance {
            picked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        }
        if let Some(limit) = options.limit {
            picked.truncate(limit);
        }
        picked
    }

    fn raycast(&self, origin: Point3, direction: Vector3) -> Vec<RayHit> {
        let Some(direction) = direction.normalize() else {
            return Vec::new();
        };
        let (origin, direction) = (origin.as_vec3(), direction.as_vec3());
        let mut hits = Vec::new();

        for (id, mesh) in &self.meshes {
            let Some(object) = self.objects.object(*id) else {
                continue;
            };
            hits.extend(
                mesh.hits(origin, direction, &object.world_matrix)
                    .into_iter()
                    .map(|hit| RayHit {
                        point: Point3(hit.point),
                        distance: hit.distance,
                        object: Some(*id),
                        shape: None,
                    }),
            );
        }

        for (id, shape) in &self.shapes {
            if !shape.visible {
                continue;
            }
            for point in &shape.points {
                let t = (point.as_vec3() - origin).dot(direction);
                let closest = origin + direction * t;
                if t > 0.0 && closest.distance(point.as_vec3()) <= SHAPE_RAY_TOLERANCE {
                    hits.push(RayHit {
                        point: *point,
                        distance: t,
                        object: Some(shape.object),
                        shape: Some(*id),
                    });
                }
            }
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn depth_range(&self) -> DepthRange {
        self.camera.depth_range()
    }

    fn clipping_box(&self) -> Option<ClippingBox> {
        self.clipping
    }
}

impl SceneHost for Scene {
    fn objects(&self) -> &ObjectTree {
        &self.objects
    }

    fn viewport(&self) -> &dyn Viewport {
        &self.camera
    }

    fn reference_frame(&self) -> &dyn ReferenceFrame {
        self.frame.as_ref()
    }

    fn add_shape(&mut self, shape: &Shape) {
        let object = self.objects.add_object(None, shape.id().to_string());
        self.shapes.insert(shape.id(), ShapeSnapshot::capture(object, shape));
        debug!(shape = %shape.id(), %object, "形状已加入场景");
    }

    fn update_shape(&mut self, shape: &Shape) {
        match self.shapes.get_mut(&shape.id()) {
            Some(snapshot) => *snapshot = ShapeSnapshot::capture(snapshot.object, shape),
            None => self.add_shape(shape),
        }
    }

    fn remove_shape(&mut self, id: ShapeId) {
        if let Some(snapshot) = self.shapes.remove(&id) {
            self.objects.remove_object(snapshot.object);
            debug!(shape = %id, "形状已移出场景");
        }
    }

    fn notify_change(&mut self) {
        self.redraws += 1;
    }

    fn select_item(&mut self, entity: EntityId, set: &str, item_id: &str) {
        self.selections
            .insert((entity, set.to_string()), item_id.to_string());
    }

    fn clear_selection_set(&mut self, entity: EntityId, set: &str) {
        self.selections.remove(&(entity, set.to_string()));
    }
}
