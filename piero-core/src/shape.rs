use std::fmt;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{Color, Point3};
use crate::units::{self, Precision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeId(Uuid);

impl ShapeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[inline]
    pub fn get(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shape-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    Polygon,
}

impl GeometryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::MultiPoint => "MultiPoint",
            GeometryKind::LineString => "LineString",
            GeometryKind::Polygon => "Polygon",
        }
    }

    /// 编辑时允许保留的最少顶点数。多边形按闭合环计数（首尾重复点各算一次）。
    pub fn removal_floor(self) -> usize {
        match self {
            GeometryKind::Point | GeometryKind::MultiPoint => 1,
            GeometryKind::LineString => 2,
            GeometryKind::Polygon => 4,
        }
    }

    #[inline]
    pub fn is_ring(self) -> bool {
        matches!(self, GeometryKind::Polygon)
    }

    /// 各几何类型对应的渲染开关；标签开关跟随 `show_labels`。
    pub fn flags(self, show_labels: bool) -> ShapeFlags {
        match self {
            GeometryKind::Point | GeometryKind::MultiPoint => ShapeFlags {
                show_vertices: true,
                show_vertex_labels: show_labels,
                ..ShapeFlags::default()
            },
            GeometryKind::LineString => ShapeFlags {
                show_vertices: true,
                show_line: true,
                show_segment_labels: show_labels,
                ..ShapeFlags::default()
            },
            GeometryKind::Polygon => ShapeFlags {
                show_vertices: true,
                show_line: true,
                show_surface: true,
                show_surface_label: show_labels,
                ..ShapeFlags::default()
            },
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShapeFlags {
    pub show_vertices: bool,
    pub show_vertex_labels: bool,
    pub show_line: bool,
    pub show_segment_labels: bool,
    pub show_surface: bool,
    pub show_surface_label: bool,
    pub show_line_label: bool,
}

impl ShapeFlags {
    /// 量测线段：整条线一个长度标签。
    pub fn measure() -> Self {
        Self {
            show_vertices: true,
            show_line: true,
            show_line_label: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeStyle {
    pub color: Color,
    pub highlight_color: Color,
    pub vertex_radius: f64,
}

/// 形状的缓存量测值，顶点变化后重新计算。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurements {
    pub area: Option<f64>,
    pub perimeter: Option<f64>,
    pub min_altitude: f64,
    pub max_altitude: f64,
}

impl Measurements {
    pub fn compute(kind: GeometryKind, points: &[Point3]) -> Self {
        let (min_altitude, max_altitude) = points.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(min, max), p| (min.min(p.z()), max.max(p.z())),
        );
        let perimeter = match kind {
            GeometryKind::LineString | GeometryKind::Polygon => polyline_length(points),
            _ => None,
        };
        let area = match kind {
            GeometryKind::Polygon => ring_area(open_ring(points)),
            _ => None,
        };
        Self {
            area,
            perimeter,
            min_altitude,
            max_altitude,
        }
    }

    /// 空形状没有高程范围。
    #[inline]
    pub fn has_altitudes(&self) -> bool {
        self.min_altitude <= self.max_altitude
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelAnchor {
    Vertex(usize),
    Segment(usize),
    Surface,
    Line,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeLabel {
    pub anchor: LabelAnchor,
    pub text: String,
}

/// 视口投影：世界坐标到 NDC，以及视口像素宽度。
pub trait Viewport {
    fn project(&self, point: Point3) -> DVec3;
    fn width(&self) -> f64;
}

pub struct LabelContext<'a> {
    pub viewport: &'a dyn Viewport,
    /// 屏幕上短于该像素数的线段不显示长度标签。
    pub min_segment_pixels: f64,
    /// 所属标注的标题，用作顶点标签。
    pub title: Option<&'a str>,
}

pub fn segment_label(start: Point3, end: Point3, context: &LabelContext<'_>) -> Option<String> {
    let width = context.viewport.width();
    if width > 0.0 {
        let ndc_start = context.viewport.project(start);
        let ndc_end = context.viewport.project(end);
        let limit = (context.min_segment_pixels / width).powi(2);
        if ndc_start.distance_squared(ndc_end) < limit {
            return None;
        }
    }
    let length = start.distance(end);
    if !(length > 0.0) {
        return None;
    }
    Some(units::format_length(length, Precision::AtMost(1)))
}

pub fn surface_label(area: f64) -> String {
    units::format_area(area, Precision::AtMost(1))
}

pub fn line_label(length: f64) -> String {
    format!("{} m", units::format_number(length, Precision::AtMost(2)))
}

/// 可编辑的顶点几何，承载标注或量测。多边形以闭合环（首尾点相同）存储。
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    id: ShapeId,
    kind: GeometryKind,
    points: Vec<Point3>,
    flags: ShapeFlags,
    style: ShapeStyle,
    color: Color,
    highlightable: bool,
    visible: bool,
    measurements: Measurements,
    labels: Vec<ShapeLabel>,
}

impl Shape {
    pub fn new(kind: GeometryKind, style: ShapeStyle, flags: ShapeFlags) -> Self {
        Self {
            id: ShapeId::generate(),
            kind,
            points: Vec::new(),
            flags,
            style,
            color: style.color,
            highlightable: true,
            visible: true,
            measurements: Measurements::compute(kind, &[]),
            labels: Vec::new(),
        }
    }

    pub fn with_points(mut self, points: Vec<Point3>) -> Self {
        self.set_points(points);
        self
    }

    #[inline]
    pub fn id(&self) -> ShapeId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    #[inline]
    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    /// 替换全部顶点；多边形自动闭合，随后重新计算量测值。
    pub fn set_points(&mut self, points: Vec<Point3>) {
        self.points = points;
        self.close_ring();
        self.refresh_measurements();
    }

    fn close_ring(&mut self) {
        if !self.kind.is_ring() || self.points.len() < 3 {
            return;
        }
        let first = self.points[0];
        if self.points.last() != Some(&first) {
            self.points.push(first);
        }
    }

    /// 按当前顶点重新计算量测值。
    pub fn refresh_measurements(&mut self) {
        self.measurements = Measurements::compute(self.kind, &self.points);
    }

    #[inline]
    pub fn flags(&self) -> ShapeFlags {
        self.flags
    }

    #[inline]
    pub fn set_flags(&mut self, flags: ShapeFlags) {
        self.flags = flags;
    }

    #[inline]
    pub fn style(&self) -> ShapeStyle {
        self.style
    }

    #[inline]
    pub fn color(&self) -> Color {
        self.color
    }

    #[inline]
    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    #[inline]
    pub fn highlight_color(&self) -> Color {
        self.style.highlight_color
    }

    #[inline]
    pub fn highlightable(&self) -> bool {
        self.highlightable
    }

    #[inline]
    pub fn set_highlightable(&mut self, value: bool) {
        self.highlightable = value;
    }

    #[inline]
    pub fn visible(&self) -> bool {
        self.visible
    }

    #[inline]
    pub fn set_visible(&mut self, value: bool) {
        self.visible = value;
    }

    #[inline]
    pub fn measurements(&self) -> &Measurements {
        &self.measurements
    }

    #[inline]
    pub fn labels(&self) -> &[ShapeLabel] {
        &self.labels
    }

    /// 折线总长度（多边形含闭合边），不足两个顶点时为 `None`。
    pub fn length(&self) -> Option<f64> {
        polyline_length(&self.points)
    }

    pub fn area(&self) -> Option<f64> {
        if self.kind.is_ring() {
            ring_area(open_ring(&self.points))
        } else {
            None
        }
    }

    #[inline]
    pub fn can_remove_vertex(&self) -> bool {
        self.points.len() > self.kind.removal_floor()
    }

    pub fn move_vertex(&mut self, index: usize, point: Point3) -> bool {
        if self.is_closed_ring() {
            let mut ring = open_ring(&self.points).to_vec();
            let index = self.ring_index(index);
            let Some(slot) = ring.get_mut(index) else {
                return false;
            };
            *slot = point;
            self.reclose(ring);
        } else {
            let Some(slot) = self.points.get_mut(index) else {
                return false;
            };
            *slot = point;
        }
        self.refresh_measurements();
        true
    }

    pub fn insert_vertex(&mut self, index: usize, point: Point3) -> bool {
        if self.is_closed_ring() {
            let mut ring = open_ring(&self.points).to_vec();
            if index > ring.len() {
                return false;
            }
            ring.insert(index, point);
            self.reclose(ring);
        } else {
            if index > self.points.len() {
                return false;
            }
            self.points.insert(index, point);
        }
        self.refresh_measurements();
        true
    }

    /// 删除顶点；低于最少顶点数时拒绝。
    pub fn remove_vertex(&mut self, index: usize) -> bool {
        if !self.can_remove_vertex() || index >= self.points.len() {
            return false;
        }
        if self.is_closed_ring() {
            let mut ring = open_ring(&self.points).to_vec();
            ring.remove(self.ring_index(index));
            self.reclose(ring);
        } else {
            self.points.remove(index);
        }
        self.refresh_measurements();
        true
    }

    fn is_closed_ring(&self) -> bool {
        self.kind.is_ring() && self.points.len() >= 2 && self.points.first() == self.points.last()
    }

    // 闭合点与首点是同一个顶点
    fn ring_index(&self, index: usize) -> usize {
        if index + 1 == self.points.len() { 0 } else { index }
    }

    fn reclose(&mut self, mut ring: Vec<Point3>) {
        if let Some(first) = ring.first().copied() {
            ring.push(first);
        }
        self.points = ring;
    }

    /// 复制形状并分配新的 ID。
    pub fn duplicate(&self) -> Self {
        Self {
            id: ShapeId::generate(),
            labels: Vec::new(),
            ..self.clone()
        }
    }

    pub fn rebuild_labels(&mut self, context: &LabelContext<'_>) {
        let mut labels = Vec::new();
        if self.flags.show_vertex_labels {
            if let Some(title) = context.title {
                labels.extend((0..self.points.len()).map(|index| ShapeLabel {
                    anchor: LabelAnchor::Vertex(index),
                    text: title.to_string(),
                }));
            }
        }
        if self.flags.show_segment_labels {
            for (index, pair) in self.points.windows(2).enumerate() {
                if let Some(text) = segment_label(pair[0], pair[1], context) {
                    labels.push(ShapeLabel {
                        anchor: LabelAnchor::Segment(index),
                        text,
                    });
                }
            }
        }
        if self.flags.show_surface_label {
            if let Some(area) = self.area() {
                labels.push(ShapeLabel {
                    anchor: LabelAnchor::Surface,
                    text: surface_label(area),
                });
            }
        }
        if self.flags.show_line_label {
            if let Some(length) = self.length() {
                labels.push(ShapeLabel {
                    anchor: LabelAnchor::Line,
                    text: line_label(length),
                });
            }
        }
        self.labels = labels;
    }
}

fn polyline_length(points: &[Point3]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    Some(points.windows(2).map(|pair| pair[0].distance(pair[1])).sum())
}

fn open_ring(points: &[Point3]) -> &[Point3] {
    match points {
        [first, .., last] if first == last && points.len() > 1 => &points[..points.len() - 1],
        _ => points,
    }
}

/// Newell 法求平面多边形面积，适用于任意朝向的平面环。
fn ring_area(ring: &[Point3]) -> Option<f64> {
    if ring.len() < 3 {
        return None;
    }
    let normal = ring
        .iter()
        .zip(ring.iter().cycle().skip(1))
        .fold(DVec3::ZERO, |acc, (a, b)| acc + a.as_vec3().cross(b.as_vec3()));
    Some(normal.length() * 0.5)
}
