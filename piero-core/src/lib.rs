pub mod feature;
pub mod pick;
pub mod scene;
pub mod shape;
pub mod units;

pub mod geometry {
    use std::fmt;
    use std::str::FromStr;

    use glam::{DMat4, DVec2, DVec3};
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    /// 屏幕坐标（像素），原点位于视口左上角。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 场景坐标系下的三维点。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        #[inline]
        pub fn to_array(self) -> [f64; 3] {
            self.0.to_array()
        }

        #[inline]
        pub fn distance(self, other: Point3) -> f64 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn translate(self, offset: Vector3) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point3) -> Vector3 {
            Vector3(other.0 - self.0)
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    impl fmt::Display for Point3 {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "({:.2}, {:.2}, {:.2})", self.x(), self.y(), self.z())
        }
    }

    /// 三维向量，主要用于表面法线与射线方向。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector3(pub DVec3);

    impl Vector3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn normalize(self) -> Option<Self> {
            let len = self.0.length();
            if len <= f64::EPSILON || !len.is_finite() {
                None
            } else {
                Some(Self(self.0 / len))
            }
        }

        #[inline]
        pub fn scale(self, factor: f64) -> Self {
            Self(self.0 * factor)
        }

        #[inline]
        pub fn dot(self, other: Vector3) -> f64 {
            self.0.dot(other.0)
        }

        #[inline]
        pub fn cross(self, other: Vector3) -> Vector3 {
            Self(self.0.cross(other.0))
        }

        /// 将局部方向变换到世界坐标并归一化（忽略平移分量）。
        pub fn transform_direction(self, matrix: &DMat4) -> Option<Self> {
            Self(matrix.transform_vector3(self.0)).normalize()
        }
    }

    impl From<DVec3> for Vector3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 三维轴对齐包围盒，用于裁剪盒判定。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds3 {
        min: Point3,
        max: Point3,
    }

    impl Bounds3 {
        /// 由任意两个角点构造，内部会按分量排序。
        pub fn new(a: Point3, b: Point3) -> Self {
            Self {
                min: Point3(a.0.min(b.0)),
                max: Point3(a.0.max(b.0)),
            }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point3(DVec3::splat(f64::INFINITY)),
                max: Point3(DVec3::splat(f64::NEG_INFINITY)),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y() || self.min.z() > self.max.z()
        }

        #[inline]
        pub fn min(&self) -> Point3 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point3 {
            self.max
        }

        pub fn include_point(&mut self, point: Point3) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = Point3(self.min.0.min(point.0));
            self.max = Point3(self.max.0.max(point.0));
        }

        /// 边界上的点视为包含在内。
        pub fn contains_point(&self, point: Point3) -> bool {
            if self.is_empty() {
                return false;
            }
            let p = point.0;
            p.cmpge(self.min.0).all() && p.cmple(self.max.0).all()
        }
    }

    #[derive(Debug, Error, PartialEq, Eq)]
    #[error("invalid color `{0}`")]
    pub struct ColorParseError(pub String);

    /// 24 位 RGB 颜色，序列化为 `#rrggbb`。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct Color(u32);

    impl Color {
        pub const WHITE: Color = Color(0xffffff);
        pub const BLACK: Color = Color(0x000000);

        #[inline]
        pub const fn from_hex(rgb: u32) -> Self {
            Self(rgb & 0x00ff_ffff)
        }

        #[inline]
        pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
            Self(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
        }

        /// 分量取值范围为 `[0, 1]`，超出部分会被截断。
        pub fn from_unit_rgb(r: f32, g: f32, b: f32) -> Self {
            let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            Self::from_rgb(to_byte(r), to_byte(g), to_byte(b))
        }

        #[inline]
        pub fn hex(self) -> u32 {
            self.0
        }

        #[inline]
        pub fn r(self) -> u8 {
            (self.0 >> 16) as u8
        }

        #[inline]
        pub fn g(self) -> u8 {
            (self.0 >> 8) as u8
        }

        #[inline]
        pub fn b(self) -> u8 {
            self.0 as u8
        }

        fn named(name: &str) -> Option<Self> {
            let rgb = match name {
                "black" => 0x000000,
                "white" => 0xffffff,
                "red" => 0xff0000,
                "green" => 0x008000,
                "blue" => 0x0000ff,
                "yellow" => 0xffff00,
                "cyan" => 0x00ffff,
                "orange" => 0xffa500,
                _ => return None,
            };
            Some(Self(rgb))
        }
    }

    impl FromStr for Color {
        type Err = ColorParseError;

        fn from_str(value: &str) -> Result<Self, Self::Err> {
            let trimmed = value.trim();
            if let Some(hex) = trimmed.strip_prefix('#') {
                let expanded = match hex.len() {
                    3 => hex.chars().flat_map(|c| [c, c]).collect::<String>(),
                    6 => hex.to_string(),
                    _ => return Err(ColorParseError(value.to_string())),
                };
                return u32::from_str_radix(&expanded, 16)
                    .map(Color)
                    .map_err(|_| ColorParseError(value.to_string()));
            }
            Color::named(&trimmed.to_ascii_lowercase()).ok_or_else(|| ColorParseError(value.to_string()))
        }
    }

    impl TryFrom<String> for Color {
        type Error = ColorParseError;

        fn try_from(value: String) -> Result<Self, Self::Error> {
            value.parse()
        }
    }

    impl From<Color> for String {
        fn from(value: Color) -> Self {
            value.to_string()
        }
    }

    impl fmt::Display for Color {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "#{:06x}", self.0)
        }
    }

    /// 外部坐标参考系与场景坐标之间的换算，具体投影由宿主提供。
    pub trait ReferenceFrame {
        /// `coordinates` 为文件中的经纬度/高程（或其他外部坐标）。
        fn to_scene(&self, coordinates: DVec3) -> Point3;
        fn to_external(&self, point: Point3) -> DVec3;
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct IdentityFrame;

    impl ReferenceFrame for IdentityFrame {
        fn to_scene(&self, coordinates: DVec3) -> Point3 {
            Point3(coordinates)
        }

        fn to_external(&self, point: Point3) -> DVec3 {
            point.0
        }
    }

    /// 以固定原点平移的局部坐标系，避免大坐标值造成的精度损失。
    #[derive(Debug, Clone, Copy)]
    pub struct LocalOrigin {
        origin: DVec3,
    }

    impl LocalOrigin {
        pub fn new(origin: DVec3) -> Self {
            Self { origin }
        }
    }

    impl ReferenceFrame for LocalOrigin {
        fn to_scene(&self, coordinates: DVec3) -> Point3 {
            Point3(coordinates - self.origin)
        }

        fn to_external(&self, point: Point3) -> DVec3 {
            point.0 + self.origin
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn color_parses_hex_and_names() {
            assert_eq!("#377c5f".parse::<Color>().unwrap(), Color::from_hex(0x377c5f));
            assert_eq!("#fff".parse::<Color>().unwrap(), Color::WHITE);
            assert_eq!("Yellow".parse::<Color>().unwrap(), Color::from_hex(0xffff00));
            assert!("#12345".parse::<Color>().is_err());
            assert!("not-a-color".parse::<Color>().is_err());
            assert_eq!(Color::from_rgb(0x50, 0xbf, 0x91).to_string(), "#50bf91");
        }

        #[test]
        fn bounds_contains_point_on_edges() {
            let bounds = Bounds3::new(Point3::new(10.0, 10.0, 10.0), Point3::new(0.0, 0.0, 0.0));
            assert!(bounds.contains_point(Point3::new(0.0, 5.0, 10.0)));
            assert!(!bounds.contains_point(Point3::new(-0.1, 5.0, 5.0)));
            assert!(!Bounds3::empty().contains_point(Point3::new(0.0, 0.0, 0.0)));
        }

        #[test]
        fn direction_transform_ignores_translation() {
            let matrix = DMat4::from_translation(DVec3::new(100.0, 0.0, 0.0))
                * DMat4::from_rotation_x(std::f64::consts::FRAC_PI_2);
            let dir = Vector3::new(0.0, 0.0, 2.0)
                .transform_direction(&matrix)
                .expect("non-degenerate direction");
            assert!((dir.as_vec3() - DVec3::new(0.0, -1.0, 0.0)).length() < 1e-9);
        }

        #[test]
        fn local_origin_round_trips() {
            let frame = LocalOrigin::new(DVec3::new(1000.0, 2000.0, 0.0));
            let scene = frame.to_scene(DVec3::new(1001.0, 2002.0, 3.0));
            assert_eq!(scene, Point3::new(1.0, 2.0, 3.0));
            assert_eq!(frame.to_external(scene), DVec3::new(1001.0, 2002.0, 3.0));
        }
    }
}
