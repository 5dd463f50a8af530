use std::cmp::Ordering;

use piero_core::{
    feature::Feature,
    geometry::Point2,
    pick::{PickResult, is_pick_accepted},
};

use crate::extract::{FeatureExtractor, ShapeDirectory};
use crate::host::{PickOptions, PickSource, PickTarget, SceneHost};

/// 形状优先，其余按距离升序。
fn compare_picks(a: &PickResult, b: &PickResult) -> Ordering {
    match (a.is_shape(), b.is_shape()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.distance.total_cmp(&b.distance),
    }
}

/// 单次查询拾取：先模型后底图，结果经裁剪盒与相机深度过滤。
#[derive(Debug, Clone, Copy)]
pub struct Picker {
    radius: f64,
}

impl Picker {
    pub fn new(radius: f64) -> Self {
        Self { radius }
    }

    #[inline]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    fn accepted<S: PickSource + ?Sized>(source: &S, pick: &PickResult) -> bool {
        is_pick_accepted(pick, source.clipping_box().as_ref(), source.depth_range())
    }

    /// 拾取非底图对象（不含辅助平面与网格）。
    pub fn objects_at<S: PickSource + ?Sized>(
        &self,
        source: &S,
        position: Point2,
        radius: f64,
        filter: Option<&dyn Fn(&PickResult) -> bool>,
    ) -> Vec<PickResult> {
        let accept = |pick: &PickResult| {
            filter.is_none_or(|filter| filter(pick)) && Self::accepted(source, pick)
        };
        let options = PickOptions::new(radius)
            .target(PickTarget::NonMaps)
            .filter(&accept);
        let mut picked = source.pick_at(position, &options);
        picked.sort_by(compare_picks);
        picked
    }

    /// 全部对象（含底图与形状），形状优先排序。
    pub fn all_at<S: PickSource + ?Sized>(
        &self,
        source: &S,
        position: Point2,
        radius: f64,
        filter: Option<&dyn Fn(&PickResult) -> bool>,
    ) -> Vec<PickResult> {
        let accept = |pick: &PickResult| {
            filter.is_none_or(|filter| filter(pick)) && Self::accepted(source, pick)
        };
        let options = PickOptions::new(radius).filter(&accept);
        let mut picked = source.pick_at(position, &options);
        picked.sort_by(compare_picks);
        picked
    }

    /// 最近的底图拾取。
    pub fn map_at<S: PickSource + ?Sized>(
        &self,
        source: &S,
        position: Point2,
        radius: f64,
        filter: Option<&dyn Fn(&PickResult) -> bool>,
    ) -> Option<PickResult> {
        let accept = |pick: &PickResult| {
            filter.is_none_or(|filter| filter(pick)) && Self::accepted(source, pick)
        };
        let options = PickOptions::new(radius)
            .target(PickTarget::MapsOnly)
            .filter(&accept)
            .sorted()
            .limit(1);
        source.pick_at(position, &options).into_iter().next()
    }

    /// 模型优先；未命中任何对象时退回底图。
    pub fn first_feature_at<S: PickSource + ?Sized>(
        &self,
        source: &S,
        position: Point2,
        radius: f64,
        filter: Option<&dyn Fn(&PickResult) -> bool>,
    ) -> Option<PickResult> {
        self.objects_at(source, position, radius, filter)
            .into_iter()
            .next()
            .or_else(|| self.map_at(source, position, radius, filter))
    }

    /// 拾取并分类光标下的第一个结果。
    pub fn pick<S: SceneHost + ?Sized>(
        &self,
        scene: &S,
        extractor: &FeatureExtractor,
        shapes: &dyn ShapeDirectory,
        position: Point2,
    ) -> Option<(Feature, PickResult)> {
        let mut picked = self.first_feature_at(scene, position, self.radius, None)?;
        let feature = extractor
            .classify_cached(&mut picked, scene.objects(), shapes)?
            .clone();
        Some((feature, picked))
    }
}

#[cfg(test)]
mod tests {
    use piero_core::{
        geometry::{Bounds3, Point3},
        pick::{ClipMode, ClippingBox, PickKind, VectorFeature},
        scene::ObjectId,
        shape::ShapeId,
    };

    use super::*;
    use crate::scene::tests::{center, room};

    fn around_origin(mode: ClipMode) -> ClippingBox {
        ClippingBox {
            bounds: Bounds3::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0)),
            mode,
        }
    }

    #[test]
    fn clipped_picks_are_dropped() {
        let (mut scene, floor) = room();
        let picker = Picker::new(1.0);
        let hit = picker.first_feature_at(&scene, center(), 1.0, None);
        assert_eq!(hit.map(|pick| pick.object), Some(floor));

        scene.set_clipping_box(Some(around_origin(ClipMode::Include)));
        let hit = picker.first_feature_at(&scene, center(), 1.0, None);
        assert_eq!(hit.map(|pick| pick.object), Some(floor));

        scene.set_clipping_box(Some(around_origin(ClipMode::Exclude)));
        assert!(picker.first_feature_at(&scene, center(), 1.0, None).is_none());
    }

    #[test]
    fn picks_beyond_far_plane_are_dropped() {
        let (mut scene, floor) = room();
        let picker = Picker::new(1.0);
        scene.camera_mut().far = 5.0;
        assert!(picker.first_feature_at(&scene, center(), 1.0, None).is_none());
        assert!(picker.all_at(&scene, center(), 1.0, None).is_empty());

        scene.camera_mut().far = 1000.0;
        scene.camera_mut().near = 20.0;
        assert!(picker.first_feature_at(&scene, center(), 1.0, None).is_none());

        scene.camera_mut().near = 0.1;
        let hit = picker.first_feature_at(&scene, center(), 1.0, None);
        assert_eq!(hit.map(|pick| pick.object), Some(floor));
    }

    #[test]
    fn shapes_sort_before_closer_surfaces() {
        let near = PickResult::new(Point3::new(0.0, 0.0, 0.0), 1.0, ObjectId::new(0));
        let far = PickResult::new(Point3::new(0.0, 0.0, 0.0), 9.0, ObjectId::new(1));
        let shape = PickResult::new(Point3::new(0.0, 0.0, 0.0), 20.0, ObjectId::new(2)).with_kind(
            PickKind::Shape {
                shape: ShapeId::generate(),
            },
        );
        let map = PickResult::new(Point3::new(0.0, 0.0, 0.0), 5.0, ObjectId::new(3)).with_kind(
            PickKind::Map {
                features: vec![VectorFeature {
                    id: None,
                    properties: Default::default(),
                    layer: "roads".to_string(),
                }],
            },
        );

        let mut picks = vec![far, map, near, shape];
        picks.sort_by(compare_picks);
        let distances: Vec<_> = picks.iter().map(|p| p.distance).collect();
        assert_eq!(distances, [20.0, 1.0, 5.0, 9.0]);
    }
}
