//! 量测会话：沿表面法线的垂直距离预览与提交。

use std::collections::{HashMap, HashSet};

use geojson::{Feature, FeatureCollection};
use piero_config::AppConfig;
use piero_core::{
    geometry::Point2,
    pick::PickResult,
    scene::Metadata,
    shape::{GeometryKind, LabelContext, Shape, ShapeFlags, ShapeId, ShapeStyle},
};
use piero_io::{
    ExportContext, FeatureLoader, ImportOutcome, ImportSource, IoError, RecordExport,
    feature_properties, feature_title, measure_endpoints, measure_feature, owc_collection,
};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::host::{Host, SceneHost};
use crate::import::{self, MEASURE_REPORT};
use crate::naming::{self, DEFAULT_MEASURE_TITLE, MEASURE_SENTINEL};
use crate::picker::Picker;
use crate::store::{Measure, MeasurementStore};

const TITLE_PROMPT: &str = "Measure name";
const COLLECTION_TITLE: &str = "Piero measures";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementSettings {
    pub style: ShapeStyle,
    /// 次级射线命中的最小距离。
    pub epsilon: f64,
    pub min_segment_pixels: f64,
}

impl MeasurementSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            style: ShapeStyle {
                color: config.style.measure_color,
                highlight_color: config.style.highlight_measure_color,
                vertex_radius: config.style.point_radius,
            },
            epsilon: config.measurement.ray_epsilon,
            min_segment_pixels: config.labels.min_segment_pixels,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementState {
    Idle,
    /// 相机拖动期间 `paused` 为真，此时忽略移动与点击。
    Measuring { paused: bool },
}

pub struct MeasurementSession {
    settings: MeasurementSettings,
    state: MeasurementState,
    preview: Option<Shape>,
    shapes: HashMap<Uuid, Shape>,
    owners: HashMap<ShapeId, Uuid>,
    picker: Picker,
}

impl MeasurementSession {
    pub fn new(settings: MeasurementSettings) -> Self {
        Self {
            settings,
            state: MeasurementState::Idle,
            preview: None,
            shapes: HashMap::new(),
            owners: HashMap::new(),
            picker: Picker::new(0.0),
        }
    }

    #[inline]
    pub fn state(&self) -> MeasurementState {
        self.state
    }

    #[inline]
    pub fn is_measuring(&self) -> bool {
        matches!(self.state, MeasurementState::Measuring { .. })
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        matches!(self.state, MeasurementState::Measuring { paused: true })
    }

    /// 当前预览；尚未产生有效采样时为 `None`。
    pub fn preview(&self) -> Option<&Shape> {
        self.preview.as_ref()
    }

    pub fn shape(&self, uuid: Uuid) -> Option<&Shape> {
        self.shapes.get(&uuid)
    }

    pub fn owner(&self, id: ShapeId) -> Option<Uuid> {
        self.owners.get(&id).copied()
    }

    pub fn shape_by_id_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        let uuid = self.owners.get(&id)?;
        self.shapes.get_mut(uuid)
    }

    pub fn start(&mut self, store: &mut MeasurementStore) {
        if self.is_measuring() {
            return;
        }
        self.state = MeasurementState::Measuring { paused: false };
        store.set_user_measuring(true);
        debug!("开始量测");
    }

    /// 结束量测并从场景移除预览，不留残余显示。
    pub fn stop(&mut self, store: &mut MeasurementStore, scene: &mut dyn SceneHost) -> bool {
        if !self.is_measuring() {
            return false;
        }
        self.state = MeasurementState::Idle;
        store.set_user_measuring(false);
        if let Some(preview) = self.preview.take() {
            scene.remove_shape(preview.id());
            scene.notify_change();
        }
        debug!("结束量测");
        true
    }

    pub fn pause(&mut self) {
        if let MeasurementState::Measuring { paused } = &mut self.state {
            *paused = true;
        }
    }

    pub fn resume(&mut self) {
        if let MeasurementState::Measuring { paused } = &mut self.state {
            *paused = false;
        }
    }

    /// 指针移动时更新预览：拾取表面，沿世界坐标法线投射次级射线，取最近的有效交点。
    pub fn on_pointer_move(&mut self, position: Point2, scene: &mut dyn SceneHost) -> bool {
        if self.state != (MeasurementState::Measuring { paused: false }) {
            return false;
        }
        let not_shape = |pick: &PickResult| !pick.is_shape();
        let filter: &dyn Fn(&PickResult) -> bool = &not_shape;
        let Some(pick) = self.picker.first_feature_at(&*scene, position, 0.0, Some(filter)) else {
            return false;
        };
        let Some(normal) = pick
            .normal
            .and_then(|normal| normal.transform_direction(&pick.object_matrix))
        else {
            return false;
        };

        let preview_id = self.preview.as_ref().map(Shape::id);
        let Some(hit) = scene
            .raycast(pick.point, normal)
            .into_iter()
            .filter(|hit| hit.distance > self.settings.epsilon)
            .filter(|hit| preview_id.is_none() || hit.shape != preview_id)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
        else {
            return false;
        };

        if self.preview.is_none() {
            let shape = Shape::new(GeometryKind::LineString, self.settings.style, ShapeFlags::measure());
            scene.add_shape(&shape);
            self.preview = Some(shape);
        }
        let Some(preview) = self.preview.as_mut() else {
            return false;
        };
        preview.set_points(vec![pick.point, hit.point]);
        preview.set_visible(true);
        let context = LabelContext {
            viewport: scene.viewport(),
            min_segment_pixels: self.settings.min_segment_pixels,
            title: None,
        };
        preview.rebuild_labels(&context);
        scene.update_shape(preview);
        scene.notify_change();
        true
    }

    /// 提交当前预览。预览长度必须有限且大于零；预览本身隐藏后复用。
    pub fn on_click(&mut self, store: &mut MeasurementStore, host: &mut Host<'_>) -> Option<Uuid> {
        if self.state != (MeasurementState::Measuring { paused: false }) {
            return None;
        }
        let preview = self.preview.as_ref().filter(|preview| preview.visible())?;
        let length = preview.length().filter(|length| length.is_finite() && *length > 0.0)?;

        let default = naming::resolve_title(
            DEFAULT_MEASURE_TITLE,
            |title| store.has_title(title),
            MEASURE_SENTINEL,
        );
        let title = host.prompt.prompt_title(TITLE_PROMPT, &default)?;

        let shape = preview.duplicate();
        host.scene.add_shape(&shape);
        let uuid = Uuid::new_v4();
        self.publish(uuid, title, Metadata::new(), shape, store, host.scene);
        debug!(%uuid, length, "量测已提交");

        if let Some(preview) = self.preview.as_mut() {
            preview.set_visible(false);
            host.scene.update_shape(preview);
        }
        host.scene.notify_change();
        Some(uuid)
    }

    fn publish(
        &mut self,
        uuid: Uuid,
        title: String,
        properties: Metadata,
        mut shape: Shape,
        store: &mut MeasurementStore,
        scene: &mut dyn SceneHost,
    ) {
        let (from, to) = match shape.points() {
            [from, .., to] => (*from, *to),
            _ => return,
        };
        let context = LabelContext {
            viewport: scene.viewport(),
            min_segment_pixels: self.settings.min_segment_pixels,
            title: Some(title.as_str()),
        };
        shape.rebuild_labels(&context);
        shape.set_visible(true);
        scene.update_shape(&shape);
        info!(%uuid, %title, length = from.distance(to), "已发布量测");

        store.add(Measure {
            uuid,
            title,
            visible: true,
            shape: shape.id(),
            properties,
            from,
            to,
        });
        self.owners.insert(shape.id(), uuid);
        self.shapes.insert(uuid, shape);
        scene.notify_change();
    }

    pub fn remove(
        &mut self,
        uuid: Uuid,
        store: &mut MeasurementStore,
        scene: &mut dyn SceneHost,
    ) -> Result<(), EngineError> {
        store.remove(uuid).ok_or(EngineError::MeasureNotFound(uuid))?;
        if let Some(shape) = self.shapes.remove(&uuid) {
            self.owners.remove(&shape.id());
            scene.remove_shape(shape.id());
        }
        scene.notify_change();
        info!(%uuid, "已删除量测");
        Ok(())
    }

    pub fn set_visible(
        &mut self,
        uuid: Uuid,
        visible: bool,
        store: &mut MeasurementStore,
        scene: &mut dyn SceneHost,
    ) -> Result<(), EngineError> {
        let measure = store
            .get_mut(uuid)
            .ok_or(EngineError::MeasureNotFound(uuid))?;
        measure.visible = visible;
        if let Some(shape) = self.shapes.get_mut(&uuid) {
            shape.set_visible(visible);
            scene.update_shape(shape);
        }
        scene.notify_change();
        Ok(())
    }

    pub fn refresh_labels(&mut self, store: &MeasurementStore, scene: &mut dyn SceneHost) {
        for measure in store.iter() {
            if let Some(shape) = self.shapes.get_mut(&measure.uuid) {
                let context = LabelContext {
                    viewport: scene.viewport(),
                    min_segment_pixels: self.settings.min_segment_pixels,
                    title: Some(measure.title.as_str()),
                };
                shape.rebuild_labels(&context);
                scene.update_shape(shape);
            }
        }
    }

    /// 导入量测文件；只接受两点 LineString。
    pub fn import(
        &mut self,
        loader: &dyn FeatureLoader,
        sources: &[ImportSource],
        store: &mut MeasurementStore,
        host: &mut Host<'_>,
    ) -> ImportOutcome {
        let skip = store.titles();
        import::run_import(loader, sources, MEASURE_REPORT, host.notifications, |feature| {
            self.import_feature(feature, &skip, store, host.scene)
        })
    }

    pub fn import_feature(
        &mut self,
        feature: &Feature,
        skip: &HashSet<String>,
        store: &mut MeasurementStore,
        scene: &mut dyn SceneHost,
    ) -> Result<bool, IoError> {
        let mut properties = feature_properties(feature);
        let title = match feature_title(&properties) {
            Some(title) => title,
            None => {
                let title = Uuid::new_v4().to_string();
                properties.insert("title".to_string(), Value::String(title.clone()));
                title
            }
        };
        if skip.contains(&title) {
            debug!(%title, "标题已存在，跳过量测");
            return Ok(false);
        }

        let (from, to) = measure_endpoints(feature, scene.reference_frame())?;
        let shape = Shape::new(GeometryKind::LineString, self.settings.style, ShapeFlags::measure())
            .with_points(vec![from, to]);
        scene.add_shape(&shape);
        self.publish(Uuid::new_v4(), title, properties, shape, store, scene);
        Ok(true)
    }

    pub fn export(&self, store: &MeasurementStore, context: &ExportContext<'_>) -> FeatureCollection {
        let features = store
            .iter()
            .map(|measure| {
                let record = RecordExport {
                    uuid: measure.uuid,
                    title: &measure.title,
                    properties: &measure.properties,
                };
                measure_feature(&record, measure.from, measure.to, context)
            })
            .collect();
        owc_collection(features, COLLECTION_TITLE, context)
    }
}

#[cfg(test)]
mod tests {
    use piero_core::geometry::Point3;
    use piero_io::GeoJsonFacade;

    use super::*;
    use crate::host::{NotificationLevel, NotificationLog, ScriptedDrawTool, ScriptedPrompt};
    use crate::scene::{Scene, tests::{center, room}};

    struct Fixture {
        scene: Scene,
        draw: ScriptedDrawTool,
        prompt: ScriptedPrompt,
        log: NotificationLog,
        store: MeasurementStore,
        session: MeasurementSession,
    }

    impl Fixture {
        fn new() -> Self {
            let mut fx = Self {
                scene: room().0,
                draw: ScriptedDrawTool::new(),
                prompt: ScriptedPrompt::new(),
                log: NotificationLog::new(),
                store: MeasurementStore::new(),
                session: MeasurementSession::new(MeasurementSettings::from_config(&AppConfig::default())),
            };
            fx.session.start(&mut fx.store);
            fx
        }

        fn click(&mut self) -> Option<Uuid> {
            let mut host = Host {
                scene: &mut self.scene,
                draw: &mut self.draw,
                prompt: &mut self.prompt,
                notifications: &mut self.log,
            };
            self.session.on_click(&mut self.store, &mut host)
        }

        fn import(&mut self, contents: &str) -> ImportOutcome {
            let mut host = Host {
                scene: &mut self.scene,
                draw: &mut self.draw,
                prompt: &mut self.prompt,
                notifications: &mut self.log,
            };
            let source = ImportSource::Text {
                name: "measures.geojson".to_string(),
                contents: contents.to_string(),
            };
            self.session.import(&GeoJsonFacade::new(), &[source], &mut self.store, &mut host)
        }
    }

    #[test]
    fn preview_follows_surface_normal() {
        let mut fx = Fixture::new();
        assert!(fx.session.on_pointer_move(center(), &mut fx.scene));

        let preview = fx.session.preview().expect("应生成预览");
        let [from, to] = preview.points() else {
            panic!("预览应为两点");
        };
        assert!(from.distance(Point3::new(0.0, 0.0, 0.0)) < 1e-6);
        assert!(to.distance(Point3::new(0.0, 0.0, 5.0)) < 1e-6);
        assert!(fx.scene.shape(preview.id()).unwrap().visible);
    }

    #[test]
    fn moving_again_reuses_the_preview() {
        let mut fx = Fixture::new();
        fx.session.on_pointer_move(center(), &mut fx.scene);
        let id = fx.session.preview().unwrap().id();
        // 预览自身的顶点位于次级射线上，不能作为命中
        assert!(fx.session.on_pointer_move(center(), &mut fx.scene));
        assert_eq!(fx.session.preview().unwrap().id(), id);
        assert!((fx.session.preview().unwrap().length().unwrap() - 5.0).abs() < 1e-6);
        assert_eq!(fx.scene.shape_count(), 1);
    }

    #[test]
    fn click_commits_measure_and_resets_preview() {
        let mut fx = Fixture::new();
        fx.session.on_pointer_move(center(), &mut fx.scene);
        let uuid = fx.click().expect("应提交量测");

        let measure = fx.store.get(uuid).unwrap();
        assert_eq!(measure.title, "New measurement");
        assert!((measure.length() - 5.0).abs() < 1e-6);
        assert_eq!(fx.session.owner(measure.shape), Some(uuid));

        let preview = fx.session.preview().unwrap();
        assert!(!preview.visible());
        assert!(!fx.scene.shape(preview.id()).unwrap().visible);
        assert!(fx.scene.shape(measure.shape).unwrap().visible);

        // 预览隐藏后再次点击不会重复提交
        assert!(fx.click().is_none());
        fx.session.on_pointer_move(center(), &mut fx.scene);
        fx.click();
        assert!(fx.store.has_title("New measurement (1)"));
    }

    #[test]
    fn cancelled_prompt_keeps_preview() {
        let mut fx = Fixture::new();
        fx.session.on_pointer_move(center(), &mut fx.scene);
        fx.prompt.cancel();
        assert!(fx.click().is_none());
        assert!(fx.store.is_empty());
        assert!(fx.session.preview().unwrap().visible());
    }

    #[test]
    fn paused_session_ignores_input() {
        let mut fx = Fixture::new();
        fx.session.pause();
        assert!(!fx.session.on_pointer_move(center(), &mut fx.scene));
        assert!(fx.session.preview().is_none());

        fx.session.resume();
        assert!(fx.session.on_pointer_move(center(), &mut fx.scene));
        fx.session.pause();
        assert!(fx.click().is_none());
    }

    #[test]
    fn stop_removes_preview_from_scene() {
        let mut fx = Fixture::new();
        fx.session.on_pointer_move(center(), &mut fx.scene);
        assert_eq!(fx.scene.shape_count(), 1);

        assert!(fx.session.stop(&mut fx.store, &mut fx.scene));
        assert_eq!(fx.scene.shape_count(), 0);
        assert!(!fx.store.is_user_measuring());
        assert_eq!(fx.session.state(), MeasurementState::Idle);
        assert!(!fx.session.stop(&mut fx.store, &mut fx.scene));
    }

    #[test]
    fn import_accepts_only_two_point_lines() {
        let mut fx = Fixture::new();
        let outcome = fx.import(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","geometry":{"type":"LineString","coordinates":[[0,0,0],[0,0,5]]},"properties":{"title":"Height"}},
                {"type":"Feature","geometry":{"type":"LineString","coordinates":[[0,0],[1,0],[2,0]]},"properties":{"title":"Path"}},
                {"type":"Feature","geometry":{"type":"Point","coordinates":[0,0]},"properties":{"title":"Spot"}}
            ]}"#,
        );
        assert_eq!(outcome.imported, 1);
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(fx.log.last().unwrap().level, NotificationLevel::Warning);
        let measure = fx.store.iter().next().unwrap();
        assert_eq!(measure.title, "Height");
        assert_eq!(measure.length(), 5.0);
    }

    #[test]
    fn remove_and_visibility() {
        let mut fx = Fixture::new();
        fx.import(r#"{"type":"Feature","geometry":{"type":"LineString","coordinates":[[0,0],[3,4]]},"properties":{"title":"Diag"}}"#);
        let measure = fx.store.iter().next().unwrap().clone();

        fx.session.set_visible(measure.uuid, false, &mut fx.store, &mut fx.scene).unwrap();
        assert!(!fx.scene.shape(measure.shape).unwrap().visible);

        fx.session.remove(measure.uuid, &mut fx.store, &mut fx.scene).unwrap();
        assert!(fx.scene.shape(measure.shape).is_none());
        assert!(fx.session.owner(measure.shape).is_none());
        assert!(matches!(
            fx.session.remove(measure.uuid, &mut fx.store, &mut fx.scene),
            Err(EngineError::MeasureNotFound(_))
        ));
    }
}
