//! 交互入口：把指针、键盘与绘制工具回调路由到各会话，并按顺序处理存储中的命令。

use chrono::Utc;
use geojson::FeatureCollection;
use piero_config::AppConfig;
use piero_core::{
    feature::Feature,
    geometry::{Point2, Point3},
    pick::PickResult,
    scene::EntityId,
    shape::{Shape, ShapeId},
};
use piero_io::{ExportContext, GeoJsonFacade};
use tracing::debug;
use uuid::Uuid;

use crate::annotation::{AnnotationSession, AnnotationSettings};
use crate::command::{CommandBus, CommandContext, CommandResponse};
use crate::errors::EngineError;
use crate::extract::{FeatureExtractor, ShapeDirectory, ShapeOwner};
use crate::highlight::{HighlightHost, Highlighter};
use crate::host::{DrawTicket, Host, SceneHost};
use crate::measurement::{MeasurementSession, MeasurementSettings};
use crate::picker::Picker;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Other,
}

/// 会话形状到所属记录的查询。
struct SessionShapes<'a> {
    store: &'a Store,
    annotations: &'a AnnotationSession,
    measurements: &'a MeasurementSession,
}

impl ShapeDirectory for SessionShapes<'_> {
    fn shape_owner(&self, id: ShapeId) -> Option<ShapeOwner<'_>> {
        if let Some(uuid) = self.annotations.owner(id) {
            return Some(ShapeOwner::Annotation {
                annotation: self.store.annotations.get(uuid)?,
                shape: self.annotations.shape(uuid)?,
            });
        }
        let uuid = self.measurements.owner(id)?;
        Some(ShapeOwner::Measure {
            measure: self.store.measurements.get(uuid)?,
            shape: self.measurements.shape(uuid)?,
        })
    }
}

struct HighlightTarget<'a> {
    annotations: &'a mut AnnotationSession,
    measurements: &'a mut MeasurementSession,
    scene: &'a mut dyn SceneHost,
}

impl HighlightHost for HighlightTarget<'_> {
    fn shape_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        if let Some(shape) = self.annotations.shape_by_id_mut(id) {
            return Some(shape);
        }
        self.measurements.shape_by_id_mut(id)
    }

    fn shape_changed(&mut self, id: ShapeId) {
        let shape = match self.annotations.owner(id) {
            Some(uuid) => self.annotations.shape(uuid),
            None => self
                .measurements
                .owner(id)
                .and_then(|uuid| self.measurements.shape(uuid)),
        };
        if let Some(shape) = shape {
            self.scene.update_shape(shape);
        }
        self.scene.notify_change();
    }

    fn select_item(&mut self, entity: EntityId, set: &str, item_id: &str) {
        self.scene.select_item(entity, set, item_id);
        self.scene.notify_change();
    }

    fn clear_selection_set(&mut self, entity: EntityId, set: &str) {
        self.scene.clear_selection_set(entity, set);
        self.scene.notify_change();
    }
}

pub struct Viewer {
    store: Store,
    annotations: AnnotationSession,
    measurements: MeasurementSession,
    extractor: FeatureExtractor,
    highlighter: Highlighter,
    picker: Picker,
    bus: CommandBus,
    io: GeoJsonFacade,
    base_url: String,
}

impl Viewer {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: Store::new(config),
            annotations: AnnotationSession::new(AnnotationSettings::from_config(config)),
            measurements: MeasurementSession::new(MeasurementSettings::from_config(config)),
            extractor: FeatureExtractor::new(),
            highlighter: Highlighter::new(),
            picker: Picker::new(config.picking.radius),
            bus: CommandBus::new(),
            io: GeoJsonFacade::new(),
            base_url: config.export.base_url.clone(),
        }
    }

    #[inline]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// 界面通过存储发布命令；命令在下一次 [`Viewer::process_commands`] 时执行。
    #[inline]
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    #[inline]
    pub fn annotations(&self) -> &AnnotationSession {
        &self.annotations
    }

    #[inline]
    pub fn measurements(&self) -> &MeasurementSession {
        &self.measurements
    }

    #[inline]
    pub fn is_highlighting(&self) -> bool {
        self.highlighter.is_active()
    }

    /// 依到达顺序执行全部待处理命令，执行期间新发布的命令排在其后。
    pub fn process_commands(&mut self, host: &mut Host<'_>) -> Vec<CommandResponse> {
        if self.store.pending_commands() == 0 {
            return Vec::new();
        }
        self.clear_highlight(host.scene);

        let mut responses = Vec::new();
        while let Some(command) = self.store.next_command() {
            let mut context = CommandContext {
                store: &mut self.store,
                annotations: &mut self.annotations,
                measurements: &mut self.measurements,
                loader: &self.io,
                saver: &self.io,
                base_url: &self.base_url,
                host: &mut *host,
            };
            let response = self.bus.dispatch(&command, &mut context);
            debug!(command = command.name(), success = response.success, "命令已处理");
            responses.push(response);
        }
        responses
    }

    pub fn on_pointer_move(&mut self, position: Point2, scene: &mut dyn SceneHost) -> bool {
        self.measurements.on_pointer_move(position, scene)
    }

    /// 主键点击：量测中提交预览，否则拾取并高亮光标下的对象；右键结束编辑并保留修改。
    pub fn on_click(
        &mut self,
        position: Point2,
        button: PointerButton,
        host: &mut Host<'_>,
    ) -> Result<Option<Feature>, EngineError> {
        if button == PointerButton::Secondary {
            self.annotations
                .stop_edition(false, &mut self.store.annotations, host);
            return Ok(None);
        }
        if self.measurements.is_measuring() {
            self.measurements
                .on_click(&mut self.store.measurements, host);
            return Ok(None);
        }
        // 绘制与编辑期间的点击由绘制工具处理
        if self.annotations.is_drawing() || self.annotations.is_editing() {
            return Ok(None);
        }

        let shapes = SessionShapes {
            store: &self.store,
            annotations: &self.annotations,
            measurements: &self.measurements,
        };
        let Some((feature, pick)) = self
            .picker
            .pick(&*host.scene, &self.extractor, &shapes, position)
        else {
            self.clear_highlight(host.scene);
            return Ok(None);
        };
        self.highlight(&pick, host.scene)?;
        Ok(Some(feature))
    }

    /// Escape 依次取消绘制、取消编辑（恢复顶点）、结束量测。
    pub fn on_key(&mut self, key: Key, host: &mut Host<'_>) -> bool {
        if key != Key::Escape {
            return false;
        }
        if self.annotations.cancel_draw(&mut self.store.annotations, host) {
            return true;
        }
        if self
            .annotations
            .stop_edition(true, &mut self.store.annotations, host)
            .is_some()
        {
            return true;
        }
        self.measurements
            .stop(&mut self.store.measurements, host.scene)
    }

    pub fn on_draw_completed(
        &mut self,
        ticket: DrawTicket,
        points: Option<Vec<Point3>>,
        host: &mut Host<'_>,
    ) -> Option<Uuid> {
        self.annotations
            .on_draw_completed(ticket, points, &mut self.store.annotations, host)
    }

    pub fn on_vertex_moved(&mut self, index: usize, point: Point3, scene: &mut dyn SceneHost) -> bool {
        self.annotations
            .move_vertex(index, point, &self.store.annotations, scene)
    }

    pub fn on_vertex_inserted(&mut self, index: usize, point: Point3, scene: &mut dyn SceneHost) -> bool {
        self.annotations
            .insert_vertex(index, point, &self.store.annotations, scene)
    }

    pub fn on_vertex_removed(&mut self, index: usize, scene: &mut dyn SceneHost) -> bool {
        self.annotations
            .remove_vertex(index, &self.store.annotations, scene)
    }

    pub fn on_camera_changed(&mut self, scene: &mut dyn SceneHost) {
        self.annotations.refresh_labels(&self.store.annotations, scene);
        self.measurements.refresh_labels(&self.store.measurements, scene);
        scene.notify_change();
    }

    /// 相机拖动期间暂停量测采样。
    pub fn on_camera_interaction(&mut self, active: bool) {
        if active {
            self.measurements.pause();
        } else {
            self.measurements.resume();
        }
    }

    /// 绘制工具的拾取候选，按当前标注拾取模式提供。
    pub fn draw_candidates(&self, scene: &dyn SceneHost, position: Point2) -> Vec<PickResult> {
        self.annotations
            .pick_candidates(scene, position, self.store.annotations.mode())
    }

    pub fn highlight(&mut self, pick: &PickResult, scene: &mut dyn SceneHost) -> Result<(), EngineError> {
        let mut target = HighlightTarget {
            annotations: &mut self.annotations,
            measurements: &mut self.measurements,
            scene,
        };
        self.highlighter.highlight(pick, &mut target)
    }

    pub fn clear_highlight(&mut self, scene: &mut dyn SceneHost) {
        let mut target = HighlightTarget {
            annotations: &mut self.annotations,
            measurements: &mut self.measurements,
            scene,
        };
        self.highlighter.clear(&mut target);
    }

    pub fn export_annotations(&self, scene: &dyn SceneHost) -> FeatureCollection {
        let context = ExportContext {
            base_url: &self.base_url,
            frame: scene.reference_frame(),
            updated: Utc::now(),
        };
        self.annotations.export(&self.store.annotations, &context)
    }

    pub fn export_measures(&self, scene: &dyn SceneHost) -> FeatureCollection {
        let context = ExportContext {
            base_url: &self.base_url,
            frame: scene.reference_frame(),
            updated: Utc::now(),
        };
        self.measurements.export(&self.store.measurements, &context)
    }
}

#[cfg(test)]
mod tests {
    use piero_config::AnnotationMode;
    use piero_core::{
        geometry::{Bounds3, Color},
        pick::{ClipMode, ClippingBox},
    };

    use super::*;
    use crate::host::{NotificationLog, ScriptedDrawTool, ScriptedPrompt};
    use crate::scene::{Scene, tests::{center, room}};

    struct Fixture {
        scene: Scene,
        draw: ScriptedDrawTool,
        prompt: ScriptedPrompt,
        log: NotificationLog,
        viewer: Viewer,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                scene: room().0,
                draw: ScriptedDrawTool::new(),
                prompt: ScriptedPrompt::new(),
                log: NotificationLog::new(),
                viewer: Viewer::new(&AppConfig::default()),
            }
        }

        fn with<R>(&mut self, f: impl FnOnce(&mut Viewer, &mut Host<'_>) -> R) -> R {
            let mut host = Host {
                scene: &mut self.scene,
                draw: &mut self.draw,
                prompt: &mut self.prompt,
                notifications: &mut self.log,
            };
            f(&mut self.viewer, &mut host)
        }

        fn process(&mut self) -> Vec<CommandResponse> {
            self.with(|viewer, host| viewer.process_commands(host))
        }

        fn square(&mut self) -> Uuid {
            self.viewer.store_mut().create_polygon();
            self.process();
            let ticket = self.draw.last_ticket().expect("应已开始绘制");
            let points = vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(10.0, 0.0, 0.0),
                Point3::new(10.0, 10.0, 0.0),
                Point3::new(0.0, 10.0, 0.0),
            ];
            self.with(|viewer, host| viewer.on_draw_completed(ticket, Some(points), host))
                .expect("应创建标注")
        }
    }

    #[test]
    fn clicking_a_shape_classifies_and_highlights_it() {
        let mut fx = Fixture::new();
        let uuid = fx.square();
        let shape_id = fx.viewer.store().annotations.get(uuid).unwrap().shape;
        let vertex = fx.scene.screen_position(Point3::new(10.0, 0.0, 0.0)).unwrap();

        let feature = fx
            .with(|viewer, host| viewer.on_click(vertex, PointerButton::Primary, host))
            .unwrap()
            .expect("应拾取到形状");
        assert_eq!(feature.name, "New polygon annotation");
        assert!(feature.attributes.contains("Measurement"));
        assert_eq!(fx.scene.shape(shape_id).unwrap().color, Color::from_hex(0x50bf91));

        // 处理命令前先清除高亮
        fx.viewer.store_mut().set_show_labels(false);
        fx.process();
        assert!(!fx.viewer.is_highlighting());
        assert_eq!(fx.scene.shape(shape_id).unwrap().color, Color::from_hex(0x377c5f));
    }

    #[test]
    fn clicking_the_floor_yields_a_feature_without_highlight() {
        let mut fx = Fixture::new();
        let feature = fx
            .with(|viewer, host| viewer.on_click(center(), PointerButton::Primary, host))
            .unwrap()
            .expect("应拾取到地面");
        assert_eq!(feature.name, "floor");
        assert!(!fx.viewer.is_highlighting());
    }

    #[test]
    fn clipped_click_yields_nothing_and_keeps_colors() {
        let mut fx = Fixture::new();
        let uuid = fx.square();
        let shape_id = fx.viewer.store().annotations.get(uuid).unwrap().shape;
        let corner = Point3::new(10.0, 0.0, 0.0);
        let vertex = fx.scene.screen_position(corner).unwrap();
        fx.scene.set_clipping_box(Some(ClippingBox {
            bounds: Bounds3::new(
                Point3::new(9.0, -1.0, -1.0),
                Point3::new(11.0, 1.0, 1.0),
            ),
            mode: ClipMode::Exclude,
        }));

        let feature = fx
            .with(|viewer, host| viewer.on_click(vertex, PointerButton::Primary, host))
            .unwrap();
        assert!(feature.is_none());
        assert!(!fx.viewer.is_highlighting());
        assert_eq!(fx.scene.shape(shape_id).unwrap().color, Color::from_hex(0x377c5f));
    }

    #[test]
    fn escape_restores_edit_and_right_click_keeps_it() {
        let mut fx = Fixture::new();
        let uuid = fx.square();

        fx.viewer.store_mut().edit(uuid);
        fx.process();
        assert!(fx.viewer.on_vertex_moved(0, Point3::new(-5.0, 0.0, 0.0), &mut fx.scene));
        assert!(fx.with(|viewer, host| viewer.on_key(Key::Escape, host)));
        let area = fx.viewer.annotations().shape(uuid).unwrap().measurements().area.unwrap();
        assert!((area - 100.0).abs() < 1e-9);

        fx.viewer.store_mut().edit(uuid);
        fx.process();
        assert!(fx.viewer.on_vertex_moved(0, Point3::new(-10.0, 0.0, 0.0), &mut fx.scene));
        fx.with(|viewer, host| viewer.on_click(center(), PointerButton::Secondary, host))
            .unwrap();
        assert!(!fx.viewer.annotations().is_editing());
        let area = fx.viewer.annotations().shape(uuid).unwrap().measurements().area.unwrap();
        assert!((area - 150.0).abs() < 1e-9);
    }

    #[test]
    fn escape_cancels_pending_draw() {
        let mut fx = Fixture::new();
        fx.viewer.store_mut().create_line();
        fx.process();
        assert!(fx.viewer.store().annotations.is_user_drawing());

        assert!(fx.with(|viewer, host| viewer.on_key(Key::Escape, host)));
        assert!(!fx.viewer.annotations().is_drawing());
        assert_eq!(fx.draw.aborted().len(), 1);
        assert!(!fx.with(|viewer, host| viewer.on_key(Key::Escape, host)));
    }

    #[test]
    fn measuring_flow() {
        let mut fx = Fixture::new();
        fx.viewer.store_mut().start_measuring();
        fx.process();

        fx.viewer.on_camera_interaction(true);
        assert!(!fx.viewer.on_pointer_move(center(), &mut fx.scene));
        fx.viewer.on_camera_interaction(false);
        assert!(fx.viewer.on_pointer_move(center(), &mut fx.scene));

        let picked = fx
            .with(|viewer, host| viewer.on_click(center(), PointerButton::Primary, host))
            .unwrap();
        assert!(picked.is_none());
        let measure = fx.viewer.store().measurements.iter().next().expect("应提交量测");
        assert!((measure.length() - 5.0).abs() < 1e-6);

        assert!(fx.with(|viewer, host| viewer.on_key(Key::Escape, host)));
        assert!(!fx.viewer.store().measurements.is_user_measuring());
        assert_eq!(fx.scene.shape_count(), 1);
        assert_eq!(fx.viewer.export_measures(&fx.scene).features.len(), 1);
    }

    #[test]
    fn draw_candidates_follow_store_mode() {
        let mut fx = Fixture::new();
        fx.square();
        let vertex = fx.scene.screen_position(Point3::new(10.0, 0.0, 0.0)).unwrap();
        let picks = fx.viewer.draw_candidates(&fx.scene, vertex);
        assert!(!picks.is_empty());
        assert!(picks.iter().all(|pick| !pick.is_shape()));

        fx.viewer
            .store_mut()
            .set_annotation_mode(AnnotationMode::MapOnly);
        fx.process();
        assert!(fx.viewer.draw_candidates(&fx.scene, vertex).is_empty());
        assert_eq!(fx.viewer.export_annotations(&fx.scene).features.len(), 1);
    }
}
