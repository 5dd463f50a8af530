//! 标注会话：绘制、编辑、命名，以及 GeoJSON 导入导出。

use std::collections::{HashMap, HashSet};

use geojson::{Feature, FeatureCollection};
use piero_config::{AnnotationMode, AppConfig};
use piero_core::{
    geometry::{Color, Point2, Point3},
    pick::PickResult,
    scene::Metadata,
    shape::{GeometryKind, LabelContext, Shape, ShapeId, ShapeStyle},
};
use piero_io::{
    ExportContext, FeatureLoader, ImportOutcome, ImportSource, IoError, RecordExport,
    annotation_feature, feature_properties, feature_title, owc_collection, shape_geometry,
};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::host::{DrawRequest, DrawTicket, Host, SceneHost};
use crate::import::{self, ANNOTATION_REPORT};
use crate::naming::{self, ANNOTATION_SENTINEL};
use crate::picker::Picker;
use crate::store::{Annotation, AnnotationStore};

const TITLE_PROMPT: &str = "Annotation name";
const COLLECTION_TITLE: &str = "Piero annotations";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationSettings {
    pub style: ShapeStyle,
    /// 编辑中的形状颜色。
    pub edit_color: Color,
    pub min_segment_pixels: f64,
    pub pick_radius: f64,
}

impl AnnotationSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            style: ShapeStyle {
                color: config.style.shape_color,
                highlight_color: config.style.highlight_shape_color,
                vertex_radius: config.style.point_radius,
            },
            edit_color: config.style.edit_shape_color,
            min_segment_pixels: config.labels.min_segment_pixels,
            pick_radius: config.picking.radius,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationState {
    Idle,
    Drawing {
        kind: GeometryKind,
        ticket: DrawTicket,
    },
    /// `snapshot` 为进入编辑前的顶点，取消编辑时原样恢复。
    Editing {
        annotation: Uuid,
        snapshot: Vec<Point3>,
    },
}

/// 重建标签并同步到场景。
fn redraw_shape(shape: &mut Shape, title: Option<&str>, min_segment_pixels: f64, scene: &mut dyn SceneHost) {
    let context = LabelContext {
        viewport: scene.viewport(),
        min_segment_pixels,
        title,
    };
    shape.rebuild_labels(&context);
    scene.update_shape(shape);
}

pub struct AnnotationSession {
    settings: AnnotationSettings,
    state: AnnotationState,
    shapes: HashMap<Uuid, Shape>,
    owners: HashMap<ShapeId, Uuid>,
    picker: Picker,
}

impl AnnotationSession {
    pub fn new(settings: AnnotationSettings) -> Self {
        Self {
            picker: Picker::new(settings.pick_radius),
            settings,
            state: AnnotationState::Idle,
            shapes: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> &AnnotationState {
        &self.state
    }

    #[inline]
    pub fn is_drawing(&self) -> bool {
        matches!(self.state, AnnotationState::Drawing { .. })
    }

    #[inline]
    pub fn is_editing(&self) -> bool {
        matches!(self.state, AnnotationState::Editing { .. })
    }

    pub fn editing(&self) -> Option<Uuid> {
        match &self.state {
            AnnotationState::Editing { annotation, .. } => Some(*annotation),
            _ => None,
        }
    }

    pub fn shape(&self, uuid: Uuid) -> Option<&Shape> {
        self.shapes.get(&uuid)
    }

    /// 形状所属标注。
    pub fn owner(&self, id: ShapeId) -> Option<Uuid> {
        self.owners.get(&id).copied()
    }

    pub fn shape_by_id_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        let uuid = self.owners.get(&id)?;
        self.shapes.get_mut(uuid)
    }

    /// 请求绘制工具采集新几何；进行中的绘制被中止，编辑中的标注保留修改并退出编辑。
    pub fn begin_draw(&mut self, kind: GeometryKind, store: &mut AnnotationStore, host: &mut Host<'_>) {
        self.cancel_draw(store, host);
        self.stop_edition(false, store, host);

        let request = DrawRequest {
            kind,
            color: self.settings.style.color,
            flags: kind.flags(store.show_labels()),
            vertex_radius: self.settings.style.vertex_radius,
            removal_floor: kind.removal_floor(),
            mode: store.mode(),
        };
        let ticket = host.draw.begin(request);
        self.state = AnnotationState::Drawing { kind, ticket };
        store.set_user_drawing(true);
        debug!(%kind, ticket = ticket.0, "开始绘制标注");
    }

    /// 中止进行中的绘制，返回是否确有绘制被中止。
    pub fn cancel_draw(&mut self, store: &mut AnnotationStore, host: &mut Host<'_>) -> bool {
        let AnnotationState::Drawing { ticket, .. } = self.state else {
            return false;
        };
        host.draw.abort(ticket);
        self.state = AnnotationState::Idle;
        store.set_user_drawing(false);
        debug!(ticket = ticket.0, "绘制已中止");
        true
    }

    /// 绘制工具的完成回调。`points` 为 `None` 表示用户放弃；过期票据的结果被忽略。
    pub fn on_draw_completed(
        &mut self,
        ticket: DrawTicket,
        points: Option<Vec<Point3>>,
        store: &mut AnnotationStore,
        host: &mut Host<'_>,
    ) -> Option<Uuid> {
        let kind = match self.state {
            AnnotationState::Drawing { kind, ticket: current } if current == ticket => kind,
            _ => {
                debug!(ticket = ticket.0, "忽略过期的绘制结果");
                return None;
            }
        };
        self.state = AnnotationState::Idle;
        store.set_user_drawing(false);

        let Some(points) = points.filter(|points| !points.is_empty()) else {
            debug!(ticket = ticket.0, "绘制已放弃");
            return None;
        };
        let shape = Shape::new(kind, self.settings.style, kind.flags(store.show_labels()))
            .with_points(points);
        host.scene.add_shape(&shape);

        let default = naming::resolve_title(
            naming::default_annotation_title(kind),
            |title| store.has_title(title),
            ANNOTATION_SENTINEL,
        );
        let Some(title) = host.prompt.prompt_title(TITLE_PROMPT, &default) else {
            host.scene.remove_shape(shape.id());
            host.scene.notify_change();
            debug!("取消命名，丢弃绘制的形状");
            return None;
        };

        let uuid = Uuid::new_v4();
        self.publish(uuid, title, Metadata::new(), shape, store, host.scene);
        Some(uuid)
    }

    fn publish(
        &mut self,
        uuid: Uuid,
        title: String,
        properties: Metadata,
        mut shape: Shape,
        store: &mut AnnotationStore,
        scene: &mut dyn SceneHost,
    ) {
        redraw_shape(&mut shape, Some(title.as_str()), self.settings.min_segment_pixels, scene);
        info!(%uuid, %title, kind = %shape.kind(), "已发布标注");
        store.add(Annotation {
            uuid,
            title,
            visible: true,
            is_editing: false,
            shape: shape.id(),
            properties,
        });
        self.owners.insert(shape.id(), uuid);
        self.shapes.insert(uuid, shape);
        scene.notify_change();
    }

    /// 进入编辑模式。已有的编辑保留修改并退出，进行中的绘制被中止。
    pub fn edit(
        &mut self,
        uuid: Uuid,
        store: &mut AnnotationStore,
        host: &mut Host<'_>,
    ) -> Result<(), EngineError> {
        if self.editing() == Some(uuid) {
            return Ok(());
        }
        if store.get(uuid).is_none() {
            return Err(EngineError::AnnotationNotFound(uuid));
        }
        self.cancel_draw(store, host);
        self.stop_edition(false, store, host);

        let shape = self
            .shapes
            .get_mut(&uuid)
            .ok_or(EngineError::MissingState("标注缺少形状"))?;
        let snapshot = shape.points().to_vec();
        shape.set_color(self.settings.edit_color);
        shape.set_highlightable(false);
        host.scene.update_shape(shape);
        host.draw.enter_edit_mode(shape.id());

        if let Some(annotation) = store.get_mut(uuid) {
            annotation.is_editing = true;
        }
        store.set_user_drawing(true);
        self.state = AnnotationState::Editing {
            annotation: uuid,
            snapshot,
        };
        host.scene.notify_change();
        debug!(%uuid, "进入标注编辑");
        Ok(())
    }

    /// 退出编辑。`restore` 为真时恢复进入编辑前的顶点。
    pub fn stop_edition(
        &mut self,
        restore: bool,
        store: &mut AnnotationStore,
        host: &mut Host<'_>,
    ) -> Option<Uuid> {
        let (uuid, snapshot) = match std::mem::replace(&mut self.state, AnnotationState::Idle) {
            AnnotationState::Editing {
                annotation,
                snapshot,
            } => (annotation, snapshot),
            other => {
                self.state = other;
                return None;
            }
        };
        host.draw.exit_edit_mode();

        if let Some(annotation) = store.get_mut(uuid) {
            annotation.is_editing = false;
        }
        store.set_user_drawing(false);

        let title = store.get(uuid).map(|annotation| annotation.title.as_str());
        if let Some(shape) = self.shapes.get_mut(&uuid) {
            if restore {
                shape.set_points(snapshot);
            }
            shape.set_color(self.settings.style.color);
            shape.set_highlightable(true);
            shape.refresh_measurements();
            redraw_shape(shape, title, self.settings.min_segment_pixels, host.scene);
        }
        host.scene.notify_change();
        debug!(%uuid, restore, "退出标注编辑");
        Some(uuid)
    }

    pub fn move_vertex(
        &mut self,
        index: usize,
        point: Point3,
        store: &AnnotationStore,
        scene: &mut dyn SceneHost,
    ) -> bool {
        self.edit_vertices(store, scene, |shape| shape.move_vertex(index, point))
    }

    pub fn insert_vertex(
        &mut self,
        index: usize,
        point: Point3,
        store: &AnnotationStore,
        scene: &mut dyn SceneHost,
    ) -> bool {
        self.edit_vertices(store, scene, |shape| shape.insert_vertex(index, point))
    }

    /// 低于几何类型的最少顶点数时拒绝删除。
    pub fn remove_vertex(&mut self, index: usize, store: &AnnotationStore, scene: &mut dyn SceneHost) -> bool {
        self.edit_vertices(store, scene, |shape| shape.remove_vertex(index))
    }

    fn edit_vertices(
        &mut self,
        store: &AnnotationStore,
        scene: &mut dyn SceneHost,
        edit: impl FnOnce(&mut Shape) -> bool,
    ) -> bool {
        let Some(uuid) = self.editing() else {
            return false;
        };
        let Some(shape) = self.shapes.get_mut(&uuid) else {
            return false;
        };
        if !edit(shape) {
            return false;
        }
        let title = store.get(uuid).map(|annotation| annotation.title.as_str());
        redraw_shape(shape, title, self.settings.min_segment_pixels, scene);
        scene.notify_change();
        true
    }

    /// 删除标注及其形状；若正在编辑该标注，先退出编辑。
    pub fn remove(
        &mut self,
        uuid: Uuid,
        store: &mut AnnotationStore,
        host: &mut Host<'_>,
    ) -> Result<(), EngineError> {
        if self.editing() == Some(uuid) {
            self.stop_edition(false, store, host);
        }
        store
            .remove(uuid)
            .ok_or(EngineError::AnnotationNotFound(uuid))?;
        if let Some(shape) = self.shapes.remove(&uuid) {
            self.owners.remove(&shape.id());
            host.scene.remove_shape(shape.id());
        }
        host.scene.notify_change();
        info!(%uuid, "已删除标注");
        Ok(())
    }

    pub fn set_visible(
        &mut self,
        uuid: Uuid,
        visible: bool,
        store: &mut AnnotationStore,
        scene: &mut dyn SceneHost,
    ) -> Result<(), EngineError> {
        let annotation = store
            .get_mut(uuid)
            .ok_or(EngineError::AnnotationNotFound(uuid))?;
        annotation.visible = visible;
        if let Some(shape) = self.shapes.get_mut(&uuid) {
            shape.set_visible(visible);
            scene.update_shape(shape);
        }
        scene.notify_change();
        Ok(())
    }

    /// 切换标签显示：点显示标题，折线显示各段长度，多边形显示面积。
    pub fn set_show_labels(&mut self, show: bool, store: &mut AnnotationStore, scene: &mut dyn SceneHost) {
        store.set_show_labels(show);
        for annotation in store.iter() {
            if let Some(shape) = self.shapes.get_mut(&annotation.uuid) {
                shape.set_flags(shape.kind().flags(show));
                redraw_shape(shape, Some(annotation.title.as_str()), self.settings.min_segment_pixels, scene);
            }
        }
        scene.notify_change();
    }

    /// 相机变化后重算标签（线段标签依赖屏幕长度）。
    pub fn refresh_labels(&mut self, store: &AnnotationStore, scene: &mut dyn SceneHost) {
        for annotation in store.iter() {
            if let Some(shape) = self.shapes.get_mut(&annotation.uuid) {
                redraw_shape(shape, Some(annotation.title.as_str()), self.settings.min_segment_pixels, scene);
            }
        }
    }

    /// 绘制工具的拾取回调。非编辑状态下排除形状，避免吸附到其他标注的顶点。
    pub fn pick_candidates(
        &self,
        scene: &dyn SceneHost,
        position: Point2,
        mode: AnnotationMode,
    ) -> Vec<PickResult> {
        let editing = self.is_editing();
        let shapes_allowed = |pick: &PickResult| editing || !pick.is_shape();
        let radius = self.picker.radius();
        match mode {
            AnnotationMode::Normal => {
                let filter: &dyn Fn(&PickResult) -> bool = &shapes_allowed;
                self.picker.all_at(scene, position, radius, Some(filter))
            }
            AnnotationMode::MapOnly => {
                let map_or_shape =
                    |pick: &PickResult| (pick.is_map() || pick.is_shape()) && shapes_allowed(pick);
                let filter: &dyn Fn(&PickResult) -> bool = &map_or_shape;
                self.picker.all_at(scene, position, radius, Some(filter))
            }
            AnnotationMode::ObjectsOnly => {
                let filter: &dyn Fn(&PickResult) -> bool = &shapes_allowed;
                self.picker.objects_at(scene, position, 0.0, Some(filter))
            }
        }
    }

    /// 导入 GeoJSON 文件。与导入开始时已有标题重名的要素计为跳过。
    pub fn import(
        &mut self,
        loader: &dyn FeatureLoader,
        sources: &[ImportSource],
        store: &mut AnnotationStore,
        host: &mut Host<'_>,
    ) -> ImportOutcome {
        let skip = store.titles();
        import::run_import(loader, sources, ANNOTATION_REPORT, host.notifications, |feature| {
            self.import_feature(feature, &skip, store, host.scene)
        })
    }

    /// 导入单个要素；返回 `Ok(false)` 表示因重名跳过。
    pub fn import_feature(
        &mut self,
        feature: &Feature,
        skip: &HashSet<String>,
        store: &mut AnnotationStore,
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
            debug!(%title, "标题已存在，跳过要素");
            return Ok(false);
        }

        let (kind, points) = shape_geometry(feature, scene.reference_frame())?;
        let shape = Shape::new(kind, self.settings.style, kind.flags(store.show_labels()))
            .with_points(points);
        scene.add_shape(&shape);
        self.publish(Uuid::new_v4(), title, properties, shape, store, scene);
        Ok(true)
    }

    pub fn export(&self, store: &AnnotationStore, context: &ExportContext<'_>) -> FeatureCollection {
        let features = store
            .iter()
            .filter_map(|annotation| {
                let shape = self.shapes.get(&annotation.uuid)?;
                let record = RecordExport {
                    uuid: annotation.uuid,
                    title: &annotation.title,
                    properties: &annotation.properties,
                };
                Some(annotation_feature(&record, shape.kind(), shape.points(), context))
            })
            .collect();
        owc_collection(features, COLLECTION_TITLE, context)
    }
}
