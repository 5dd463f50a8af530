//! 交互核心调用、但不拥有的外部协作方。

use std::collections::VecDeque;

use piero_config::AnnotationMode;
use piero_core::{
    geometry::{Color, Point2, Point3, ReferenceFrame, Vector3},
    pick::{ClippingBox, DepthRange, PickResult, RayHit},
    scene::{EntityId, ObjectTree},
    shape::{GeometryKind, Shape, ShapeFlags, ShapeId, Viewport},
};

/// 拾取候选的对象范围。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickTarget {
    #[default]
    All,
    /// 只拾取底图。
    MapsOnly,
    /// 排除底图与辅助对象（平面、网格）。
    NonMaps,
}

pub struct PickOptions<'a> {
    /// 拾取半径（像素）。
    pub radius: f64,
    pub target: PickTarget,
    pub filter: Option<&'a dyn Fn(&PickResult) -> bool>,
    pub sort_by_distance: bool,
    pub limit: Option<usize>,
}

impl<'a> PickOptions<'a> {
    pub fn new(radius: f64) -> Self {
        Self {
            radius,
            target: PickTarget::All,
            filter: None,
            sort_by_distance: false,
            limit: None,
        }
    }

    pub fn target(mut self, target: PickTarget) -> Self {
        self.target = target;
        self
    }

    pub fn filter(mut self, filter: &'a dyn Fn(&PickResult) -> bool) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sorted(mut self) -> Self {
        self.sort_by_distance = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn accepts(&self, pick: &PickResult) -> bool {
        self.filter.is_none_or(|filter| filter(pick))
    }
}

/// 渲染层的拾取与射线求交。
pub trait PickSource {
    fn pick_at(&self, position: Point2, options: &PickOptions<'_>) -> Vec<PickResult>;
    /// 按距离升序返回射线与场景的全部交点。
    fn raycast(&self, origin: Point3, direction: Vector3) -> Vec<RayHit>;
    fn depth_range(&self) -> DepthRange;
    fn clipping_box(&self) -> Option<ClippingBox>;
}

/// 场景变更边界：形状的增删改、重绘请求与实体选择集。
pub trait SceneHost: PickSource {
    fn objects(&self) -> &ObjectTree;
    fn viewport(&self) -> &dyn Viewport;
    fn reference_frame(&self) -> &dyn ReferenceFrame;
    fn add_shape(&mut self, shape: &Shape);
    fn update_shape(&mut self, shape: &Shape);
    fn remove_shape(&mut self, id: ShapeId);
    /// 请求重绘；重复调用无副作用。
    fn notify_change(&mut self);
    fn select_item(&mut self, entity: EntityId, set: &str, item_id: &str);
    fn clear_selection_set(&mut self, entity: EntityId, set: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawTicket(pub u64);

/// 交互绘制的配置。拾取回调由 [`crate::Viewer::draw_candidates`] 提供。
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRequest {
    pub kind: GeometryKind,
    pub color: Color,
    pub flags: ShapeFlags,
    pub vertex_radius: f64,
    pub removal_floor: usize,
    pub mode: AnnotationMode,
}

/// 交互式几何采集工具。绘制结果异步返回，通过 `Viewer::on_draw_completed` 送回。
pub trait DrawTool {
    fn begin(&mut self, request: DrawRequest) -> DrawTicket;
    fn abort(&mut self, ticket: DrawTicket);
    fn enter_edit_mode(&mut self, shape: ShapeId);
    fn exit_edit_mode(&mut self);
}

pub trait TitlePrompt {
    /// 返回 `None` 表示用户取消。
    fn prompt_title(&mut self, label: &str, default: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub text: String,
    pub level: NotificationLevel,
}

impl Notification {
    pub fn new(title: impl Into<String>, text: impl Into<String>, level: NotificationLevel) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            level,
        }
    }
}

pub trait NotificationSink {
    fn push(&mut self, notification: Notification);
}

/// 会话处理事件时用到的全部协作方。
pub struct Host<'a> {
    pub scene: &'a mut dyn SceneHost,
    pub draw: &'a mut dyn DrawTool,
    pub prompt: &'a mut dyn TitlePrompt,
    pub notifications: &'a mut dyn NotificationSink,
}

/// 按脚本应答的标题输入框；脚本耗尽后接受默认值。
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: VecDeque<Option<String>>,
    asked: Vec<(String, String)>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&mut self, title: impl Into<String>) -> &mut Self {
        self.answers.push_back(Some(title.into()));
        self
    }

    pub fn cancel(&mut self) -> &mut Self {
        self.answers.push_back(None);
        self
    }

    /// 历次询问的 `(label, default)`。
    pub fn asked(&self) -> &[(String, String)] {
        &self.asked
    }
}

impl TitlePrompt for ScriptedPrompt {
    fn prompt_title(&mut self, label: &str, default: &str) -> Option<String> {
        self.asked.push((label.to_string(), default.to_string()));
        self.answers
            .pop_front()
            .unwrap_or_else(|| Some(default.to_string()))
    }
}

/// 记录请求的绘制工具；绘制结果由调用方显式送回。
#[derive(Debug, Default)]
pub struct ScriptedDrawTool {
    next_ticket: u64,
    requests: Vec<(DrawTicket, DrawRequest)>,
    aborted: Vec<DrawTicket>,
    editing: Option<ShapeId>,
}

impl ScriptedDrawTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> &[(DrawTicket, DrawRequest)] {
        &self.requests
    }

    pub fn last_ticket(&self) -> Option<DrawTicket> {
        self.requests.last().map(|(ticket, _)| *ticket)
    }

    pub fn aborted(&self) -> &[DrawTicket] {
        &self.aborted
    }

    pub fn editing(&self) -> Option<ShapeId> {
        self.editing
    }
}

impl DrawTool for ScriptedDrawTool {
    fn begin(&mut self, request: DrawRequest) -> DrawTicket {
        let ticket = DrawTicket(self.next_ticket);
        self.next_ticket += 1;
        self.requests.push((ticket, request));
        ticket
    }

    fn abort(&mut self, ticket: DrawTicket) {
        self.aborted.push(ticket);
    }

    fn enter_edit_mode(&mut self, shape: ShapeId) {
        self.editing = Some(shape);
    }

    fn exit_edit_mode(&mut self) {
        self.editing = None;
    }
}

#[derive(Debug, Default)]
pub struct NotificationLog {
    entries: Vec<Notification>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    pub fn last(&self) -> Option<&Notification> {
        self.entries.last()
    }
}

impl NotificationSink for NotificationLog {
    fn push(&mut self, notification: Notification) {
        self.entries.push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_prompt_falls_back_to_default() {
        let mut prompt = ScriptedPrompt::new();
        prompt.answer("Custom").cancel();

        assert_eq!(prompt.prompt_title("Name", "A").as_deref(), Some("Custom"));
        assert_eq!(prompt.prompt_title("Name", "B"), None);
        assert_eq!(prompt.prompt_title("Name", "C").as_deref(), Some("C"));
        assert_eq!(prompt.asked().len(), 3);
    }

    #[test]
    fn draw_tool_issues_sequential_tickets() {
        let mut tool = ScriptedDrawTool::new();
        let request = DrawRequest {
            kind: GeometryKind::Point,
            color: Color::WHITE,
            flags: ShapeFlags::default(),
            vertex_radius: 5.0,
            removal_floor: 1,
            mode: AnnotationMode::Normal,
        };
        let first = tool.begin(request.clone());
        let second = tool.begin(request);
        assert_ne!(first, second);
        assert_eq!(tool.last_ticket(), Some(second));
    }
}
