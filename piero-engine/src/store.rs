//! 记录存储与命令队列。界面代码只通过这里发布命令、读取记录。

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use piero_config::{AnnotationMode, AppConfig};
use piero_core::{geometry::Point3, scene::Metadata, shape::{GeometryKind, ShapeId}};
use piero_io::ImportSource;
use uuid::Uuid;

use crate::command::Command;

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub uuid: Uuid,
    pub title: String,
    pub visible: bool,
    pub is_editing: bool,
    pub shape: ShapeId,
    /// 用户属性，随 GeoJSON 导入导出。
    pub properties: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub uuid: Uuid,
    pub title: String,
    pub visible: bool,
    pub shape: ShapeId,
    pub properties: Metadata,
    pub from: Point3,
    pub to: Point3,
}

impl Measure {
    #[inline]
    pub fn length(&self) -> f64 {
        self.from.distance(self.to)
    }
}

#[derive(Debug, Default)]
pub struct AnnotationStore {
    annotations: Vec<Annotation>,
    mode: AnnotationMode,
    show_labels: bool,
    is_user_drawing: bool,
}

impl AnnotationStore {
    pub fn new(mode: AnnotationMode, show_labels: bool) -> Self {
        Self {
            annotations: Vec::new(),
            mode,
            show_labels,
            is_user_drawing: false,
        }
    }

    pub fn add(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    pub fn remove(&mut self, uuid: Uuid) -> Option<Annotation> {
        let index = self.annotations.iter().position(|a| a.uuid == uuid)?;
        Some(self.annotations.remove(index))
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.uuid == uuid)
    }

    pub fn get_mut(&mut self, uuid: Uuid) -> Option<&mut Annotation> {
        self.annotations.iter_mut().find(|a| a.uuid == uuid)
    }

    pub fn has_title(&self, title: &str) -> bool {
        self.annotations.iter().any(|a| a.title == title)
    }

    pub fn titles(&self) -> HashSet<String> {
        self.annotations.iter().map(|a| a.title.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    #[inline]
    pub fn mode(&self) -> AnnotationMode {
        self.mode
    }

    #[inline]
    pub fn set_mode(&mut self, mode: AnnotationMode) {
        self.mode = mode;
    }

    #[inline]
    pub fn show_labels(&self) -> bool {
        self.show_labels
    }

    #[inline]
    pub fn set_show_labels(&mut self, value: bool) {
        self.show_labels = value;
    }

    #[inline]
    pub fn is_user_drawing(&self) -> bool {
        self.is_user_drawing
    }

    #[inline]
    pub fn set_user_drawing(&mut self, value: bool) {
        self.is_user_drawing = value;
    }
}

#[derive(Debug, Default)]
pub struct MeasurementStore {
    measures: Vec<Measure>,
    is_user_measuring: bool,
}

impl MeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, measure: Measure) {
        self.measures.push(measure);
    }

    pub fn remove(&mut self, uuid: Uuid) -> Option<Measure> {
        let index = self.measures.iter().position(|m| m.uuid == uuid)?;
        Some(self.measures.remove(index))
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Measure> {
        self.measures.iter().find(|m| m.uuid == uuid)
    }

    pub fn get_mut(&mut self, uuid: Uuid) -> Option<&mut Measure> {
        self.measures.iter_mut().find(|m| m.uuid == uuid)
    }

    pub fn has_title(&self, title: &str) -> bool {
        self.measures.iter().any(|m| m.title == title)
    }

    pub fn titles(&self) -> HashSet<String> {
        self.measures.iter().map(|m| m.title.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Measure> {
        self.measures.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.measures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }

    #[inline]
    pub fn is_user_measuring(&self) -> bool {
        self.is_user_measuring
    }

    #[inline]
    pub fn set_user_measuring(&mut self, value: bool) {
        self.is_user_measuring = value;
    }
}

/// 标注与量测记录，以及待处理的命令队列（先进先出）。
#[derive(Debug, Default)]
pub struct Store {
    pub annotations: AnnotationStore,
    pub measurements: MeasurementStore,
    commands: VecDeque<Command>,
}

impl Store {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            annotations: AnnotationStore::new(
                config.picking.annotation_mode,
                config.labels.show_labels,
            ),
            measurements: MeasurementStore::new(),
            commands: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    pub fn next_command(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    #[inline]
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn create_point(&mut self) {
        self.enqueue(Command::CreateAnnotation(GeometryKind::Point));
    }

    pub fn create_line(&mut self) {
        self.enqueue(Command::CreateAnnotation(GeometryKind::LineString));
    }

    pub fn create_polygon(&mut self) {
        self.enqueue(Command::CreateAnnotation(GeometryKind::Polygon));
    }

    pub fn edit(&mut self, uuid: Uuid) {
        self.enqueue(Command::EditAnnotation(uuid));
    }

    pub fn stop_edition(&mut self) {
        self.enqueue(Command::StopEdition);
    }

    pub fn remove_annotation(&mut self, uuid: Uuid) {
        self.enqueue(Command::RemoveAnnotation(uuid));
    }

    pub fn set_annotation_visible(&mut self, uuid: Uuid, visible: bool) {
        self.enqueue(Command::SetAnnotationVisible { uuid, visible });
    }

    pub fn set_show_labels(&mut self, show: bool) {
        self.enqueue(Command::SetShowLabels(show));
    }

    pub fn set_annotation_mode(&mut self, mode: AnnotationMode) {
        self.enqueue(Command::SetAnnotationMode(mode));
    }

    pub fn import_annotation_file(&mut self, source: ImportSource) {
        self.enqueue(Command::ImportAnnotations(vec![source]));
    }

    pub fn import_annotation_files(&mut self, sources: Vec<ImportSource>) {
        self.enqueue(Command::ImportAnnotations(sources));
    }

    pub fn export_annotations(&mut self, path: impl Into<PathBuf>) {
        self.enqueue(Command::ExportAnnotations(path.into()));
    }

    pub fn start_measuring(&mut self) {
        self.enqueue(Command::StartMeasuring);
    }

    pub fn stop_measuring(&mut self) {
        self.enqueue(Command::StopMeasuring);
    }

    pub fn remove_measure(&mut self, uuid: Uuid) {
        self.enqueue(Command::RemoveMeasure(uuid));
    }

    pub fn set_measure_visible(&mut self, uuid: Uuid, visible: bool) {
        self.enqueue(Command::SetMeasureVisible { uuid, visible });
    }

    pub fn import_measure_files(&mut self, sources: Vec<ImportSource>) {
        self.enqueue(Command::ImportMeasures(sources));
    }

    pub fn export_measures(&mut self, path: impl Into<PathBuf>) {
        self.enqueue(Command::ExportMeasures(path.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(title: &str) -> Annotation {
        Annotation {
            uuid: Uuid::new_v4(),
            title: title.to_string(),
            visible: true,
            is_editing: false,
            shape: ShapeId::generate(),
            properties: Metadata::new(),
        }
    }

    #[test]
    fn commands_are_processed_in_arrival_order() {
        let mut store = Store::new(&AppConfig::default());
        let uuid = Uuid::new_v4();
        store.create_polygon();
        store.edit(uuid);
        store.stop_edition();

        assert_eq!(store.pending_commands(), 3);
        assert_eq!(store.next_command(), Some(Command::CreateAnnotation(GeometryKind::Polygon)));
        assert_eq!(store.next_command(), Some(Command::EditAnnotation(uuid)));
        assert_eq!(store.next_command(), Some(Command::StopEdition));
        assert_eq!(store.next_command(), None);
    }

    #[test]
    fn annotation_titles_and_removal() {
        let mut store = AnnotationStore::new(AnnotationMode::Normal, true);
        let first = annotation("Tree");
        let uuid = first.uuid;
        store.add(first);
        store.add(annotation("Bench"));

        assert!(store.has_title("Tree"));
        assert!(!store.has_title("Lamp"));
        assert_eq!(store.titles().len(), 2);

        let removed = store.remove(uuid).expect("记录应存在");
        assert_eq!(removed.title, "Tree");
        assert!(store.remove(uuid).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn measure_length_is_endpoint_distance() {
        let measure = Measure {
            uuid: Uuid::new_v4(),
            title: "Height".to_string(),
            visible: true,
            shape: ShapeId::generate(),
            properties: Metadata::new(),
            from: Point3::new(0.0, 0.0, 0.0),
            to: Point3::new(0.0, 0.0, 5.0),
        };
        assert_eq!(measure.length(), 5.0);
    }
}
