//! 单槽高亮：任意时刻至多一个高亮生效。

use piero_core::{
    pick::{PickKind, PickResult},
    scene::EntityId,
    shape::{Shape, ShapeId},
};
use tracing::debug;

use crate::errors::EngineError;

/// 结构化模型高亮时使用的选择集名称。
pub const SELECTION_SET: &str = "selection";

/// 高亮需要改动的外部状态。
pub trait HighlightHost {
    fn shape_mut(&mut self, id: ShapeId) -> Option<&mut Shape>;
    /// 形状显示属性变化后同步到场景并请求重绘。
    fn shape_changed(&mut self, id: ShapeId);
    fn select_item(&mut self, entity: EntityId, set: &str, item_id: &str);
    fn clear_selection_set(&mut self, entity: EntityId, set: &str);
}

type Restore = Box<dyn FnOnce(&mut dyn HighlightHost)>;

#[derive(Default)]
pub struct Highlighter {
    restore: Option<Restore>,
}

impl Highlighter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.restore.is_some()
    }

    /// 撤销当前高亮；没有高亮时不做任何事。
    pub fn clear(&mut self, host: &mut dyn HighlightHost) {
        if let Some(restore) = self.restore.take() {
            restore(host);
        }
    }

    /// 先清除已有高亮，再按拾取种类施加新的高亮。
    pub fn highlight(
        &mut self,
        pick: &PickResult,
        host: &mut dyn HighlightHost,
    ) -> Result<(), EngineError> {
        self.clear(host);

        match &pick.kind {
            PickKind::Shape { shape } => {
                let id = *shape;
                let Some(shape) = host.shape_mut(id) else {
                    return Ok(());
                };
                if !shape.highlightable() {
                    return Ok(());
                }
                let previous = shape.color();
                shape.set_color(shape.highlight_color());
                host.shape_changed(id);
                debug!(shape = %id, "形状已高亮");

                self.restore = Some(Box::new(move |host: &mut dyn HighlightHost| {
                    if let Some(shape) = host.shape_mut(id) {
                        shape.set_color(previous);
                        host.shape_changed(id);
                    }
                }));
            }
            PickKind::Ifc { features } => {
                let entity = pick.entity.ok_or(EngineError::MissingState("IFC 拾取缺少所属实体"))?;
                let feature = features
                    .first()
                    .ok_or(EngineError::MissingState("IFC 拾取尚未解析构件"))?;
                host.select_item(entity, SELECTION_SET, &feature.item.item_id);
                debug!(%entity, item = %feature.item.item_id, "构件已加入选择集");

                self.restore = Some(Box::new(move |host: &mut dyn HighlightHost| {
                    host.clear_selection_set(entity, SELECTION_SET);
                }));
            }
            PickKind::Map { .. }
            | PickKind::CityObject { .. }
            | PickKind::PointCloud
            | PickKind::FeatureCollection
            | PickKind::Mesh { .. }
            | PickKind::Surface => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for Highlighter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Highlighter")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use piero_core::{
        geometry::{Color, Point3},
        pick::{IfcFeature, IfcItem},
        scene::ObjectId,
        shape::{GeometryKind, ShapeFlags, ShapeStyle},
    };

    use super::*;

    #[derive(Default)]
    struct Host {
        shapes: HashMap<ShapeId, Shape>,
        changes: usize,
        selections: HashMap<EntityId, String>,
    }

    impl HighlightHost for Host {
        fn shape_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
            self.shapes.get_mut(&id)
        }

        fn shape_changed(&mut self, _id: ShapeId) {
            self.changes += 1;
        }

        fn select_item(&mut self, entity: EntityId, _set: &str, item_id: &str) {
            self.selections.insert(entity, item_id.to_string());
        }

        fn clear_selection_set(&mut self, entity: EntityId, _set: &str) {
            self.selections.remove(&entity);
        }
    }

    fn shape() -> Shape {
        let style = ShapeStyle {
            color: Color::from_hex(0x377c5f),
            highlight_color: Color::from_hex(0x50bf91),
            vertex_radius: 5.0,
        };
        Shape::new(GeometryKind::Point, style, ShapeFlags::default())
            .with_points(vec![Point3::new(0.0, 0.0, 0.0)])
    }

    fn shape_pick(id: ShapeId) -> PickResult {
        PickResult::new(Point3::new(0.0, 0.0, 0.0), 1.0, ObjectId::new(0))
            .with_kind(PickKind::Shape { shape: id })
    }

    #[test]
    fn shape_highlight_swaps_and_restores_color() {
        let mut host = Host::default();
        let shape = shape();
        let id = shape.id();
        host.shapes.insert(id, shape);

        let mut highlighter = Highlighter::new();
        highlighter.highlight(&shape_pick(id), &mut host).unwrap();
        assert_eq!(host.shapes[&id].color(), Color::from_hex(0x50bf91));
        assert!(highlighter.is_active());

        highlighter.clear(&mut host);
        assert_eq!(host.shapes[&id].color(), Color::from_hex(0x377c5f));
        let changes = host.changes;

        // 第二次清除不产生任何变化
        highlighter.clear(&mut host);
        assert_eq!(host.changes, changes);
        assert!(!highlighter.is_active());
    }

    #[test]
    fn new_highlight_clears_previous_one() {
        let mut host = Host::default();
        let (a, b) = (shape(), shape());
        let (ida, idb) = (a.id(), b.id());
        host.shapes.insert(ida, a);
        host.shapes.insert(idb, b);

        let mut highlighter = Highlighter::new();
        highlighter.highlight(&shape_pick(ida), &mut host).unwrap();
        highlighter.highlight(&shape_pick(idb), &mut host).unwrap();
        assert_eq!(host.shapes[&ida].color(), Color::from_hex(0x377c5f));
        assert_eq!(host.shapes[&idb].color(), Color::from_hex(0x50bf91));
    }

    #[test]
    fn shapes_being_edited_are_not_highlighted() {
        let mut host = Host::default();
        let mut shape = shape();
        shape.set_highlightable(false);
        let id = shape.id();
        host.shapes.insert(id, shape);

        let mut highlighter = Highlighter::new();
        highlighter.highlight(&shape_pick(id), &mut host).unwrap();
        assert!(!highlighter.is_active());
        assert_eq!(host.changes, 0);
    }

    #[test]
    fn ifc_highlight_uses_selection_set() {
        let mut host = Host::default();
        let entity = EntityId::new(3);
        let pick = PickResult::new(Point3::new(0.0, 0.0, 0.0), 1.0, ObjectId::new(0))
            .with_entity(entity)
            .with_kind(PickKind::Ifc {
                features: vec![IfcFeature {
                    item: IfcItem {
                        item_id: "128".to_string(),
                        express_id: 128,
                        ..IfcItem::default()
                    },
                    properties: Vec::new(),
                }],
            });

        let mut highlighter = Highlighter::new();
        highlighter.highlight(&pick, &mut host).unwrap();
        assert_eq!(host.selections.get(&entity).map(String::as_str), Some("128"));

        highlighter.clear(&mut host);
        assert!(host.selections.is_empty());
    }

    #[test]
    fn unresolved_ifc_pick_is_a_contract_violation() {
        let mut host = Host::default();
        let pick = PickResult::new(Point3::new(0.0, 0.0, 0.0), 1.0, ObjectId::new(0))
            .with_entity(EntityId::new(0))
            .with_kind(PickKind::Ifc { features: Vec::new() });

        let err = Highlighter::new().highlight(&pick, &mut host).unwrap_err();
        assert!(matches!(err, EngineError::MissingState(_)));
    }
}
