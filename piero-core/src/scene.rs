use std::collections::HashMap;
use std::fmt;

use glam::DMat4;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 场景对象上的自由格式元数据（对应加载器写入的 userData）。
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 提供原始数值，便于序列化或日志输出。
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity-{}", self.0)
    }
}

/// 数据集标签：数据集名称与源文件名，两者都可能缺失。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetTag {
    pub name: Option<String>,
    pub filename: Option<String>,
}

impl DatasetTag {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// 对象在拾取中的角色：底图、辅助对象（平面、网格）或普通模型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectRole {
    #[default]
    Model,
    Map,
    Helper,
}

#[derive(Debug, Clone)]
pub struct SceneObject {
    pub id: ObjectId,
    pub name: String,
    pub parent: Option<ObjectId>,
    pub entity: Option<EntityId>,
    pub role: ObjectRole,
    pub metadata: Metadata,
    pub dataset: Option<DatasetTag>,
    /// 要素集合的瓦片节点；元数据向上收集时在此处停止。
    pub is_feature_tile: bool,
    pub world_matrix: DMat4,
}

#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub id: EntityId,
    pub name: String,
    pub root: ObjectId,
    pub metadata: Metadata,
    pub dataset: Option<DatasetTag>,
}

/// 渲染场景的只读镜像：对象层级、实体及其元数据。
#[derive(Debug, Default)]
pub struct ObjectTree {
    objects: HashMap<ObjectId, SceneObject>,
    entities: HashMap<EntityId, EntityInfo>,
    next_object: u64,
    next_entity: u64,
}

impl ObjectTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新建实体并创建其根对象，数据集标签同时写入根对象。
    pub fn add_entity(&mut self, name: impl Into<String>, dataset: Option<DatasetTag>) -> EntityId {
        let name = name.into();
        let id = EntityId::new(self.next_entity);
        self.next_entity += 1;

        let root = self.allocate_object(name.clone(), None, Some(id));
        if let Some(object) = self.objects.get_mut(&root) {
            object.dataset = dataset.clone();
        }
        self.entities.insert(
            id,
            EntityInfo {
                id,
                name,
                root,
                metadata: Metadata::new(),
                dataset,
            },
        );
        id
    }

    /// 在 `parent` 下新建对象；实体归属继承自父对象。
    pub fn add_object(&mut self, parent: Option<ObjectId>, name: impl Into<String>) -> ObjectId {
        let entity = parent
            .and_then(|id| self.objects.get(&id))
            .and_then(|object| object.entity);
        self.allocate_object(name.into(), parent, entity)
    }

    fn allocate_object(
        &mut self,
        name: String,
        parent: Option<ObjectId>,
        entity: Option<EntityId>,
    ) -> ObjectId {
        let id = ObjectId::new(self.next_object);
        self.next_object += 1;
        self.objects.insert(
            id,
            SceneObject {
                id,
                name,
                parent,
                entity,
                role: ObjectRole::Model,
                metadata: Metadata::new(),
                dataset: None,
                is_feature_tile: false,
                world_matrix: DMat4::IDENTITY,
            },
        );
        id
    }

    #[inline]
    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    #[inline]
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.objects.get_mut(&id)
    }

    /// 移除单个对象；子对象保留，其父链在此处断开。
    pub fn remove_object(&mut self, id: ObjectId) -> Option<SceneObject> {
        self.objects.remove(&id)
    }

    #[inline]
    pub fn entity(&self, id: EntityId) -> Option<&EntityInfo> {
        self.entities.get(&id)
    }

    #[inline]
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut EntityInfo> {
        self.entities.get_mut(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values()
    }

    /// 自对象本身起，沿父链向上遍历。缺失的父对象会终止遍历。
    pub fn ancestors(&self, id: ObjectId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: Some(id),
            remaining: self.objects.len(),
        }
    }
}

pub struct Ancestors<'a> {
    tree: &'a ObjectTree,
    next: Option<ObjectId>,
    // 防止错误的父链形成环时无限循环
    remaining: usize,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a SceneObject;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let object = self.tree.object(self.next?)?;
        self.remaining -= 1;
        self.next = object.parent;
        Some(object)
    }
}
