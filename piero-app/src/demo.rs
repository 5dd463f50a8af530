//! 内置演示场景与脚本化交互。

use anyhow::{Context, Result};
use piero_core::{
    feature::Feature,
    geometry::Point3,
    pick::{IfcFeature, IfcItem, IfcProperty, PickKind, VectorFeature},
    scene::{DatasetTag, EntityId, Metadata, ObjectRole},
    units::{Precision, format_area, format_length},
};
use piero_engine::{
    Viewer,
    highlight::SELECTION_SET,
    host::{Host, NotificationLog, SceneHost, ScriptedDrawTool, ScriptedPrompt},
    scene::{Camera, Mesh, Scene},
    viewer::{Key, PointerButton},
};
use serde_json::{Value, json};
use tracing::info;

const WIDTH: f64 = 1280.0;
const HEIGHT: f64 = 720.0;

/// 无界面运行所需的场景与脚本化协作者。
pub struct Workbench {
    pub scene: Scene,
    pub building: EntityId,
    pub draw: ScriptedDrawTool,
    pub prompt: ScriptedPrompt,
    pub notifications: NotificationLog,
}

impl Workbench {
    pub fn new() -> Self {
        let (scene, building) = build_scene();
        Self {
            scene,
            building,
            draw: ScriptedDrawTool::new(),
            prompt: ScriptedPrompt::new(),
            notifications: NotificationLog::new(),
        }
    }

    pub fn host(&mut self) -> Host<'_> {
        Host {
            scene: &mut self.scene,
            draw: &mut self.draw,
            prompt: &mut self.prompt,
            notifications: &mut self.notifications,
        }
    }
}

fn corners(points: [(f64, f64, f64); 4]) -> [Point3; 4] {
    points.map(|(x, y, z)| Point3::new(x, y, z))
}

/// 底图瓦片上立着一栋带阳台的 IFC 建筑。
fn build_scene() -> (Scene, EntityId) {
    let camera = Camera::look_at(
        Point3::new(0.0, -30.0, 15.0),
        Point3::new(0.0, 0.0, 0.0),
        WIDTH,
        HEIGHT,
    );
    let mut scene = Scene::new(camera);

    let map = scene.add_entity("OpenStreetMap", Some(DatasetTag::named("OpenStreetMap")));
    let map_root = scene.objects().entity(map).map(|entity| entity.root);
    let mut properties = Metadata::new();
    properties.insert("name".to_string(), json!("Piazza del Duomo"));
    properties.insert("highway".to_string(), json!("pedestrian"));
    let tile = scene.add_mesh(
        map_root,
        "tile 15/17410/11587",
        Mesh::quad(
            corners([(-100.0, -100.0, 0.0), (100.0, -100.0, 0.0), (100.0, 100.0, 0.0), (-100.0, 100.0, 0.0)]),
            PickKind::Map {
                features: vec![VectorFeature {
                    id: Some(json!(4021)),
                    properties,
                    layer: "transportation".to_string(),
                }],
            },
        ),
    );
    scene.set_role(tile, ObjectRole::Map);

    let building = scene.add_entity(
        "Duplex",
        Some(DatasetTag::named("Duplex").with_filename("duplex.ifc")),
    );
    let root = scene.objects().entity(building).map(|entity| entity.root);
    scene.add_mesh(
        root,
        "Basic Wall",
        Mesh::quad(
            corners([(-10.0, 10.0, 0.0), (10.0, 10.0, 0.0), (10.0, 10.0, 8.0), (-10.0, 10.0, 8.0)]),
            PickKind::Ifc {
                features: vec![IfcFeature {
                    item: IfcItem {
                        item_id: "1024".to_string(),
                        express_id: 1024,
                        category: Some("IFCWALLSTANDARDCASE".to_string()),
                        name: Some("Basic Wall:Exterior".to_string()),
                        global_id: Some("2O2Fr$t4X7Zf8NOew3FLOH".to_string()),
                        ..IfcItem::default()
                    },
                    properties: vec![
                        IfcProperty {
                            set_name: "Pset_WallCommon".to_string(),
                            name: "IsExternal".to_string(),
                            value: Value::Bool(true),
                        },
                        IfcProperty {
                            set_name: "Pset_WallCommon".to_string(),
                            name: "FireRating".to_string(),
                            value: json!("REI 90"),
                        },
                    ],
                }],
            },
        ),
    );
    scene.add_mesh(
        root,
        "Balcony",
        Mesh::quad(
            corners([(-5.0, 6.0, 6.0), (5.0, 6.0, 6.0), (5.0, 10.0, 6.0), (-5.0, 10.0, 6.0)]),
            PickKind::Surface,
        ),
    );
    (scene, building)
}

fn print_feature(feature: &Feature) {
    println!("要素: {} (所属 {})", feature.name, feature.parent);
    for (group, attributes) in feature.attributes.iter() {
        if attributes.is_empty() {
            continue;
        }
        println!("  [{group}]");
        for attribute in attributes {
            println!("    {} = {}", attribute.key, attribute.value);
        }
    }
}

/// 依次演示：拾取 IFC 构件与底图要素、绘制多边形标注、量测阳台净高。
pub fn run(viewer: &mut Viewer, bench: &mut Workbench) -> Result<()> {
    info!("开始脚本化演示");

    let wall = bench
        .scene
        .screen_position(Point3::new(0.0, 10.0, 4.0))
        .context("墙体不在视野内")?;
    if let Some(feature) = viewer.on_click(wall, PointerButton::Primary, &mut bench.host())? {
        print_feature(&feature);
    }
    if let Some(item) = bench.scene.selection(bench.building, SELECTION_SET) {
        println!("选择集 `{SELECTION_SET}` 包含构件 {item}");
    }

    let ground = bench
        .scene
        .screen_position(Point3::new(20.0, 0.0, 0.0))
        .context("地面不在视野内")?;
    if let Some(feature) = viewer.on_click(ground, PointerButton::Primary, &mut bench.host())? {
        print_feature(&feature);
    }

    viewer.store_mut().create_polygon();
    viewer.process_commands(&mut bench.host());
    let ticket = bench.draw.last_ticket().context("绘制工具未收到请求")?;
    let points = vec![
        Point3::new(-25.0, -10.0, 0.0),
        Point3::new(-15.0, -10.0, 0.0),
        Point3::new(-15.0, 0.0, 0.0),
        Point3::new(-25.0, 0.0, 0.0),
    ];
    bench.prompt.answer("Parking");
    if let Some(uuid) = viewer.on_draw_completed(ticket, Some(points), &mut bench.host()) {
        if let Some(shape) = viewer.annotations().shape(uuid) {
            let measurements = shape.measurements();
            println!(
                "标注 Parking: 面积 {}, 周长 {}",
                measurements
                    .area
                    .map(|area| format_area(area, Precision::Fixed(2)))
                    .unwrap_or_default(),
                measurements
                    .perimeter
                    .map(|length| format_length(length, Precision::Fixed(2)))
                    .unwrap_or_default()
            );
        }
    }

    viewer.store_mut().start_measuring();
    viewer.process_commands(&mut bench.host());
    let under_balcony = bench
        .scene
        .screen_position(Point3::new(0.0, 8.0, 0.0))
        .context("阳台下方不在视野内")?;
    if viewer.on_pointer_move(under_balcony, &mut bench.scene) {
        viewer.on_click(under_balcony, PointerButton::Primary, &mut bench.host())?;
    }
    viewer.on_key(Key::Escape, &mut bench.host());
    for measure in viewer.store().measurements.iter() {
        println!(
            "量测 {}: {}",
            measure.title,
            format_length(measure.length(), Precision::Fixed(2))
        );
    }

    info!(
        annotations = viewer.store().annotations.len(),
        measures = viewer.store().measurements.len(),
        redraws = bench.scene.redraw_count(),
        "演示完成"
    );
    Ok(())
}
