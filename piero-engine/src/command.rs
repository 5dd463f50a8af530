use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use geojson::FeatureCollection;
use piero_config::AnnotationMode;
use piero_core::shape::GeometryKind;
use piero_io::{ExportContext, FeatureLoader, FeatureSaver, ImportOutcome, ImportSource};
use tracing::warn;
use uuid::Uuid;

use crate::annotation::AnnotationSession;
use crate::host::Host;
use crate::measurement::MeasurementSession;
use crate::store::Store;

/// 界面发布到存储的命令，由 [`CommandBus`] 按到达顺序分发。
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateAnnotation(GeometryKind),
    EditAnnotation(Uuid),
    StopEdition,
    RemoveAnnotation(Uuid),
    SetAnnotationVisible { uuid: Uuid, visible: bool },
    SetShowLabels(bool),
    SetAnnotationMode(AnnotationMode),
    ImportAnnotations(Vec<ImportSource>),
    ExportAnnotations(PathBuf),
    StartMeasuring,
    StopMeasuring,
    RemoveMeasure(Uuid),
    SetMeasureVisible { uuid: Uuid, visible: bool },
    ImportMeasures(Vec<ImportSource>),
    ExportMeasures(PathBuf),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateAnnotation(_) => "create_annotation",
            Command::EditAnnotation(_) => "edit_annotation",
            Command::StopEdition => "stop_edition",
            Command::RemoveAnnotation(_) => "remove_annotation",
            Command::SetAnnotationVisible { .. } => "set_annotation_visible",
            Command::SetShowLabels(_) => "set_show_labels",
            Command::SetAnnotationMode(_) => "set_annotation_mode",
            Command::ImportAnnotations(_) => "import_annotations",
            Command::ExportAnnotations(_) => "export_annotations",
            Command::StartMeasuring => "start_measuring",
            Command::StopMeasuring => "stop_measuring",
            Command::RemoveMeasure(_) => "remove_measure",
            Command::SetMeasureVisible { .. } => "set_measure_visible",
            Command::ImportMeasures(_) => "import_measures",
            Command::ExportMeasures(_) => "export_measures",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse;
}

/// 命令执行所需的会话、存储与外部协作者。
pub struct CommandContext<'a, 'h> {
    pub store: &'a mut Store,
    pub annotations: &'a mut AnnotationSession,
    pub measurements: &'a mut MeasurementSession,
    pub loader: &'a dyn FeatureLoader,
    pub saver: &'a dyn FeatureSaver,
    pub base_url: &'a str,
    pub host: &'a mut Host<'h>,
}

impl CommandContext<'_, '_> {
    fn save(&self, collection: &FeatureCollection, path: &Path, noun: &str) -> CommandResponse {
        match self.saver.save(collection, path) {
            Ok(()) => CommandResponse::ok(format!(
                "已导出 {} 条{noun}到 {}",
                collection.features.len(),
                path.display()
            )),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "导出失败");
                CommandResponse::err(format!("导出失败: {err}"))
            }
        }
    }
}

fn import_response(outcome: &ImportOutcome, noun: &str) -> CommandResponse {
    let message = format!(
        "导入 {} 条{noun}，跳过 {} 条，失败 {} 条",
        outcome.imported,
        outcome.skipped,
        outcome.errors.len()
    );
    if outcome.has_errors() {
        CommandResponse::err(message)
    } else {
        CommandResponse::ok(message)
    }
}

pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(CreateAnnotationCommand);
        bus.register(EditAnnotationCommand);
        bus.register(StopEditionCommand);
        bus.register(RemoveAnnotationCommand);
        bus.register(SetAnnotationVisibleCommand);
        bus.register(SetShowLabelsCommand);
        bus.register(SetAnnotationModeCommand);
        bus.register(ImportAnnotationsCommand);
        bus.register(ExportAnnotationsCommand);
        bus.register(StartMeasuringCommand);
        bus.register(StopMeasuringCommand);
        bus.register(RemoveMeasureCommand);
        bus.register(SetMeasureVisibleCommand);
        bus.register(ImportMeasuresCommand);
        bus.register(ExportMeasuresCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        if let Some(handler) = self.handlers.get(command.name()) {
            handler.execute(command, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", command.name()))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

struct CreateAnnotationCommand;

impl CommandHandler for CreateAnnotationCommand {
    fn name(&self) -> &'static str {
        "create_annotation"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::CreateAnnotation(kind) = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        // 绘制与量测互斥
        context
            .measurements
            .stop(&mut context.store.measurements, context.host.scene);
        context
            .annotations
            .begin_draw(*kind, &mut context.store.annotations, context.host);
        CommandResponse::ok(format!("开始绘制 {kind}"))
    }
}

struct EditAnnotationCommand;

impl CommandHandler for EditAnnotationCommand {
    fn name(&self) -> &'static str {
        "edit_annotation"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::EditAnnotation(uuid) = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        context
            .measurements
            .stop(&mut context.store.measurements, context.host.scene);
        match context
            .annotations
            .edit(*uuid, &mut context.store.annotations, context.host)
        {
            Ok(()) => CommandResponse::ok("进入编辑模式"),
            Err(err) => {
                warn!(%uuid, error = %err, "无法编辑标注");
                CommandResponse::err(err.to_string())
            }
        }
    }
}

struct StopEditionCommand;

impl CommandHandler for StopEditionCommand {
    fn name(&self) -> &'static str {
        "stop_edition"
    }

    fn execute(&self, _command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        match context
            .annotations
            .stop_edition(false, &mut context.store.annotations, context.host)
        {
            Some(_) => CommandResponse::ok("已退出编辑"),
            None => CommandResponse::ok("当前没有编辑中的标注"),
        }
    }
}

struct RemoveAnnotationCommand;

impl CommandHandler for RemoveAnnotationCommand {
    fn name(&self) -> &'static str {
        "remove_annotation"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::RemoveAnnotation(uuid) = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        match context
            .annotations
            .remove(*uuid, &mut context.store.annotations, context.host)
        {
            Ok(()) => CommandResponse::ok("标注已删除"),
            Err(err) => {
                warn!(%uuid, error = %err, "无法删除标注");
                CommandResponse::err(err.to_string())
            }
        }
    }
}

struct SetAnnotationVisibleCommand;

impl CommandHandler for SetAnnotationVisibleCommand {
    fn name(&self) -> &'static str {
        "set_annotation_visible"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::SetAnnotationVisible { uuid, visible } = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        match context.annotations.set_visible(
            *uuid,
            *visible,
            &mut context.store.annotations,
            context.host.scene,
        ) {
            Ok(()) => CommandResponse::ok(if *visible { "标注已显示" } else { "标注已隐藏" }),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

struct SetShowLabelsCommand;

impl CommandHandler for SetShowLabelsCommand {
    fn name(&self) -> &'static str {
        "set_show_labels"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::SetShowLabels(show) = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        context
            .annotations
            .set_show_labels(*show, &mut context.store.annotations, context.host.scene);
        CommandResponse::ok(if *show { "标签已显示" } else { "标签已隐藏" })
    }
}

struct SetAnnotationModeCommand;

impl CommandHandler for SetAnnotationModeCommand {
    fn name(&self) -> &'static str {
        "set_annotation_mode"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::SetAnnotationMode(mode) = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        context.store.annotations.set_mode(*mode);
        CommandResponse::ok(format!("拾取模式: {mode:?}"))
    }
}

struct ImportAnnotationsCommand;

impl CommandHandler for ImportAnnotationsCommand {
    fn name(&self) -> &'static str {
        "import_annotations"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::ImportAnnotations(sources) = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        let outcome = context.annotations.import(
            context.loader,
            sources,
            &mut context.store.annotations,
            context.host,
        );
        import_response(&outcome, "标注")
    }
}

struct ExportAnnotationsCommand;

impl CommandHandler for ExportAnnotationsCommand {
    fn name(&self) -> &'static str {
        "export_annotations"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::ExportAnnotations(path) = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        let export = ExportContext {
            base_url: context.base_url,
            frame: context.host.scene.reference_frame(),
            updated: Utc::now(),
        };
        let collection = context.annotations.export(&context.store.annotations, &export);
        context.save(&collection, path, "标注")
    }
}

struct StartMeasuringCommand;

impl CommandHandler for StartMeasuringCommand {
    fn name(&self) -> &'static str {
        "start_measuring"
    }

    fn execute(&self, _command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        context
            .annotations
            .cancel_draw(&mut context.store.annotations, context.host);
        context
            .annotations
            .stop_edition(false, &mut context.store.annotations, context.host);
        context.measurements.start(&mut context.store.measurements);
        CommandResponse::ok("开始量测")
    }
}

struct StopMeasuringCommand;

impl CommandHandler for StopMeasuringCommand {
    fn name(&self) -> &'static str {
        "stop_measuring"
    }

    fn execute(&self, _command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        context
            .measurements
            .stop(&mut context.store.measurements, context.host.scene);
        CommandResponse::ok("量测已结束")
    }
}

struct RemoveMeasureCommand;

impl CommandHandler for RemoveMeasureCommand {
    fn name(&self) -> &'static str {
        "remove_measure"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::RemoveMeasure(uuid) = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        match context
            .measurements
            .remove(*uuid, &mut context.store.measurements, context.host.scene)
        {
            Ok(()) => CommandResponse::ok("量测已删除"),
            Err(err) => {
                warn!(%uuid, error = %err, "无法删除量测");
                CommandResponse::err(err.to_string())
            }
        }
    }
}

struct SetMeasureVisibleCommand;

impl CommandHandler for SetMeasureVisibleCommand {
    fn name(&self) -> &'static str {
        "set_measure_visible"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::SetMeasureVisible { uuid, visible } = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        match context.measurements.set_visible(
            *uuid,
            *visible,
            &mut context.store.measurements,
            context.host.scene,
        ) {
            Ok(()) => CommandResponse::ok(if *visible { "量测已显示" } else { "量测已隐藏" }),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

struct ImportMeasuresCommand;

impl CommandHandler for ImportMeasuresCommand {
    fn name(&self) -> &'static str {
        "import_measures"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::ImportMeasures(sources) = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        let outcome = context.measurements.import(
            context.loader,
            sources,
            &mut context.store.measurements,
            context.host,
        );
        import_response(&outcome, "量测")
    }
}

struct ExportMeasuresCommand;

impl CommandHandler for ExportMeasuresCommand {
    fn name(&self) -> &'static str {
        "export_measures"
    }

    fn execute(&self, command: &Command, context: &mut CommandContext<'_, '_>) -> CommandResponse {
        let Command::ExportMeasures(path) = command else {
            return CommandResponse::err("命令参数不匹配");
        };
        let export = ExportContext {
            base_url: context.base_url,
            frame: context.host.scene.reference_frame(),
            updated: Utc::now(),
        };
        let collection = context.measurements.export(&context.store.measurements, &export);
        context.save(&collection, path, "量测")
    }
}
