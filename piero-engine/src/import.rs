//! 标注与量测共用的 GeoJSON 批量导入流程。

use geojson::Feature;
use piero_io::{FeatureLoader, ImportOutcome, ImportSource, IoError};
use tracing::{info, warn};

use crate::host::{Notification, NotificationLevel, NotificationSink};

/// 导入结果通知使用的标题与记录名词。
#[derive(Debug, Clone, Copy)]
pub struct ImportReport {
    pub title: &'static str,
    pub noun: &'static str,
}

pub const ANNOTATION_REPORT: ImportReport = ImportReport {
    title: "Annotations",
    noun: "annotations",
};

pub const MEASURE_REPORT: ImportReport = ImportReport {
    title: "Measures",
    noun: "measures",
};

/// 导入单个来源。`import` 返回 `Ok(false)` 表示要素被跳过；单个要素失败只记入错误列表。
pub fn import_source(
    loader: &dyn FeatureLoader,
    source: &ImportSource,
    mut import: impl FnMut(&Feature) -> Result<bool, IoError>,
) -> Result<ImportOutcome, IoError> {
    let features = loader.load(source)?;
    let mut outcome = ImportOutcome::default();
    for feature in &features {
        match import(feature) {
            Ok(true) => outcome.imported += 1,
            Ok(false) => outcome.skipped += 1,
            Err(err) => {
                warn!(source = %source.name(), error = %err, "要素导入失败");
                outcome.errors.push(err.to_string());
            }
        }
    }
    Ok(outcome)
}

/// 多个来源互不影响；文件级失败以 `"{name}: {error}"` 记入汇总。
pub fn import_batch(
    loader: &dyn FeatureLoader,
    sources: &[ImportSource],
    mut import: impl FnMut(&Feature) -> Result<bool, IoError>,
) -> ImportOutcome {
    let mut total = ImportOutcome::default();
    for source in sources {
        match import_source(loader, source, &mut import) {
            Ok(outcome) => total.merge(outcome),
            Err(err) => {
                warn!(source = %source.name(), error = %err, "文件导入失败");
                total.errors.push(format!("{}: {err}", source.name()));
            }
        }
    }
    total
}

fn summary(report: ImportReport, outcome: &ImportOutcome) -> Notification {
    let mut text = format!(
        "{} {} imported ({} skipped)",
        outcome.imported, report.noun, outcome.skipped
    );
    if outcome.has_errors() {
        text.push_str(&format!(
            "; {} errors: {}",
            outcome.errors.len(),
            outcome.errors.join(", ")
        ));
        Notification::new(report.title, text, NotificationLevel::Warning)
    } else {
        Notification::new(report.title, text, NotificationLevel::Success)
    }
}

/// 执行导入并推送结果通知。单文件读取或解析失败时只报告该错误。
pub fn run_import(
    loader: &dyn FeatureLoader,
    sources: &[ImportSource],
    report: ImportReport,
    notifications: &mut dyn NotificationSink,
    import: impl FnMut(&Feature) -> Result<bool, IoError>,
) -> ImportOutcome {
    let outcome = match sources {
        [source] => match import_source(loader, source, import) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(source = %source.name(), error = %err, "文件导入失败");
                notifications.push(Notification::new(
                    report.title,
                    format!("Could not import file: {err}"),
                    NotificationLevel::Warning,
                ));
                return ImportOutcome {
                    errors: vec![err.to_string()],
                    ..ImportOutcome::default()
                };
            }
        },
        _ => import_batch(loader, sources, import),
    };
    info!(
        imported = outcome.imported,
        skipped = outcome.skipped,
        errors = outcome.errors.len(),
        "{} 导入完成",
        report.noun
    );
    notifications.push(summary(report, &outcome));
    outcome
}

#[cfg(test)]
mod tests {
    use piero_io::GeoJsonFacade;

    use super::*;
    use crate::host::NotificationLog;

    fn text(name: &str, contents: &str) -> ImportSource {
        ImportSource::Text {
            name: name.to_string(),
            contents: contents.to_string(),
        }
    }

    const TWO_POINTS: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","geometry":{"type":"Point","coordinates":[0,0]},"properties":{"title":"a"}},
        {"type":"Feature","geometry":{"type":"Point","coordinates":[1,1]},"properties":{"title":"b"}}
    ]}"#;

    #[test]
    fn one_failing_file_does_not_abort_the_batch() {
        let sources = [text("good.geojson", TWO_POINTS), text("bad.geojson", "{not json")];
        let outcome = import_batch(&GeoJsonFacade::new(), &sources, |_| Ok(true));
        assert_eq!(outcome.imported, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("bad.geojson: "));
    }

    #[test]
    fn feature_errors_and_skips_are_counted() {
        let mut log = NotificationLog::new();
        let mut calls = 0;
        let outcome = run_import(
            &GeoJsonFacade::new(),
            &[text("two.geojson", TWO_POINTS)],
            ANNOTATION_REPORT,
            &mut log,
            |_| {
                calls += 1;
                if calls == 1 {
                    Ok(false)
                } else {
                    Err(IoError::UnsupportedGeometry("Polygon".to_string()))
                }
            },
        );
        assert_eq!((outcome.imported, outcome.skipped), (0, 1));
        let last = log.last().expect("应有通知");
        assert_eq!(last.level, NotificationLevel::Warning);
        assert_eq!(
            last.text,
            "0 annotations imported (1 skipped); 1 errors: Cannot import geometry type Polygon"
        );
    }

    #[test]
    fn unreadable_single_file_reports_failure() {
        let mut log = NotificationLog::new();
        let outcome = run_import(
            &GeoJsonFacade::new(),
            &[text("bad.geojson", "[]")],
            MEASURE_REPORT,
            &mut log,
            |_| Ok(true),
        );
        assert_eq!(outcome.imported, 0);
        let last = log.last().expect("应有通知");
        assert_eq!(last.title, "Measures");
        assert!(last.text.starts_with("Could not import file: "));
    }

    #[test]
    fn successful_import_notification() {
        let mut log = NotificationLog::new();
        run_import(
            &GeoJsonFacade::new(),
            &[text("two.geojson", TWO_POINTS)],
            MEASURE_REPORT,
            &mut log,
            |_| Ok(true),
        );
        let last = log.last().expect("应有通知");
        assert_eq!(last.level, NotificationLevel::Success);
        assert_eq!(last.text, "2 measures imported (0 skipped)");
    }
}
