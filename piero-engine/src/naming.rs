//! 默认标题生成。

use piero_core::shape::GeometryKind;

pub const ANNOTATION_SENTINEL: &str = "Achievement unlocked: 1000 annotations with default name";
pub const MEASURE_SENTINEL: &str = "Achievement unlocked: 1000 measurements with default name";
pub const DEFAULT_MEASURE_TITLE: &str = "New measurement";

const MAX_SUFFIX: usize = 1000;

pub fn default_annotation_title(kind: GeometryKind) -> &'static str {
    match kind {
        GeometryKind::Point | GeometryKind::MultiPoint => "New point annotation",
        GeometryKind::LineString => "New line annotation",
        GeometryKind::Polygon => "New polygon annotation",
    }
}

/// 返回 `default`，若已被占用则依次尝试 `default (1)` 到 `default (999)`，全部占用时返回 `sentinel`。
pub fn resolve_title(default: &str, is_taken: impl Fn(&str) -> bool, sentinel: &str) -> String {
    if !is_taken(default) {
        return default.to_string();
    }
    (1..MAX_SUFFIX)
        .map(|index| format!("{default} ({index})"))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or_else(|| sentinel.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn first_free_suffix_is_used() {
        let taken: HashSet<String> = ["A", "A (1)", "A (3)"].iter().map(|s| s.to_string()).collect();
        let title = resolve_title("A", |t| taken.contains(t), ANNOTATION_SENTINEL);
        assert_eq!(title, "A (2)");
        assert_eq!(resolve_title("B", |t| taken.contains(t), ANNOTATION_SENTINEL), "B");
    }

    #[test]
    fn last_suffix_then_sentinel() {
        let mut taken: HashSet<String> = (1..999).map(|i| format!("A ({i})")).collect();
        taken.insert("A".to_string());
        assert_eq!(resolve_title("A", |t| taken.contains(t), MEASURE_SENTINEL), "A (999)");

        taken.insert("A (999)".to_string());
        assert_eq!(resolve_title("A", |t| taken.contains(t), MEASURE_SENTINEL), MEASURE_SENTINEL);
    }

    #[test]
    fn defaults_per_geometry() {
        assert_eq!(default_annotation_title(GeometryKind::MultiPoint), "New point annotation");
        assert_eq!(default_annotation_title(GeometryKind::Polygon), "New polygon annotation");
    }
}
