//! 长度与面积的单位换算及格式化。

const LENGTH_THRESHOLD: f64 = 1_000.0;
const AREA_THRESHOLD: f64 = 1_000_000.0;

/// 数值的小数位策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// 固定小数位数。
    Fixed(usize),
    /// 最多保留若干位小数，去掉末尾的零。
    AtMost(usize),
}

/// 超过 1000 m 时切换到 km。
pub fn scale_length(meters: f64) -> (f64, &'static str) {
    if meters > LENGTH_THRESHOLD {
        (meters / LENGTH_THRESHOLD, "km")
    } else {
        (meters, "m")
    }
}

/// 超过 1 000 000 m² 时切换到 km²。
pub fn scale_area(square_meters: f64) -> (f64, &'static str) {
    if square_meters > AREA_THRESHOLD {
        (square_meters / AREA_THRESHOLD, "km²")
    } else {
        (square_meters, "m²")
    }
}

pub fn format_number(value: f64, precision: Precision) -> String {
    match precision {
        Precision::Fixed(digits) => format!("{value:.digits$}"),
        Precision::AtMost(digits) => {
            let fixed = format!("{value:.digits$}");
            let trimmed = if fixed.contains('.') {
                fixed.trim_end_matches('0').trim_end_matches('.')
            } else {
                fixed.as_str()
            };
            if trimmed == "-0" {
                "0".to_string()
            } else {
                trimmed.to_string()
            }
        }
    }
}

pub fn format_length(meters: f64, precision: Precision) -> String {
    let (value, unit) = scale_length(meters);
    format!("{} {unit}", format_number(value, precision))
}

pub fn format_area(square_meters: f64, precision: Precision) -> String {
    let (value, unit) = scale_area(square_meters);
    format!("{} {unit}", format_number(value, precision))
}
