//! Small SVG chart renderer: vertical bars with an optional line overlay,
//! horizontal bars and a donut.

use std::f64::consts::PI;
use std::fmt::Write;

pub const BAR_COLOR: &str = "#1f5fd1";
pub const LINE_COLOR: &str = "#808080";

const VBAR_WIDTH: f64 = 640.0;
const VBAR_HEIGHT: f64 = 260.0;
const PAD_LEFT: f64 = 48.0;
const PAD_RIGHT: f64 = 12.0;
const PAD_TOP: f64 = 12.0;

const HBAR_WIDTH: f64 = 520.0;
const HBAR_LABEL_W: f64 = 180.0;
const HBAR_ROW: f64 = 26.0;

/// Axis label styling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisOptions {
    pub label_font_size: f64,
    /// Degrees, clockwise. Non-zero angles anchor labels at their start.
    pub label_angle: f64,
}

impl Default for AxisOptions {
    fn default() -> Self {
        Self {
            label_font_size: 11.0,
            label_angle: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bar {
    pub label: String,
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Slice {
    pub label: String,
    pub percent: f64,
    pub color: String,
}

pub fn append(out: &mut String, value: &str) {
    let _ = writeln!(out, "{}", value);
}

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Bars in the given order, with `line` drawn through the bar centers when
/// it has one value per bar.
pub fn vertical_bars(out: &mut String, bars: &[Bar], line: Option<&[f64]>, axis: &AxisOptions) {
    let line = line.filter(|values| values.len() == bars.len());
    let mut max_val = bars.iter().map(|b| b.value).max().unwrap_or(0);
    if let Some(values) = line {
        let line_max = values.iter().cloned().fold(0.0, f64::max).ceil() as i64;
        max_val = max_val.max(line_max);
    }
    let max_val = round_max_val(max_val);

    let pad_bottom = if axis.label_angle == 0.0 { 28.0 } else { 64.0 };
    let plot_w = VBAR_WIDTH - PAD_LEFT - PAD_RIGHT;
    let plot_h = VBAR_HEIGHT - PAD_TOP - pad_bottom;
    let y_of = |v: f64| PAD_TOP + plot_h - v / max_val as f64 * plot_h;
    let slot = plot_w / bars.len().max(1) as f64;
    let center = |idx: usize| PAD_LEFT + slot * (idx as f64 + 0.5);

    append(
        out,
        &format!(
            "<svg class='chart vbar' viewBox='0 0 {} {}' preserveAspectRatio='xMidYMid meet'>",
            VBAR_WIDTH, VBAR_HEIGHT
        ),
    );
    append_gridlines(out, max_val, |v| y_of(v as f64), PAD_LEFT, VBAR_WIDTH - PAD_RIGHT);

    for (idx, bar) in bars.iter().enumerate() {
        let top = y_of(bar.value as f64);
        let width = slot * 0.7;
        append(
            out,
            &format!(
                "<g><title>{}: {}</title><rect x={:.1} y={:.1} width={:.1} height={:.1} fill='{}' /></g>",
                escape(&bar.label),
                bar.value,
                center(idx) - width / 2.0,
                top,
                width,
                PAD_TOP + plot_h - top,
                BAR_COLOR
            ),
        );
        append_axis_label(out, &bar.label, center(idx), PAD_TOP + plot_h + 14.0, axis);
    }

    if let Some(values) = line {
        let points: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(idx, v)| format!("{:.1},{:.1}", center(idx), y_of(*v)))
            .collect();
        append(
            out,
            &format!(
                "<polyline class=trend fill=none stroke='{}' stroke-width=2 points='{}' />",
                LINE_COLOR,
                points.join(" ")
            ),
        );
        for (idx, v) in values.iter().enumerate() {
            append(
                out,
                &format!(
                    "<circle cx={:.1} cy={:.1} r=3 fill='{}'><title>{:.2}</title></circle>",
                    center(idx),
                    y_of(*v),
                    LINE_COLOR,
                    v
                ),
            );
        }
    }
    append(out, "</svg>");
}

/// One row per bar, longest first as given.
pub fn horizontal_bars(out: &mut String, bars: &[Bar], axis: &AxisOptions) {
    let max_val = round_max_val(bars.iter().map(|b| b.value).max().unwrap_or(0));
    let plot_w = HBAR_WIDTH - HBAR_LABEL_W - 48.0;
    let height = HBAR_ROW * bars.len() as f64 + 24.0;
    let x_of = |v: i64| HBAR_LABEL_W + v as f64 / max_val as f64 * plot_w;

    append(
        out,
        &format!(
            "<svg class='chart hbar' viewBox='0 0 {} {:.0}' preserveAspectRatio='xMidYMid meet'>",
            HBAR_WIDTH, height
        ),
    );
    for (idx, bar) in bars.iter().enumerate() {
        let y = HBAR_ROW * idx as f64 + 4.0;
        append(
            out,
            &format!(
                "<text x={:.1} y={:.1} text-anchor=end font-size={}>{}</text>",
                HBAR_LABEL_W - 6.0,
                y + HBAR_ROW / 2.0 + 2.0,
                axis.label_font_size,
                escape(&truncate(&bar.label, 28))
            ),
        );
        append(
            out,
            &format!(
                "<g><title>{}: {}</title><rect x={:.1} y={:.1} width={:.1} height={:.1} fill='{}' /></g>",
                escape(&bar.label),
                bar.value,
                HBAR_LABEL_W,
                y + 3.0,
                x_of(bar.value) - HBAR_LABEL_W,
                HBAR_ROW - 6.0,
                BAR_COLOR
            ),
        );
        append(
            out,
            &format!(
                "<text x={:.1} y={:.1} font-size={}>{}</text>",
                x_of(bar.value) + 4.0,
                y + HBAR_ROW / 2.0 + 2.0,
                axis.label_font_size,
                format_num(bar.value)
            ),
        );
    }
    append(out, "</svg>");
}

/// Ring chart, slice angles proportional to each slice's share of the total.
pub fn donut(out: &mut String, slices: &[Slice], inner_radius: f64) {
    let (cx, cy, outer) = (120.0, 120.0, 110.0);
    let total: f64 = slices.iter().map(|s| s.percent.max(0.0)).sum();

    append(
        out,
        "<svg class='chart donut' viewBox='0 0 520 240' preserveAspectRatio='xMidYMid meet'>",
    );
    if total > 0.0 {
        let mut start = 0.0;
        for slice in slices {
            let sweep = slice.percent.max(0.0) / total * 2.0 * PI;
            if sweep <= 0.0 {
                continue;
            }
            let path = if sweep >= 2.0 * PI - 1e-9 {
                ring_path(cx, cy, outer, inner_radius)
            } else {
                arc_path(cx, cy, outer, inner_radius, start, start + sweep)
            };
            append(
                out,
                &format!(
                    "<path d='{}' fill='{}' fill-rule=evenodd stroke='#ffffff'><title>{}: {:.2}%</title></path>",
                    path,
                    slice.color,
                    escape(&slice.label),
                    slice.percent
                ),
            );
            start += sweep;
        }
    }

    for (idx, slice) in slices.iter().enumerate() {
        let y = 20.0 + idx as f64 * 22.0;
        append(
            out,
            &format!(
                "<rect x=260 y={:.1} width=14 height=14 fill='{}' stroke='#cccccc' />\
                 <text x=280 y={:.1} font-size=12>{} ({:.1}%)</text>",
                y,
                slice.color,
                y + 11.0,
                escape(&truncate(&slice.label, 30)),
                slice.percent
            ),
        );
    }
    append(out, "</svg>");
}

fn append_gridlines(out: &mut String, max_val: i64, y_of: impl Fn(i64) -> f64, x1: f64, x2: f64) {
    let step = horizontal_step(max_val);
    let mut val = 0;
    while val <= max_val {
        let y = y_of(val);
        append(
            out,
            &format!(
                "<line class=hrz x1={:.1} y1={:.1} x2={:.1} y2={:.1} />\
                 <text x={:.1} y={:.1} text-anchor=end font-size=10>{}</text>",
                x1,
                y,
                x2,
                y,
                x1 - 6.0,
                y + 3.0,
                format_num(val)
            ),
        );
        val += step;
    }
}

fn append_axis_label(out: &mut String, label: &str, x: f64, y: f64, axis: &AxisOptions) {
    if axis.label_angle == 0.0 {
        append(
            out,
            &format!(
                "<text x={:.1} y={:.1} text-anchor=middle font-size={}>{}</text>",
                x,
                y,
                axis.label_font_size,
                escape(label)
            ),
        );
    } else {
        append(
            out,
            &format!(
                "<text x={:.1} y={:.1} text-anchor=start font-size={} transform='rotate({} {:.1} {:.1})'>{}</text>",
                x,
                y,
                axis.label_font_size,
                axis.label_angle,
                x,
                y,
                escape(&truncate(label, 24))
            ),
        );
    }
}

fn arc_path(cx: f64, cy: f64, outer: f64, inner: f64, from: f64, to: f64) -> String {
    let point = |r: f64, a: f64| (cx + r * a.sin(), cy - r * a.cos());
    let large = if to - from > PI { 1 } else { 0 };
    let (ox1, oy1) = point(outer, from);
    let (ox2, oy2) = point(outer, to);
    let (ix2, iy2) = point(inner, to);
    let (ix1, iy1) = point(inner, from);
    format!(
        "M{:.2},{:.2} A{},{} 0 {} 1 {:.2},{:.2} L{:.2},{:.2} A{},{} 0 {} 0 {:.2},{:.2} Z",
        ox1, oy1, outer, outer, large, ox2, oy2, ix2, iy2, inner, inner, large, ix1, iy1
    )
}

/// A closed annulus; a single arc cannot span the full circle.
fn ring_path(cx: f64, cy: f64, outer: f64, inner: f64) -> String {
    let circle = |r: f64| {
        format!(
            "M{:.2},{:.2} A{},{} 0 1 1 {:.2},{:.2} A{},{} 0 1 1 {:.2},{:.2} Z",
            cx,
            cy - r,
            r,
            r,
            cx,
            cy + r,
            r,
            r,
            cx,
            cy - r
        )
    };
    format!("{} {}", circle(outer), circle(inner))
}

fn truncate(label: &str, max_chars: usize) -> String {
    if label.chars().count() <= max_chars {
        return label.to_string();
    }
    let mut out: String = label.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

fn round_max_val(max_val: i64) -> i64 {
    match max_val {
        v if v >= 200_000 => round_to(v, 100_000),
        v if v >= 20_000 => round_to(v, 10_000),
        v if v >= 2_000 => round_to(v, 1_000),
        v if v >= 200 => round_to(v, 100),
        v if v >= 20 => round_to(v, 10),
        v if v >= 1 => round_to(v, 5),
        _ => 5,
    }
}

fn round_to(n: i64, m: i64) -> i64 {
    ((n - 1) / m + 1) * m
}

fn horizontal_step(max_val: i64) -> i64 {
    match max_val {
        v if v >= 600_000 => 200_000,
        v if v >= 300_000 => 100_000,
        v if v >= 100_000 => 50_000,
        v if v >= 60_000 => 20_000,
        v if v >= 30_000 => 10_000,
        v if v >= 10_000 => 5_000,
        v if v >= 6_000 => 2_000,
        v if v >= 3_000 => 1_000,
        v if v >= 1_000 => 500,
        v if v >= 600 => 200,
        v if v >= 300 => 100,
        v if v >= 100 => 50,
        v if v >= 60 => 20,
        v if v >= 30 => 10,
        v if v >= 10 => 5,
        _ => 1,
    }
}

pub fn format_num(n: i64) -> String {
    if n >= 10_000_000 {
        return trim_trailing_zero(format!("{:.0}M", n as f64 / 1_000_000.0));
    }
    if n >= 1_000_000 {
        return trim_trailing_zero(format!("{:.1}M", n as f64 / 1_000_000.0));
    }
    if n >= 10_000 {
        return trim_trailing_zero(format!("{:.0}K", n as f64 / 1_000.0));
    }
    if n >= 1_000 {
        return trim_trailing_zero(format!("{:.1}K", n as f64 / 1_000.0));
    }
    n.to_string()
}

fn trim_trailing_zero(s: String) -> String {
    s.replace(".0M", "M").replace(".0K", "K")
}

/// `12345` as `12.345`, the way the page's pt-BR audience groups digits.
pub fn format_thousands(n: i64) -> String {
    let s = n.abs().to_string();
    let mut result = String::new();
    if n < 0 {
        result.push('-');
    }
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push('.');
        }
        result.push(c);
    }
    result
}
