//! Choropleth of open requests per neighborhood, drawn from WKT polygons.

use crate::aggregate::NeighborhoodCount;
use crate::chart::{append, escape};
use geo::{BoundingRect, Coord, LineString, MultiPolygon, Rect};
use wkt::TryFromWkt;

const MAP_WIDTH: f64 = 480.0;
const MAP_HEIGHT: f64 = 380.0;
const MAP_PAD: f64 = 10.0;
const LEGEND_HEIGHT: f64 = 44.0;

/// Sequential "Blues" scale, lightest to darkest.
const BLUES: [(u8, u8, u8); 9] = [
    (247, 251, 255),
    (222, 235, 247),
    (198, 219, 239),
    (158, 202, 225),
    (107, 174, 214),
    (66, 146, 198),
    (33, 113, 181),
    (8, 81, 156),
    (8, 48, 107),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChoroplethStats {
    pub drawn: usize,
    pub skipped: usize,
}

/// Parses a WKT polygon or multipolygon. Other geometry kinds yield `None`.
pub fn parse_multipolygon(wkt: &str) -> Option<MultiPolygon<f64>> {
    match geo::Geometry::<f64>::try_from_wkt_str(wkt).ok()? {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Color for `t` in `[0, 1]`, interpolated between the scale's stops.
pub fn blues(t: f64) -> String {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let pos = t * (BLUES.len() - 1) as f64;
    let idx = (pos.floor() as usize).min(BLUES.len() - 2);
    let frac = pos - idx as f64;
    let (a, b) = (BLUES[idx], BLUES[idx + 1]);
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * frac).round() as u8;
    format!("#{:02x}{:02x}{:02x}", mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

struct Shape<'a> {
    name: &'a str,
    count: i64,
    geometry: MultiPolygon<f64>,
    bounds: Rect<f64>,
}

/// Draws every neighborhood with a parseable geometry, shaded by count.
pub fn choropleth(out: &mut String, counts: &[NeighborhoodCount]) -> ChoroplethStats {
    let mut stats = ChoroplethStats::default();
    let mut shapes = Vec::new();
    for entry in counts {
        let parsed = entry
            .geometry
            .as_deref()
            .and_then(parse_multipolygon)
            .and_then(|g| g.bounding_rect().map(|bounds| (g, bounds)));
        match parsed {
            Some((geometry, bounds)) => shapes.push(Shape {
                name: &entry.name,
                count: entry.count,
                geometry,
                bounds,
            }),
            None => {
                log::warn!("no usable geometry for neighborhood {}", entry.name);
                stats.skipped += 1;
            }
        }
    }

    let Some(bounds) = shapes.iter().map(|s| s.bounds).reduce(union) else {
        return stats;
    };
    let project = projection(bounds);
    let min = shapes.iter().map(|s| s.count).min().unwrap_or(0);
    let max = shapes.iter().map(|s| s.count).max().unwrap_or(0);
    let shade = |count: i64| {
        if max == min {
            blues(1.0)
        } else {
            blues((count - min) as f64 / (max - min) as f64)
        }
    };

    append(
        out,
        &format!(
            "<svg class='chart map' viewBox='0 0 {} {}' preserveAspectRatio='xMidYMid meet'>",
            MAP_WIDTH,
            MAP_HEIGHT + LEGEND_HEIGHT
        ),
    );
    for shape in &shapes {
        append(
            out,
            &format!(
                "<path d='{}' fill='{}' fill-rule=evenodd stroke='#000000' stroke-width=0.5>\
                 <title>{}: {}</title></path>",
                path_data(&shape.geometry, &project),
                shade(shape.count),
                escape(shape.name),
                shape.count
            ),
        );
        stats.drawn += 1;
    }
    append_legend(out, min, max);
    append(out, "</svg>");
    stats
}

fn union(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

/// Equirectangular fit of `bounds` into the map area, north up.
fn projection(bounds: Rect<f64>) -> impl Fn(Coord<f64>) -> (f64, f64) {
    let x_scale = bounds.center().y.to_radians().cos().abs().max(0.01);
    let span_x = (bounds.width() * x_scale).max(f64::EPSILON);
    let span_y = bounds.height().max(f64::EPSILON);
    let scale = ((MAP_WIDTH - 2.0 * MAP_PAD) / span_x).min((MAP_HEIGHT - 2.0 * MAP_PAD) / span_y);
    let off_x = (MAP_WIDTH - span_x * scale) / 2.0;
    let off_y = (MAP_HEIGHT - span_y * scale) / 2.0;
    let (min_x, max_y) = (bounds.min().x, bounds.max().y);
    move |c| {
        (
            off_x + (c.x - min_x) * x_scale * scale,
            off_y + (max_y - c.y) * scale,
        )
    }
}

fn path_data(geometry: &MultiPolygon<f64>, project: &impl Fn(Coord<f64>) -> (f64, f64)) -> String {
    let mut d = String::new();
    for polygon in geometry.0.iter() {
        ring(&mut d, polygon.exterior(), project);
        for interior in polygon.interiors() {
            ring(&mut d, interior, project);
        }
    }
    d.trim_end().to_string()
}

fn ring(d: &mut String, line: &LineString<f64>, project: &impl Fn(Coord<f64>) -> (f64, f64)) {
    for (idx, coord) in line.coords().enumerate() {
        let (x, y) = project(*coord);
        d.push_str(&format!("{}{:.1},{:.1} ", if idx == 0 { 'M' } else { 'L' }, x, y));
    }
    if line.coords().next().is_some() {
        d.push_str("Z ");
    }
}

fn append_legend(out: &mut String, min: i64, max: i64) {
    let y = MAP_HEIGHT + 6.0;
    let width = MAP_WIDTH - 2.0 * MAP_PAD;
    append(out, "<defs><linearGradient id=blues x1=0 x2=1 y1=0 y2=0>");
    for idx in 0..BLUES.len() {
        let t = idx as f64 / (BLUES.len() - 1) as f64;
        append(
            out,
            &format!("<stop offset='{:.3}' stop-color='{}' />", t, blues(t)),
        );
    }
    append(out, "</linearGradient></defs>");
    append(
        out,
        &format!(
            "<rect x={} y={:.1} width={:.1} height=12 fill='url(#blues)' stroke='#000000' stroke-width=0.5 />",
            MAP_PAD, y, width
        ),
    );
    append(
        out,
        &format!(
            "<text x={} y={:.1} font-size=11>{}</text>\
             <text x={:.1} y={:.1} font-size=11 text-anchor=middle>Quantidade</text>\
             <text x={:.1} y={:.1} font-size=11 text-anchor=end>{}</text>",
            MAP_PAD,
            y + 26.0,
            min,
            MAP_WIDTH / 2.0,
            y + 26.0,
            MAP_WIDTH - MAP_PAD,
            y + 26.0,
            max
        ),
    );
}
