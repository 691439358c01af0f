//! Web Mercator tile math for the radar backdrop.

use std::collections::HashMap;
use std::f64::consts::PI;

use coatcheck_core::MapConfig;

/// Edge length of a map tile in pixels.
pub const TILE_SIZE: i64 = 256;

/// Fractional tile position of a point at a zoom level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePosition {
    pub zoom: u8,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

/// Project a latitude/longitude onto the slippy-map tile grid.
pub fn lat_lon_to_tile(lat: f64, lon: f64, zoom: u8) -> TilePosition {
    let n = tiles_per_side(zoom) as f64;
    let lat_rad = lat.to_radians();
    let x = (lon + 180.0) / 360.0 * n;
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;
    TilePosition { zoom, x, y }
}

fn tiles_per_side(zoom: u8) -> i64 {
    1i64 << zoom.min(30)
}

impl TilePosition {
    /// The tile containing this position.
    pub fn floor(&self) -> TileCoord {
        let n = tiles_per_side(self.zoom);
        let x = (self.x.floor() as i64).rem_euclid(n);
        let y = (self.y.floor() as i64).clamp(0, n - 1);
        TileCoord {
            zoom: self.zoom,
            x: x as u32,
            y: y as u32,
        }
    }
}

/// One tile of a grid, with its pixel offset from the grid center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridCell {
    pub coord: TileCoord,
    pub offset_x: i64,
    pub offset_y: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    pub center: TileCoord,
    pub cells: Vec<GridCell>,
}

impl TileGrid {
    /// Tiles within `width / 2` columns and `height / 2` rows of `center`.
    ///
    /// Columns wrap around the antimeridian; rows past the poles are left out.
    /// A grid wider than the world holds each column once, at the offset
    /// nearest the center.
    pub fn centered(center: TileCoord, width: u32, height: u32) -> Self {
        let n = tiles_per_side(center.zoom);
        let half_w = i64::from(width / 2);
        let half_h = i64::from(height / 2);

        let column = |dx: i64| (i64::from(center.x) + dx).rem_euclid(n);
        let mut nearest: HashMap<i64, i64> = HashMap::new();
        for dx in -half_w..=half_w {
            nearest
                .entry(column(dx))
                .and_modify(|best| {
                    if (dx.abs(), dx) < (best.abs(), *best) {
                        *best = dx;
                    }
                })
                .or_insert(dx);
        }

        let mut cells = Vec::new();
        for dx in -half_w..=half_w {
            if nearest.get(&column(dx)) != Some(&dx) {
                continue;
            }
            for dy in -half_h..=half_h {
                let y = i64::from(center.y) + dy;
                if !(0..n).contains(&y) {
                    continue;
                }
                let x = column(dx);
                cells.push(GridCell {
                    coord: TileCoord {
                        zoom: center.zoom,
                        x: x as u32,
                        y: y as u32,
                    },
                    offset_x: dx * TILE_SIZE,
                    offset_y: dy * TILE_SIZE,
                });
            }
        }

        Self { center, cells }
    }

    /// Grid around a location using the configured zoom and dimensions.
    pub fn for_location(map: &MapConfig, latitude: f64, longitude: f64) -> Self {
        let center = lat_lon_to_tile(latitude, longitude, map.zoom).floor();
        Self::centered(center, map.grid_width, map.grid_height)
    }
}

/// URL templates with `{z}`, `{x}`, `{y}` and `{key}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileTemplates {
    pub base: String,
    pub precipitation: String,
    pub api_key: Option<String>,
}

impl TileTemplates {
    pub fn from_config(map: &MapConfig) -> Self {
        Self {
            base: map.base_tile_url.clone(),
            precipitation: map.precipitation_tile_url.clone(),
            api_key: map.owm_api_key.clone().filter(|k| !k.is_empty()),
        }
    }

    pub fn base_url(&self, coord: TileCoord) -> String {
        render(&self.base, coord, "")
    }

    /// `None` without an API key; the overlay provider rejects keyless requests.
    pub fn precipitation_url(&self, coord: TileCoord) -> Option<String> {
        let key = self.api_key.as_deref()?;
        Some(render(&self.precipitation, coord, key))
    }

    /// Every URL a grid needs, base tiles first.
    pub fn urls(&self, grid: &TileGrid) -> Vec<String> {
        let mut urls: Vec<String> = grid.cells.iter().map(|c| self.base_url(c.coord)).collect();
        urls.extend(grid.cells.iter().filter_map(|c| self.precipitation_url(c.coord)));
        urls
    }
}

fn render(template: &str, coord: TileCoord, key: &str) -> String {
    template
        .replace("{z}", &coord.zoom.to_string())
        .replace("{x}", &coord.x.to_string())
        .replace("{y}", &coord.y.to_string())
        .replace("{key}", key)
}
