//! Spatial layer - bounding-box and radius search over curve indexes
//!
//! Spatial indexes store one entry per record keyed by a Morton code:
//! coordinates quantized onto a 65536 x 65536 grid over the index's
//! configured world bounds, bits interleaved. Queries produce covering
//! cell ranges through a [`CoveringSource`], scan each range, and then
//! **always** re-verify the record's actual coordinates: space-filling
//! curves over-approximate, so the scan alone yields false positives.

use crate::cursor::{ExecutionContext, RecordCursor};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::kv::KvRead;
use crate::record::RecordAccess;
use crate::schema::{Index, IndexKind, IndexState, SpatialOptions};
use crate::store::{as_f64, index_subspace, record_type_subspace};
use crate::tuple::TupleElement;
use serde::{Deserialize, Serialize};
use tracing::trace;

const GRID_BITS: u32 = 16;
const GRID_MAX: u32 = (1 << GRID_BITS) - 1;

/// Axis-aligned query box; `z` bounds apply only to 3D data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum x (longitude for WGS84)
    pub min_x: f64,
    /// Minimum y (latitude for WGS84)
    pub min_y: f64,
    /// Maximum x
    pub max_x: f64,
    /// Maximum y
    pub max_y: f64,
    /// Optional z bounds
    pub z: Option<(f64, f64)>,
}

impl BoundingBox {
    /// 2D box from corners
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y, z: None }
    }

    /// Whether a point lies inside (inclusive)
    pub fn contains(&self, x: f64, y: f64, z: Option<f64>) -> bool {
        if !(x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y) {
            return false;
        }
        match (self.z, z) {
            (Some((lo, hi)), Some(pz)) => pz >= lo && pz <= hi,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// A spatial query region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpatialQuery {
    /// Everything inside a bounding box
    Box(BoundingBox),
    /// Everything within `radius` of a center point, in coordinate units
    Radius {
        /// Center x
        x: f64,
        /// Center y
        y: f64,
        /// Search radius
        radius: f64,
    },
}

impl SpatialQuery {
    /// Bounding box enclosing the query region
    pub fn bounding_box(&self) -> BoundingBox {
        match self {
            SpatialQuery::Box(b) => b.clone(),
            SpatialQuery::Radius { x, y, radius } => {
                BoundingBox::new(x - radius, y - radius, x + radius, y + radius)
            }
        }
    }

    /// Exact membership test against actual coordinates
    pub fn verify(&self, x: f64, y: f64, z: Option<f64>) -> bool {
        match self {
            SpatialQuery::Box(b) => b.contains(x, y, z),
            SpatialQuery::Radius { x: cx, y: cy, radius } => {
                let dx = x - cx;
                let dy = y - cy;
                dx * dx + dy * dy <= radius * radius
            }
        }
    }
}

/// Inclusive range of Morton codes
pub type CellRange = (i64, i64);

/// Producer of covering cell ranges for a query box
///
/// The built-in [`MortonCoverer`] handles Cartesian grids; geographic
/// data can plug in an S2-style coverer through this trait.
pub trait CoveringSource: Send + Sync {
    /// Cell ranges that together cover `bbox`, at most `budget` of them
    fn covering(&self, bbox: &BoundingBox, budget: usize, options: &SpatialOptions)
    -> Vec<CellRange>;
}

/// Z-order covering over the quantization grid
#[derive(Debug, Clone, Copy, Default)]
pub struct MortonCoverer;

impl CoveringSource for MortonCoverer {
    fn covering(
        &self,
        bbox: &BoundingBox,
        budget: usize,
        options: &SpatialOptions,
    ) -> Vec<CellRange> {
        let budget = budget.max(1);
        let (gx0, gy0) = quantize(bbox.min_x, bbox.min_y, &options.bounds);
        let (gx1, gy1) = quantize(bbox.max_x, bbox.max_y, &options.bounds);

        // finest level whose covering stays within budget
        let mut shift = 0u32;
        loop {
            let cols = (gx1 >> shift) - (gx0 >> shift) + 1;
            let rows = (gy1 >> shift) - (gy0 >> shift) + 1;
            if (cols as u64) * (rows as u64) <= budget as u64 || shift == GRID_BITS {
                break;
            }
            shift += 1;
        }

        let mut ranges = Vec::new();
        for i in (gx0 >> shift)..=(gx1 >> shift) {
            for j in (gy0 >> shift)..=(gy1 >> shift) {
                let base = morton_interleave(i << shift, j << shift) as i64;
                let span = 1i64 << (2 * shift);
                ranges.push((base, base + span - 1));
            }
        }
        merge_ranges(ranges)
    }
}

/// Coalesce overlapping or adjacent cell ranges
pub fn merge_ranges(mut ranges: Vec<CellRange>) -> Vec<CellRange> {
    if ranges.is_empty() {
        return ranges;
    }
    ranges.sort_by_key(|r| r.0);
    let mut merged: Vec<CellRange> = Vec::with_capacity(ranges.len());
    for (begin, end) in ranges {
        match merged.last_mut() {
            Some((_, last_end)) if *last_end >= begin.saturating_sub(1) => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((begin, end)),
        }
    }
    merged
}

/// Grid divisions per axis used to size radius-query cell budgets. One
/// budget cell is 1/256th of the world span on each axis.
const BUDGET_CELL_DIVISIONS: f64 = 256.0;

/// Cell budget for a radius query: circle area over the area of one
/// budget cell (a fixed division of the index's world bounds), a 50%
/// buffer, clamped to `[4, 100]`. Small circles cover a handful of
/// cells; large ones saturate at the clamp.
pub fn radius_cell_budget(radius: f64, bounds: &(f64, f64, f64, f64)) -> usize {
    if radius <= 0.0 {
        return 4;
    }
    let (min_x, min_y, max_x, max_y) = *bounds;
    let cell_w = ((max_x - min_x) / BUDGET_CELL_DIVISIONS).max(f64::MIN_POSITIVE);
    let cell_h = ((max_y - min_y) / BUDGET_CELL_DIVISIONS).max(f64::MIN_POSITIVE);
    let circle_area = std::f64::consts::PI * radius * radius;
    let ratio = circle_area / (cell_w * cell_h) * 1.5;
    (ratio.ceil() as usize).clamp(4, 100)
}

/// Morton code of a coordinate pair under the index's world bounds
pub fn morton_cell(x: f64, y: f64, bounds: &(f64, f64, f64, f64)) -> u32 {
    let (gx, gy) = quantize(x, y, bounds);
    morton_interleave(gx, gy)
}

fn quantize(x: f64, y: f64, bounds: &(f64, f64, f64, f64)) -> (u32, u32) {
    let (min_x, min_y, max_x, max_y) = *bounds;
    let span_x = (max_x - min_x).max(f64::MIN_POSITIVE);
    let span_y = (max_y - min_y).max(f64::MIN_POSITIVE);
    let gx = ((x - min_x) / span_x * GRID_MAX as f64).clamp(0.0, GRID_MAX as f64) as u32;
    let gy = ((y - min_y) / span_y * GRID_MAX as f64).clamp(0.0, GRID_MAX as f64) as u32;
    (gx, gy)
}

fn morton_interleave(x: u32, y: u32) -> u32 {
    (part1by1(x) | (part1by1(y) << 1)) as u32
}

fn part1by1(v: u32) -> u64 {
    let mut x = v as u64 & 0xFFFF;
    x = (x | (x << 8)) & 0x00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333;
    x = (x | (x << 1)) & 0x5555_5555;
    x
}

/// Execute a spatial range plan: cover, scan, fetch, re-verify, filter
pub fn execute_spatial<'t, R: 't>(
    ctx: ExecutionContext<'t, R>,
    txn: &'t dyn KvRead,
    snapshot: bool,
    index: &Index,
    query: &SpatialQuery,
    residual: Option<&'t Filter>,
) -> Result<RecordCursor<'t, R>> {
    if index.state != IndexState::Readable {
        return Err(Error::index_not_readable(
            &index.name,
            index.state.to_string(),
            "enable the index before issuing spatial queries",
        ));
    }
    let IndexKind::Spatial(options) = &index.kind else {
        return Err(Error::invalid_argument(format!(
            "index '{}' is not a spatial index",
            index.name
        )));
    };

    let bbox = query.bounding_box();
    let budget = match query {
        SpatialQuery::Radius { radius, .. } => radius_cell_budget(*radius, &options.bounds),
        SpatialQuery::Box(_) => 100,
    };
    let ranges = MortonCoverer.covering(&bbox, budget, options);
    trace!(
        index = index.name.as_str(),
        ranges = ranges.len(),
        "spatial covering computed"
    );

    let def = ctx.schema.record_type(&index.record_type)?;
    let pk_length = def.primary_key_length();
    let sub = index_subspace(ctx.root, index);
    let record_sub = record_type_subspace(ctx.root, &index.record_type);
    let options = options.clone();
    let query = query.clone();
    let index_name = index.name.clone();

    // collect matching primary keys range by range, then fetch lazily
    let mut pks: Vec<Vec<TupleElement>> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (cell_begin, cell_end) in ranges {
        let begin = sub.pack(&[TupleElement::Int(cell_begin)]);
        let mut end = sub.pack(&[TupleElement::Int(cell_end)]);
        end.push(0xFF);
        for entry in txn.get_range(&begin, &end, snapshot)? {
            let (key, _) = entry?;
            let tuple = sub.unpack(&key)?;
            if tuple.len() != 1 + pk_length {
                return Err(Error::internal(format!(
                    "malformed entry in spatial index '{}'",
                    index_name
                )));
            }
            let pk = tuple[1..].to_vec();
            if seen.insert(crate::tuple::pack_elements(&pk)) {
                pks.push(pk);
            }
        }
    }

    let access = ctx.access;
    let iter = pks.into_iter().filter_map(move |pk| {
        let key = record_sub.pack(&pk);
        let fetched = match txn.get(&key, snapshot) {
            Ok(Some(bytes)) => access.deserialize(&bytes),
            Ok(None) => return None,
            Err(e) => Err(e),
        };
        let record = match fetched {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };
        let x = access.extract_field(&record, &options.x_field).as_ref().and_then(as_f64);
        let y = access.extract_field(&record, &options.y_field).as_ref().and_then(as_f64);
        let (Some(x), Some(y)) = (x, y) else {
            return None;
        };
        if !query.verify(x, y, None) {
            return None;
        }
        if let Some(filter) = residual {
            if !filter.matches(&record, access) {
                return None;
            }
        }
        Some(Ok(record))
    });
    Ok(RecordCursor::new(iter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CoordinateSystem;

    fn options() -> SpatialOptions {
        SpatialOptions {
            system: CoordinateSystem::Cartesian,
            x_field: "x".into(),
            y_field: "y".into(),
            bounds: (0.0, 0.0, 100.0, 100.0),
        }
    }

    #[test]
    fn test_morton_orders_nearby_cells_together() {
        let bounds = (0.0, 0.0, 100.0, 100.0);
        let a = morton_cell(10.0, 10.0, &bounds);
        let b = morton_cell(10.001, 10.001, &bounds);
        assert_eq!(a, b, "near-identical points should share a cell");
    }

    #[test]
    fn test_covering_contains_all_points_in_box() {
        let opts = options();
        let bbox = BoundingBox::new(20.0, 20.0, 40.0, 35.0);
        let ranges = MortonCoverer.covering(&bbox, 64, &opts);
        assert!(!ranges.is_empty());
        assert!(ranges.len() <= 64);

        for (x, y) in [(20.0, 20.0), (30.0, 27.5), (40.0, 35.0), (39.9, 20.1)] {
            let cell = morton_cell(x, y, &opts.bounds) as i64;
            assert!(
                ranges.iter().any(|(b, e)| cell >= *b && cell <= *e),
                "point ({}, {}) cell {} not covered",
                x,
                y,
                cell
            );
        }
    }

    #[test]
    fn test_merge_ranges() {
        let merged = merge_ranges(vec![(10, 20), (15, 25), (40, 50), (26, 30)]);
        assert_eq!(merged, vec![(10, 30), (40, 50)]);
    }

    #[test]
    fn test_radius_budget_scales_with_radius() {
        let bounds = (0.0, 0.0, 100.0, 100.0);
        let tiny = radius_cell_budget(0.1, &bounds);
        let small = radius_cell_budget(0.5, &bounds);
        let large = radius_cell_budget(5.0, &bounds);
        assert!(tiny < small, "tiny {} should need fewer cells than small {}", tiny, small);
        assert!(small < large, "small {} should need fewer cells than large {}", small, large);
        assert_eq!(tiny, 4, "sub-cell circles sit at the lower clamp");
        assert_eq!(large, 100, "world-scale circles saturate at the upper clamp");
    }

    #[test]
    fn test_radius_budget_clamped() {
        let bounds = (0.0, 0.0, 100.0, 100.0);
        for radius in [0.0, 0.01, 1.0, 10.0, 1000.0] {
            let budget = radius_cell_budget(radius, &bounds);
            assert!((4..=100).contains(&budget), "radius {} gave budget {}", radius, budget);
        }
        assert_eq!(radius_cell_budget(0.0, &bounds), 4);
        assert_eq!(radius_cell_budget(-1.0, &bounds), 4);
    }

    #[test]
    fn test_query_verify() {
        let q = SpatialQuery::Radius { x: 0.0, y: 0.0, radius: 5.0 };
        assert!(q.verify(3.0, 4.0, None));
        assert!(!q.verify(3.1, 4.1, None));

        let b = SpatialQuery::Box(BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert!(b.verify(0.5, 0.5, None));
        assert!(!b.verify(1.5, 0.5, None));
    }

    #[test]
    fn test_bounding_box_of_radius() {
        let q = SpatialQuery::Radius { x: 10.0, y: 10.0, radius: 2.0 };
        let bbox = q.bounding_box();
        assert_eq!(bbox.min_x, 8.0);
        assert_eq!(bbox.max_y, 12.0);
    }
}
