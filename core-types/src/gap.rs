// Copyright (c) James Kassemi, SC, US. All rights reserved.

use log::warn;

use crate::types::Point;

/// Pads a sparse series with `empty` points so every `interval_secs` boundary between `start`
/// and `end` is represented.
///
/// Points are sorted by `ctime` first; anything after `end` is dropped. A zero interval
/// cannot advance the cursor, so the sorted input is returned as-is.
pub fn fill_gaps<E: Clone>(
    mut points: Vec<Point<E>>,
    empty: &E,
    start: i64,
    end: i64,
    interval_secs: u32,
) -> Vec<Point<E>> {
    points.sort_by_key(|p| p.ctime);
    if interval_secs == 0 {
        warn!("fill_gaps called with zero interval; returning {} points unpadded", points.len());
        return points;
    }
    let step = interval_secs as i64;
    let mut cursor = start;
    let mut filled = Vec::with_capacity(points.len());
    for point in points {
        if point.ctime > end {
            break;
        }
        while cursor < point.ctime {
            filled.push(Point::new(empty.clone(), cursor));
            cursor += step;
        }
        filled.push(point);
        cursor += step;
    }
    while cursor < end {
        filled.push(Point::new(empty.clone(), cursor));
        cursor += step;
    }
    filled
}
