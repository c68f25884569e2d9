//! Move resolution against the tile map.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{EngineResult, ResolutionFailure};
use crate::model::{strategic_speed, ArmyId, Coord, MapBounds, MoveOrder, Terrain, Tile};
use crate::store::Transaction;

/// Outcome of a completed move, stored as the command result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveReport {
    pub army_id: ArmyId,
    pub start_position: Coord,
    pub end_position: Coord,
    pub path_traversed: Vec<Coord>,
    pub requested_path: Vec<Coord>,
    /// Terrain of the tile that ended the walk early.
    pub stopped_by: Option<Terrain>,
    pub message: String,
}

/// A tile that is inside `bounds` and present in the map table.
fn known_tile(
    tx: &mut dyn Transaction,
    bounds: &MapBounds,
    at: Coord,
) -> EngineResult<Option<Tile>> {
    if !bounds.contains(at) {
        return Ok(None);
    }
    tx.tile(at)
}

/// Validate `order` for `army` and move it. Nothing is written on failure.
pub(crate) fn resolve_move(
    tx: &mut dyn Transaction,
    bounds: &MapBounds,
    army: ArmyId,
    order: &MoveOrder,
    now: DateTime<Utc>,
) -> EngineResult<Result<MoveReport, ResolutionFailure>> {
    let path = &order.path;
    let Some(army_row) = tx.army(army)? else {
        return Ok(Err(ResolutionFailure::ArmyNotFound(army)));
    };
    let (Some(&start), Some(&destination)) = (path.first(), path.last()) else {
        return Ok(Err(ResolutionFailure::InvalidPath("path is empty".into())));
    };
    if path.len() < 2 {
        return Ok(Err(ResolutionFailure::InvalidPath(
            "path needs at least two waypoints".into(),
        )));
    }
    if start != army_row.position {
        return Ok(Err(ResolutionFailure::PathStartMismatch));
    }

    let units = tx.units_in_army(army)?;
    let speed = strategic_speed(&units);
    let steps = path.len() - 1;
    if i64::try_from(steps).map_or(true, |s| s > speed) {
        return Ok(Err(ResolutionFailure::TooFar { steps, speed }));
    }

    if known_tile(tx, bounds, destination)?.is_none() {
        return Ok(Err(ResolutionFailure::InvalidLocation {
            x: destination.x,
            y: destination.y,
        }));
    }

    let mut traversed = vec![start];
    let mut stopped_by = None;
    for (index, pair) in path.windows(2).enumerate() {
        let (from, to) = (pair[0], pair[1]);
        // Only the opening step may go diagonal.
        let adjacent = if index == 0 {
            from.is_king_neighbor(&to)
        } else {
            from.is_cardinal_neighbor(&to)
        };
        if !adjacent {
            return Ok(Err(ResolutionFailure::NotAdjacent {
                index: index + 1,
                from_x: from.x,
                from_y: from.y,
                to_x: to.x,
                to_y: to.y,
            }));
        }

        let Some(tile) = known_tile(tx, bounds, to)? else {
            return Ok(Err(ResolutionFailure::InvalidLocation { x: to.x, y: to.y }));
        };
        traversed.push(to);
        if !tile.terrain.is_open() {
            stopped_by = Some(tile.terrain);
            break;
        }
    }

    let end = *traversed.last().unwrap_or(&start);
    let Some(moved) = tx.set_army_position(army, end, now)? else {
        return Ok(Err(ResolutionFailure::ArmyNotFound(army)));
    };

    let message = match &stopped_by {
        Some(terrain) => format!("Army stopped at {} by {terrain}", moved.position),
        None => "Army moved successfully".to_string(),
    };
    tracing::debug!(
        army_id = %army,
        from = %start,
        to = %moved.position,
        "Army moved"
    );

    Ok(Ok(MoveReport {
        army_id: army,
        start_position: start,
        end_position: moved.position,
        path_traversed: traversed,
        requested_path: path.clone(),
        stopped_by,
        message,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixture::{t0, world};
    use crate::store::Store;

    fn order(points: &[(i64, i64)]) -> MoveOrder {
        MoveOrder {
            path: points.iter().map(|&(x, y)| Coord::new(x, y)).collect(),
        }
    }

    fn run(
        w: &crate::engine::fixture::World,
        army: ArmyId,
        points: &[(i64, i64)],
    ) -> Result<MoveReport, ResolutionFailure> {
        let bounds = MapBounds::default();
        w.engine
            .store()
            .transaction(|tx| resolve_move(tx, &bounds, army, &order(points), t0()))
            .unwrap()
    }

    fn position(w: &crate::engine::fixture::World, army: ArmyId) -> Coord {
        w.read(|tx| tx.army(army)).unwrap().position
    }

    #[test]
    fn diagonal_first_step_then_cardinal() {
        let w = world();
        let report = run(&w, w.ada_army, &[(0, 0), (1, 1), (1, 2)]).unwrap();
        assert_eq!(report.end_position, Coord::new(1, 2));
        assert_eq!(report.path_traversed.len(), 3);
        assert!(report.stopped_by.is_none());
        assert_eq!(position(&w, w.ada_army), Coord::new(1, 2));
    }

    #[test]
    fn speed_two_army_crosses_open_ground() {
        let w = world();
        // Archers move 2 tiles per turn.
        let report = run(&w, w.bob_army, &[(0, 0), (1, 1), (2, 1)]).unwrap();
        assert_eq!(report.end_position, Coord::new(2, 1));
        assert!(report.stopped_by.is_none());
        assert_eq!(position(&w, w.bob_army), Coord::new(2, 1));
    }

    #[test]
    fn extreme_waypoint_is_not_adjacent() {
        let w = world();
        let err = run(&w, w.ada_army, &[(0, 0), (i64::MIN, 0), (1, 0)]).unwrap_err();
        assert!(matches!(err, ResolutionFailure::NotAdjacent { index: 1, .. }));
        let err = run(&w, w.ada_army, &[(0, 0), (0, 1), (i64::MAX, 1)]).unwrap_err();
        assert!(matches!(err, ResolutionFailure::NotAdjacent { index: 2, .. }));
        assert_eq!(position(&w, w.ada_army), Coord::new(0, 0));
    }

    #[test]
    fn later_diagonal_step_is_rejected() {
        let w = world();
        let err = run(&w, w.ada_army, &[(0, 0), (0, 1), (1, 2)]).unwrap_err();
        assert!(matches!(err, ResolutionFailure::NotAdjacent { index: 2, .. }));
        assert_eq!(position(&w, w.ada_army), Coord::new(0, 0));
    }

    #[test]
    fn walk_stops_on_first_non_open_tile() {
        let w = world();
        let report = run(&w, w.ada_army, &[(0, 0), (1, 0), (2, 0), (3, 0)]).unwrap();
        assert_eq!(report.end_position, Coord::new(2, 0));
        assert_eq!(report.stopped_by, Some(Terrain::Forest));
        assert_eq!(report.requested_path.len(), 4);
        assert_eq!(position(&w, w.ada_army), Coord::new(2, 0));
    }

    #[test]
    fn path_longer_than_speed_fails() {
        let w = world();
        // Archers move 2 tiles per turn.
        let err = run(&w, w.bob_army, &[(0, 0), (0, 1), (0, 2), (0, 3)]).unwrap_err();
        assert_eq!(err, ResolutionFailure::TooFar { steps: 3, speed: 2 });
    }

    #[test]
    fn army_without_units_moves_one_tile() {
        let w = world();
        assert!(run(&w, w.bob_empty, &[(5, 5), (5, 6)]).is_ok());
        let err = run(&w, w.bob_empty, &[(5, 6), (5, 7), (5, 8)]).unwrap_err();
        assert!(matches!(err, ResolutionFailure::TooFar { speed: 1, .. }));
    }

    #[test]
    fn start_must_match_position() {
        let w = world();
        let err = run(&w, w.ada_army, &[(1, 1), (1, 2)]).unwrap_err();
        assert_eq!(err, ResolutionFailure::PathStartMismatch);
    }

    #[test]
    fn destination_outside_bounds_fails() {
        let w = world();
        let err = run(&w, w.bob_empty, &[(5, 5), (5, 10)]).unwrap_err();
        assert_eq!(err, ResolutionFailure::InvalidLocation { x: 5, y: 10 });
    }
}
