//! Integration tests for the interpolation engine: bracketing,
//! extrapolation, clamping, rotation slerp, and vanishing entities.

use glam::{Quat, Vec3};
use helmlink_interp::{InterpolationConfig, InterpolationEngine};
use helmlink_protocol::{EntityState, Snapshot};

fn snap(id: u64, entities: Vec<EntityState>) -> Snapshot {
    Snapshot { id, state: entities }
}

fn engine_with(snapshots: Vec<Snapshot>) -> InterpolationEngine {
    let mut engine = InterpolationEngine::default();
    for s in snapshots {
        engine.add(s);
    }
    engine
}

fn single(entities: &[helmlink_interp::InterpolatedEntity], id: &str)
-> helmlink_interp::InterpolatedEntity {
    entities
        .iter()
        .find(|e| e.id == id)
        .unwrap_or_else(|| panic!("entity {id} missing"))
        .clone()
}

// =========================================================================
// Bracketed interpolation
// =========================================================================

#[test]
fn test_midpoint_is_linear_blend() {
    // t=0 x:0, t=100 x:10 → calc(50) yields x=5.
    let engine = engine_with(vec![
        snap(0, vec![EntityState::at("ship", 0.0, 0.0, 0.0)]),
        snap(100, vec![EntityState::at("ship", 10.0, 0.0, 0.0)]),
    ]);

    let result = engine.calc_interpolation(50.0);
    let ship = single(&result, "ship");
    assert!((ship.position.x - 5.0).abs() < 1e-5, "{:?}", ship.position);
}

#[test]
fn test_quarter_point_blend() {
    let engine = engine_with(vec![
        snap(0, vec![EntityState::at("ship", 0.0, 4.0, -8.0)]),
        snap(100, vec![EntityState::at("ship", 10.0, 8.0, 0.0)]),
    ]);

    let ship = single(&engine.calc_interpolation(25.0), "ship");
    assert!((ship.position - Vec3::new(2.5, 5.0, -6.0)).length() < 1e-5);
}

#[test]
fn test_interpolation_picks_correct_bracket() {
    // Three snapshots; a query between the second and third must not
    // blend against the first.
    let engine = engine_with(vec![
        snap(0, vec![EntityState::at("ship", 0.0, 0.0, 0.0)]),
        snap(100, vec![EntityState::at("ship", 10.0, 0.0, 0.0)]),
        snap(200, vec![EntityState::at("ship", 30.0, 0.0, 0.0)]),
    ]);

    let ship = single(&engine.calc_interpolation(150.0), "ship");
    assert!((ship.position.x - 20.0).abs() < 1e-5);
}

#[test]
fn test_rotation_slerps_between_snapshots() {
    // Identity → 90° around Y. Halfway should be 45° around Y.
    let from = Quat::IDENTITY;
    let to = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
    let engine = engine_with(vec![
        snap(
            0,
            vec![EntityState::at("ship", 0.0, 0.0, 0.0).with_rotation(
                from.x, from.y, from.z, from.w,
            )],
        ),
        snap(
            100,
            vec![EntityState::at("ship", 0.0, 0.0, 0.0)
                .with_rotation(to.x, to.y, to.z, to.w)],
        ),
    ]);

    let ship = single(&engine.calc_interpolation(50.0), "ship");
    let expected = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
    assert!(
        ship.rotation.angle_between(expected) < 1e-4,
        "got {:?}",
        ship.rotation
    );
}

#[test]
fn test_missing_rotation_defaults_to_identity() {
    let engine = engine_with(vec![
        snap(0, vec![EntityState::at("probe", 0.0, 0.0, 0.0)]),
        snap(100, vec![EntityState::at("probe", 1.0, 0.0, 0.0)]),
    ]);

    let probe = single(&engine.calc_interpolation(50.0), "probe");
    assert!(probe.rotation.angle_between(Quat::IDENTITY) < 1e-6);
}

// =========================================================================
// Beyond the buffer: extrapolation
// =========================================================================

#[test]
fn test_query_past_newest_extrapolates() {
    // Velocity 10 units / 100 ms; 50 ms past the newest snapshot the
    // ship should be at x=15, not frozen at 10 and not an error.
    let engine = engine_with(vec![
        snap(0, vec![EntityState::at("ship", 0.0, 0.0, 0.0)]),
        snap(100, vec![EntityState::at("ship", 10.0, 0.0, 0.0)]),
    ]);

    let ship = single(&engine.calc_interpolation(150.0), "ship");
    assert!((ship.position.x - 15.0).abs() < 1e-4, "{:?}", ship.position);
}

#[test]
fn test_extrapolation_holds_rotation() {
    let to = Quat::from_rotation_y(1.0);
    let engine = engine_with(vec![
        snap(0, vec![EntityState::at("ship", 0.0, 0.0, 0.0)]),
        snap(
            100,
            vec![EntityState::at("ship", 10.0, 0.0, 0.0)
                .with_rotation(to.x, to.y, to.z, to.w)],
        ),
    ]);

    let ship = single(&engine.calc_interpolation(200.0), "ship");
    assert!(ship.rotation.angle_between(to) < 1e-5);
}

#[test]
fn test_entity_new_in_newest_snapshot_extrapolates_from_standstill() {
    // "contact" only exists in the newest snapshot: no velocity to
    // infer, so it stays put rather than being flung.
    let engine = engine_with(vec![
        snap(0, vec![EntityState::at("ship", 0.0, 0.0, 0.0)]),
        snap(
            100,
            vec![
                EntityState::at("ship", 10.0, 0.0, 0.0),
                EntityState::at("contact", 7.0, 7.0, 7.0),
            ],
        ),
    ]);

    let contact = single(&engine.calc_interpolation(150.0), "contact");
    assert_eq!(contact.position, Vec3::new(7.0, 7.0, 7.0));
}

// =========================================================================
// Before the buffer / degenerate buffers
// =========================================================================

#[test]
fn test_query_before_oldest_returns_earliest_state() {
    let engine = engine_with(vec![
        snap(100, vec![EntityState::at("ship", 1.0, 0.0, 0.0)]),
        snap(200, vec![EntityState::at("ship", 2.0, 0.0, 0.0)]),
    ]);

    let ship = single(&engine.calc_interpolation(-10.0), "ship");
    assert_eq!(ship.position.x, 1.0);
}

#[test]
fn test_single_snapshot_returns_its_state() {
    let engine = engine_with(vec![snap(
        100,
        vec![EntityState::at("ship", 3.0, 2.0, 1.0)],
    )]);

    // Whatever the query time, one snapshot is all we know.
    for t in [0.0, 100.0, 500.0] {
        let ship = single(&engine.calc_interpolation(t), "ship");
        assert_eq!(ship.position, Vec3::new(3.0, 2.0, 1.0));
    }
}

// =========================================================================
// Vanishing entities
// =========================================================================

#[test]
fn test_entity_absent_from_newer_snapshot_holds_last_known() {
    let engine = engine_with(vec![
        snap(
            0,
            vec![
                EntityState::at("ship", 0.0, 0.0, 0.0),
                EntityState::at("torpedo", 5.0, 5.0, 5.0),
            ],
        ),
        // The torpedo left the tracked set.
        snap(100, vec![EntityState::at("ship", 10.0, 0.0, 0.0)]),
    ]);

    let result = engine.calc_interpolation(50.0);
    let torpedo = single(&result, "torpedo");
    assert_eq!(torpedo.position, Vec3::new(5.0, 5.0, 5.0));
    // The ship still interpolates normally.
    let ship = single(&result, "ship");
    assert!((ship.position.x - 5.0).abs() < 1e-5);
}

#[test]
fn test_entity_appearing_mid_stream_snaps_in() {
    let engine = engine_with(vec![
        snap(0, vec![EntityState::at("ship", 0.0, 0.0, 0.0)]),
        snap(
            100,
            vec![
                EntityState::at("ship", 10.0, 0.0, 0.0),
                EntityState::at("contact", 9.0, 9.0, 9.0),
            ],
        ),
    ]);

    let contact = single(&engine.calc_interpolation(50.0), "contact");
    assert_eq!(contact.position, Vec3::new(9.0, 9.0, 9.0));
}

// =========================================================================
// Render-delay policy
// =========================================================================

#[test]
fn test_render_delay_keeps_query_inside_buffer() {
    // With a 100 ms delay and snapshots every 100 ms, the delayed query
    // time lands in the bracketed region, not past the newest snapshot.
    let engine = {
        let mut e = InterpolationEngine::new(InterpolationConfig {
            render_delay_ms: 100,
            ..InterpolationConfig::default()
        });
        e.add(snap(900, vec![EntityState::at("ship", 0.0, 0.0, 0.0)]));
        e.add(snap(1_000, vec![EntityState::at("ship", 10.0, 0.0, 0.0)]));
        e
    };

    let query = engine.interpolation_time(1_050);
    assert_eq!(query, 950.0);
    let ship = single(&engine.calc_interpolation(query), "ship");
    assert!((ship.position.x - 5.0).abs() < 1e-5);
}
