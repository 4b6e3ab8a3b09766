//! Snapshot interpolation engine for Helmlink clients.
//!
//! The server emits entity [`Snapshot`]s at a fixed, coarse tick
//! (default 10 Hz); clients render at 60+ FPS. Rendering raw snapshots
//! would stutter, so the engine buffers them and reconstructs smooth
//! motion at arbitrary render times: linear interpolation for
//! positions, spherical (slerp) for rotation quaternions.
//!
//! # Render delay
//!
//! [`InterpolationEngine::interpolation_time`] subtracts a small fixed
//! delay from "now" so that the query time almost always falls *between*
//! two buffered snapshots. The cost is ~2 ticks of added latency; the
//! payoff is that interpolation — not extrapolation — is the common
//! case, which is what keeps motion artifact-free when the server tick
//! is irregular.
//!
//! # Purity
//!
//! [`calc_interpolation`](InterpolationEngine::calc_interpolation) is a
//! pure function of the buffer and the query time — no clocks, no
//! scheduling. Call it once per animation frame from whatever render
//! loop the platform provides; the engine neither knows nor cares.
//!
//! # Entities that vanish
//!
//! An entity missing from the newer bracketing snapshot (it left sensor
//! range, it was destroyed) is reported at its last known state rather
//! than dropped mid-frame. Consumers that want vanished entities gone
//! should time them out themselves.

use std::collections::VecDeque;

use glam::{Quat, Vec3};
use helmlink_protocol::{EntityState, Snapshot};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the snapshot buffer.
#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    /// Snapshots older than `newest - retention_ms` are evicted.
    pub retention_ms: u64,

    /// Fixed render delay applied by
    /// [`interpolation_time`](InterpolationEngine::interpolation_time).
    /// Default 100 ms ≈ two server ticks.
    pub render_delay_ms: u64,

    /// Hard cap on buffered snapshots (oldest evicted first).
    pub max_snapshots: usize,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            retention_ms: 3_000,
            render_delay_ms: 100,
            max_snapshots: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// InterpolatedEntity
// ---------------------------------------------------------------------------

/// One entity's reconstructed state at a query time. Ephemeral —
/// recomputed every render frame, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedEntity {
    pub id: String,
    pub position: Vec3,
    pub rotation: Quat,
}

// ---------------------------------------------------------------------------
// InterpolationEngine
// ---------------------------------------------------------------------------

/// Buffers timestamped snapshots and reconstructs per-entity state at
/// arbitrary render times.
#[derive(Debug, Default)]
pub struct InterpolationEngine {
    config: InterpolationConfig,
    /// Ordered by `Snapshot::id` (capture timestamp), oldest first.
    snapshots: VecDeque<Snapshot>,
}

impl InterpolationEngine {
    /// An empty engine with the given config.
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            snapshots: VecDeque::new(),
        }
    }

    /// Number of buffered snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// `true` if nothing is buffered yet.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// The render time to query for a given wall-clock "now":
    /// `now - render_delay`, saturating at zero.
    pub fn interpolation_time(&self, now_ms: u64) -> f64 {
        now_ms.saturating_sub(self.config.render_delay_ms) as f64
    }

    /// Ingests one snapshot, keeping the buffer ordered and bounded.
    ///
    /// Snapshots may arrive slightly out of order (the stream channel
    /// is lossy and unordered by design); insertion sorts by timestamp.
    /// A snapshot with a timestamp already present replaces nothing and
    /// is dropped — the first capture for an instant wins.
    pub fn add(&mut self, snapshot: Snapshot) {
        let pos = self
            .snapshots
            .partition_point(|s| s.id < snapshot.id);
        if self
            .snapshots
            .get(pos)
            .is_some_and(|s| s.id == snapshot.id)
        {
            tracing::trace!(id = snapshot.id, "dropping duplicate snapshot");
            return;
        }
        self.snapshots.insert(pos, snapshot);
        self.evict();
    }

    /// Reconstructs every tracked entity's state at `time_ms`.
    ///
    /// - Bracketing pair found → lerp positions, slerp rotations.
    /// - `time_ms` past the newest snapshot → linear extrapolation from
    ///   the last two (rotation holds the newest value).
    /// - `time_ms` before the oldest → the earliest known state.
    /// - Single buffered snapshot → that snapshot's state verbatim.
    /// - Empty buffer → empty.
    pub fn calc_interpolation(&self, time_ms: f64) -> Vec<InterpolatedEntity> {
        let (Some(oldest), Some(newest)) =
            (self.snapshots.front(), self.snapshots.back())
        else {
            return Vec::new();
        };

        if self.snapshots.len() == 1 {
            return entities_verbatim(newest);
        }

        if time_ms < oldest.id as f64 {
            return entities_verbatim(oldest);
        }

        if time_ms >= newest.id as f64 {
            let prev = &self.snapshots[self.snapshots.len() - 2];
            return extrapolate(prev, newest, time_ms);
        }

        // partition_point gives the first snapshot with id > time, so
        // [idx-1, idx] brackets the query time.
        let idx = self
            .snapshots
            .partition_point(|s| s.id as f64 <= time_ms);
        let older = &self.snapshots[idx - 1];
        let newer = &self.snapshots[idx];
        interpolate(older, newer, time_ms)
    }

    fn evict(&mut self) {
        while self.snapshots.len() > self.config.max_snapshots {
            self.snapshots.pop_front();
        }
        let Some(newest) = self.snapshots.back().map(|s| s.id) else {
            return;
        };
        let horizon = newest.saturating_sub(self.config.retention_ms);
        // Keep at least two so a bracketing pair always survives.
        while self.snapshots.len() > 2
            && self.snapshots.front().is_some_and(|s| s.id < horizon)
        {
            self.snapshots.pop_front();
        }
    }
}

// ---------------------------------------------------------------------------
// Math
// ---------------------------------------------------------------------------

fn position(entity: &EntityState) -> Vec3 {
    Vec3::new(entity.x, entity.y, entity.z)
}

fn rotation(entity: &EntityState) -> Quat {
    match &entity.r {
        Some(r) => {
            Quat::from_xyzw(r.x, r.y, r.z, r.w).normalize()
        }
        None => Quat::IDENTITY,
    }
}

fn entities_verbatim(snapshot: &Snapshot) -> Vec<InterpolatedEntity> {
    snapshot
        .state
        .iter()
        .map(|entity| InterpolatedEntity {
            id: entity.id.clone(),
            position: position(entity),
            rotation: rotation(entity),
        })
        .collect()
}

/// Reconstructs state between two bracketing snapshots.
fn interpolate(
    older: &Snapshot,
    newer: &Snapshot,
    time_ms: f64,
) -> Vec<InterpolatedEntity> {
    let span = (newer.id - older.id) as f64;
    let factor = ((time_ms - older.id as f64) / span) as f32;

    let mut result = Vec::with_capacity(newer.state.len());
    for entity in &older.state {
        match find(newer, &entity.id) {
            Some(target) => result.push(InterpolatedEntity {
                id: entity.id.clone(),
                position: position(entity)
                    .lerp(position(target), factor),
                rotation: rotation(entity)
                    .slerp(rotation(target), factor),
            }),
            // Left the tracked set: hold the last known state.
            None => result.push(InterpolatedEntity {
                id: entity.id.clone(),
                position: position(entity),
                rotation: rotation(entity),
            }),
        }
    }
    // Entities that appeared between the two snapshots have no older
    // state to blend from; they snap in at their new position.
    for entity in &newer.state {
        if find(older, &entity.id).is_none() {
            result.push(InterpolatedEntity {
                id: entity.id.clone(),
                position: position(entity),
                rotation: rotation(entity),
            });
        }
    }
    result
}

/// Projects state past the newest snapshot using the velocity implied
/// by the last two. Rotation is held rather than extrapolated — a
/// quaternion flung past its endpoint swings visibly wrong, while a
/// briefly frozen heading is imperceptible.
fn extrapolate(
    prev: &Snapshot,
    newest: &Snapshot,
    time_ms: f64,
) -> Vec<InterpolatedEntity> {
    let span = (newest.id - prev.id) as f64;
    let ahead = (time_ms - newest.id as f64) as f32;

    newest
        .state
        .iter()
        .map(|entity| {
            let current = position(entity);
            let velocity = match find(prev, &entity.id) {
                Some(before) if span > 0.0 => {
                    (current - position(before)) / span as f32
                }
                _ => Vec3::ZERO,
            };
            InterpolatedEntity {
                id: entity.id.clone(),
                position: current + velocity * ahead,
                rotation: rotation(entity),
            }
        })
        .collect()
}

fn find<'a>(snapshot: &'a Snapshot, id: &str) -> Option<&'a EntityState> {
    snapshot.state.iter().find(|e| e.id == id)
}
