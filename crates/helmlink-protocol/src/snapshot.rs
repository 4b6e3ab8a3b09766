//! Entity snapshot types for the data-stream channel.
//!
//! Once per simulation tick the server captures every tracked entity's
//! position (and rotation, for things that turn) into a [`Snapshot`],
//! stamps it, and pushes it to each connection with an active stream.
//! Snapshots are immutable once emitted; the client buffers a bounded
//! window of them and interpolates between the two that bracket its
//! render time.

use serde::{Deserialize, Serialize};

/// A unit quaternion, sent only for entities that rotate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// One entity's state at a single instant.
///
/// `r` is always serialized (as `null` when absent) rather than
/// omitted: snapshots travel as bincode, which is positional and needs
/// every field present to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Stable entity identifier across snapshots.
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Rotation quaternion. `None` for point entities.
    #[serde(default)]
    pub r: Option<Rotation>,
}

impl EntityState {
    /// A positioned entity without rotation.
    pub fn at(id: impl Into<String>, x: f32, y: f32, z: f32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            z,
            r: None,
        }
    }

    /// Attaches a rotation quaternion.
    pub fn with_rotation(mut self, x: f32, y: f32, z: f32, w: f32) -> Self {
        self.r = Some(Rotation { x, y, z, w });
        self
    }
}

/// One timestamped capture of all tracked entities.
///
/// `id` doubles as the capture timestamp in milliseconds — the server's
/// clock at emit time. The interpolation engine orders its buffer by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Capture timestamp in milliseconds.
    pub id: u64,
    /// Every tracked entity, flat.
    pub state: Vec<EntityState>,
}
