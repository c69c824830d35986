//! Interactive transform controller
//!
//! A screen-space edit frame (a fixed-size UI proxy, not 1:1 with the true
//! region) with corner, edge, and rotation handles. Pointer-down hit-tests
//! the handle stack top-down: rotation, corners, edges, interior. A miss
//! releases the pointer back to the host's camera navigation so the two
//! input systems never contend. Every drag mutation goes through the session
//! and therefore recomposites synchronously before returning.

use tracing::debug;

use crate::config::{FrameSettings, TransformSettings};
use crate::session::{CustomizerSession, SessionError};

/// Corner handles, named by screen position at zero rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    NorthWest,
    NorthEast,
    SouthEast,
    SouthWest,
}

impl Corner {
    const ALL: [Corner; 4] = [
        Corner::NorthWest,
        Corner::NorthEast,
        Corner::SouthEast,
        Corner::SouthWest,
    ];

    /// Local offset of this corner in half-frame units
    fn local(&self) -> (f64, f64) {
        match self {
            Corner::NorthWest => (-1.0, -1.0),
            Corner::NorthEast => (1.0, -1.0),
            Corner::SouthEast => (1.0, 1.0),
            Corner::SouthWest => (-1.0, 1.0),
        }
    }
}

/// Edge handles; N/S scale the Y axis, E/W the X axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSide {
    North,
    East,
    South,
    West,
}

impl EdgeSide {
    const ALL: [EdgeSide; 4] = [EdgeSide::North, EdgeSide::East, EdgeSide::South, EdgeSide::West];

    fn local(&self) -> (f64, f64) {
        match self {
            EdgeSide::North => (0.0, -1.0),
            EdgeSide::East => (1.0, 0.0),
            EdgeSide::South => (0.0, 1.0),
            EdgeSide::West => (-1.0, 0.0),
        }
    }

    fn axis(&self) -> Axis {
        match self {
            EdgeSide::North | EdgeSide::South => Axis::Y,
            EdgeSide::East | EdgeSide::West => Axis::X,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// What the pointer hit on the edit frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Rotation,
    Corner(Corner),
    Edge(EdgeSide),
    Interior,
}

/// Whether the controller captured the pointer or released it to the
/// surrounding camera navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerResponse {
    Captured,
    Released,
}

/// The edit frame as currently displayed: a square proxy centered where the
/// shell placed it, rotated with the active layer. Collapses to zero size
/// when no layer is active.
#[derive(Debug, Clone, Copy)]
pub struct EditFrame {
    pub center_x: f64,
    pub center_y: f64,
    pub size: f64,
    pub rotation: f64,
}

impl EditFrame {
    pub fn is_collapsed(&self) -> bool {
        self.size <= 0.0
    }

    /// Rotate a local offset into screen space about the frame center
    fn to_screen(&self, lx: f64, ly: f64) -> (f64, f64) {
        let cos_r = self.rotation.cos();
        let sin_r = self.rotation.sin();
        (
            self.center_x + cos_r * lx - sin_r * ly,
            self.center_y + sin_r * lx + cos_r * ly,
        )
    }

    fn corner_position(&self, corner: Corner) -> (f64, f64) {
        let half = self.size / 2.0;
        let (lx, ly) = corner.local();
        self.to_screen(lx * half, ly * half)
    }

    fn edge_position(&self, edge: EdgeSide) -> (f64, f64) {
        let half = self.size / 2.0;
        let (lx, ly) = edge.local();
        self.to_screen(lx * half, ly * half)
    }

    fn rotation_handle_position(&self, offset: f64) -> (f64, f64) {
        self.to_screen(0.0, -(self.size / 2.0 + offset))
    }

    /// Whether a screen point lies inside the rotated frame square
    fn contains(&self, x: f64, y: f64) -> bool {
        let dx = x - self.center_x;
        let dy = y - self.center_y;
        let cos_r = self.rotation.cos();
        let sin_r = self.rotation.sin();
        let lx = cos_r * dx + sin_r * dy;
        let ly = -sin_r * dx + cos_r * dy;
        let half = self.size / 2.0;
        lx.abs() <= half && ly.abs() <= half
    }
}

/// Drag state machine: `Idle -> {Move, ScaleCorner, ScaleEdge, Rotate} -> Idle`
#[derive(Debug, Clone, Copy)]
enum DragState {
    Idle,
    Move {
        last_x: f64,
        last_y: f64,
    },
    ScaleCorner {
        start_dist: f64,
        start_scale_x: f64,
        start_scale_y: f64,
    },
    ScaleEdge {
        axis: Axis,
        start_dist: f64,
        start_scale_x: f64,
        start_scale_y: f64,
    },
    Rotate {
        start_angle: f64,
        start_rotation: f64,
    },
}

/// Pointer-driven editor of the active layer's transform
pub struct TransformController {
    frame_settings: FrameSettings,
    transform_settings: TransformSettings,
    center_x: f64,
    center_y: f64,
    state: DragState,
}

impl TransformController {
    pub fn new(frame_settings: FrameSettings, transform_settings: TransformSettings) -> Self {
        TransformController {
            frame_settings,
            transform_settings,
            center_x: 0.0,
            center_y: 0.0,
            state: DragState::Idle,
        }
    }

    /// The shell decides where on screen the frame sits
    pub fn set_frame_center(&mut self, x: f64, y: f64) {
        self.center_x = x;
        self.center_y = y;
    }

    pub fn is_dragging(&self) -> bool {
        !matches!(self.state, DragState::Idle)
    }

    /// The frame as currently displayed; zero-sized without an active layer
    pub fn frame(&self, session: &CustomizerSession) -> EditFrame {
        match session.active_transform() {
            Some(t) => EditFrame {
                center_x: self.center_x,
                center_y: self.center_y,
                size: self.frame_settings.size,
                rotation: t.rotation,
            },
            None => EditFrame {
                center_x: self.center_x,
                center_y: self.center_y,
                size: 0.0,
                rotation: 0.0,
            },
        }
    }

    /// Hit order: rotation handle, corners, edges, interior. The handle
    /// stack reads top-down so overlapping hit circles resolve to the most
    /// specific control.
    fn hit_test(&self, frame: &EditFrame, x: f64, y: f64) -> Option<Handle> {
        let radius = self.frame_settings.handle_radius;

        let (hx, hy) = frame.rotation_handle_position(self.frame_settings.rotation_handle_offset);
        if distance(x, y, hx, hy) <= radius {
            return Some(Handle::Rotation);
        }
        for corner in Corner::ALL {
            let (cx, cy) = frame.corner_position(corner);
            if distance(x, y, cx, cy) <= radius {
                return Some(Handle::Corner(corner));
            }
        }
        for edge in EdgeSide::ALL {
            let (ex, ey) = frame.edge_position(edge);
            if distance(x, y, ex, ey) <= radius {
                return Some(Handle::Edge(edge));
            }
        }
        if frame.contains(x, y) {
            return Some(Handle::Interior);
        }
        None
    }

    /// Begin a drag. A miss (or no active layer) returns `Released` so the
    /// host's camera navigation takes the pointer.
    pub fn pointer_down(&mut self, session: &CustomizerSession, x: f64, y: f64) -> PointerResponse {
        let frame = self.frame(session);
        let Some(transform) = session.active_transform() else {
            self.state = DragState::Idle;
            return PointerResponse::Released;
        };
        if frame.is_collapsed() {
            self.state = DragState::Idle;
            return PointerResponse::Released;
        }

        let Some(handle) = self.hit_test(&frame, x, y) else {
            self.state = DragState::Idle;
            return PointerResponse::Released;
        };

        let center_dist = distance(x, y, frame.center_x, frame.center_y);
        self.state = match handle {
            Handle::Rotation => DragState::Rotate {
                start_angle: (y - frame.center_y).atan2(x - frame.center_x),
                start_rotation: transform.rotation,
            },
            Handle::Corner(_) => {
                if center_dist <= f64::EPSILON {
                    return PointerResponse::Released;
                }
                DragState::ScaleCorner {
                    start_dist: center_dist,
                    start_scale_x: transform.scale_x,
                    start_scale_y: transform.scale_y,
                }
            }
            Handle::Edge(edge) => {
                if center_dist <= f64::EPSILON {
                    return PointerResponse::Released;
                }
                DragState::ScaleEdge {
                    axis: edge.axis(),
                    start_dist: center_dist,
                    start_scale_x: transform.scale_x,
                    start_scale_y: transform.scale_y,
                }
            }
            Handle::Interior => DragState::Move { last_x: x, last_y: y },
        };

        debug!(?handle, "Edit frame drag started");
        PointerResponse::Captured
    }

    /// Continue a drag. Every mutation recomposites synchronously through
    /// the session before this returns.
    pub fn pointer_move(
        &mut self,
        session: &mut CustomizerSession,
        x: f64,
        y: f64,
    ) -> Result<(), SessionError> {
        let frame = self.frame(session);
        let Some(transform) = session.active_transform() else {
            // Active layer vanished mid-drag (deleted); drop the drag.
            self.state = DragState::Idle;
            return Ok(());
        };

        match self.state {
            DragState::Idle => Ok(()),
            DragState::Move { last_x, last_y } => {
                let dx = x - last_x;
                let dy = y - last_y;
                // Counter-rotate the pointer delta by the frame's rotation so
                // dragging feels axis-consistent regardless of orientation.
                let cos_r = transform.rotation.cos();
                let sin_r = transform.rotation.sin();
                let local_dx = cos_r * dx + sin_r * dy;
                let local_dy = -sin_r * dx + cos_r * dy;

                let feel = self.transform_settings.move_feel;
                let offset_x = transform.offset_x + local_dx / frame.size * feel;
                let offset_y = transform.offset_y + local_dy / frame.size * feel;

                self.state = DragState::Move { last_x: x, last_y: y };
                session.set_offset(offset_x, offset_y)
            }
            DragState::ScaleCorner {
                start_dist,
                start_scale_x,
                start_scale_y,
            } => {
                let factor = distance(x, y, frame.center_x, frame.center_y) / start_dist;
                session.set_scale(start_scale_x * factor, start_scale_y * factor)
            }
            DragState::ScaleEdge {
                axis,
                start_dist,
                start_scale_x,
                start_scale_y,
            } => {
                let factor = distance(x, y, frame.center_x, frame.center_y) / start_dist;
                match axis {
                    Axis::X => session.set_scale(start_scale_x * factor, start_scale_y),
                    Axis::Y => session.set_scale(start_scale_x, start_scale_y * factor),
                }
            }
            DragState::Rotate {
                start_angle,
                start_rotation,
            } => {
                let angle = (y - frame.center_y).atan2(x - frame.center_x);
                session.set_rotation(start_rotation + (angle - start_angle))
            }
        }
    }

    /// End the drag and return to `Idle`
    pub fn pointer_up(&mut self) {
        self.state = DragState::Idle;
    }
}

fn distance(x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt()
}
