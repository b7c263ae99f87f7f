//! Pointer input → candidate stroke.
//!
//! ```text
//!            pointer_down                 pointer_leave
//!   Idle ───────────────► Capturing ─────────────────► Outside
//!    ▲                      │   ▲                         │
//!    │       pointer_up     │   └──── pointer_enter ──────┤
//!    └──────────────────────┘         (still pressed)     │
//!    ▲                                                    │
//!    └──── pointer_up / pointer_enter (released) ─────────┘
//! ```
//!
//! Every transition back to `Idle` hands the pending stroke out for commit.

use scribble_core::{Point, Stroke, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    /// Pointer left the canvas mid-stroke. The stroke is kept, painting stops.
    Outside,
}

pub struct StrokeCapture {
    owner: UserId,
    owner_email: Option<String>,
    min_distance: f64,
    state: CaptureState,
    pending: Option<Stroke>,
}

impl StrokeCapture {
    pub fn new(owner: UserId, owner_email: Option<String>, min_distance: f64) -> Self {
        Self {
            owner,
            owner_email,
            min_distance,
            state: CaptureState::Idle,
            pending: None,
        }
    }

    /// Start a stroke at `p`.
    ///
    /// Returns the previous stroke if its release was never seen; it is
    /// complete and must be committed before the new one.
    pub fn pointer_down(&mut self, p: Point, now_ms: i64) -> Option<Stroke> {
        let unfinished = self.take_pending();
        if unfinished.is_some() {
            log::debug!("Pointer down with a stroke still held, completing it");
        }
        self.pending = Some(Stroke::begin(self.owner.clone(), self.owner_email.clone(), p, now_ms));
        self.state = CaptureState::Capturing;
        unfinished
    }

    /// Extend the stroke. Returns the segment to paint, if `p` was kept.
    pub fn pointer_move(&mut self, p: Point) -> Option<(Point, Point)> {
        if self.state != CaptureState::Capturing {
            return None;
        }
        let stroke = self.pending.as_mut()?;
        let last = *stroke.last_point()?;
        if last.distance(&p) < self.min_distance {
            return None;
        }
        stroke.points.push(p);
        Some((last, p))
    }

    /// Release anywhere, inside the canvas or not.
    pub fn pointer_up(&mut self) -> Option<Stroke> {
        self.take_pending()
    }

    pub fn pointer_leave(&mut self) {
        if self.state == CaptureState::Capturing {
            self.state = CaptureState::Outside;
        }
    }

    /// Re-entry at `p`. `pressed` is whether the button is still held.
    ///
    /// Held: capture resumes on the same stroke. Released: the release
    /// happened outside unobserved, and the completed stroke is returned.
    /// The entry point itself is not recorded.
    pub fn pointer_enter(&mut self, _p: Point, pressed: bool) -> Option<Stroke> {
        if self.pending.is_none() {
            return None;
        }
        if pressed {
            self.state = CaptureState::Capturing;
            None
        } else {
            self.take_pending()
        }
    }

    fn take_pending(&mut self) -> Option<Stroke> {
        self.state = CaptureState::Idle;
        self.pending.take()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_drawing(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&Stroke> {
        self.pending.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> StrokeCapture {
        StrokeCapture::new(UserId::new("alice").unwrap(), Some("a@example.com".into()), 2.0)
    }

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_down_move_up() {
        let mut c = capture();
        assert!(c.pointer_down(pt(0.0, 0.0), 100).is_none());
        assert_eq!(c.state(), CaptureState::Capturing);
        assert_eq!(c.pointer_move(pt(10.0, 0.0)), Some((pt(0.0, 0.0), pt(10.0, 0.0))));

        let stroke = c.pointer_up().unwrap();
        assert_eq!(stroke.points, vec![pt(0.0, 0.0), pt(10.0, 0.0)]);
        assert_eq!(stroke.created_at, 100);
        assert_eq!(stroke.owner_email.as_deref(), Some("a@example.com"));
        assert_eq!(c.state(), CaptureState::Idle);
        assert!(!c.is_drawing());
    }

    #[test]
    fn test_distance_gate() {
        let mut c = capture();
        c.pointer_down(pt(0.0, 0.0), 0);
        assert!(c.pointer_move(pt(1.0, 1.0)).is_none());
        assert_eq!(c.pending().unwrap().points.len(), 1);
        // Exactly the threshold is kept.
        assert!(c.pointer_move(pt(2.0, 0.0)).is_some());
        assert_eq!(c.pending().unwrap().points.len(), 2);
    }

    #[test]
    fn test_move_without_down_is_ignored() {
        let mut c = capture();
        assert!(c.pointer_move(pt(50.0, 50.0)).is_none());
        assert!(c.pointer_up().is_none());
    }

    #[test]
    fn test_click_without_move_is_single_point_stroke() {
        let mut c = capture();
        c.pointer_down(pt(5.0, 5.0), 0);
        let stroke = c.pointer_up().unwrap();
        assert_eq!(stroke.points, vec![pt(5.0, 5.0)]);
    }

    #[test]
    fn test_resume_after_leave() {
        let mut c = capture();
        c.pointer_down(pt(10.0, 10.0), 0);
        c.pointer_move(pt(50.0, 10.0));
        c.pointer_leave();
        assert_eq!(c.state(), CaptureState::Outside);
        assert!(c.pointer_move(pt(70.0, 10.0)).is_none());

        assert!(c.pointer_enter(pt(80.0, 10.0), true).is_none());
        assert_eq!(c.state(), CaptureState::Capturing);
        c.pointer_move(pt(90.0, 10.0));

        let stroke = c.pointer_up().unwrap();
        assert_eq!(stroke.points, vec![pt(10.0, 10.0), pt(50.0, 10.0), pt(90.0, 10.0)]);
    }

    #[test]
    fn test_release_outside_completes_on_up() {
        let mut c = capture();
        c.pointer_down(pt(0.0, 0.0), 0);
        c.pointer_move(pt(20.0, 0.0));
        c.pointer_leave();
        let stroke = c.pointer_up().unwrap();
        assert_eq!(stroke.points.len(), 2);
        assert_eq!(c.state(), CaptureState::Idle);
    }

    #[test]
    fn test_enter_released_completes_stroke() {
        let mut c = capture();
        c.pointer_down(pt(0.0, 0.0), 0);
        c.pointer_leave();
        let stroke = c.pointer_enter(pt(5.0, 5.0), false).unwrap();
        assert_eq!(stroke.points, vec![pt(0.0, 0.0)]);
        assert_eq!(c.state(), CaptureState::Idle);
    }

    #[test]
    fn test_enter_without_stroke_is_noop() {
        let mut c = capture();
        assert!(c.pointer_enter(pt(5.0, 5.0), true).is_none());
        assert_eq!(c.state(), CaptureState::Idle);
    }

    #[test]
    fn test_down_with_held_stroke_completes_it() {
        let mut c = capture();
        c.pointer_down(pt(0.0, 0.0), 0);
        c.pointer_move(pt(30.0, 0.0));
        let previous = c.pointer_down(pt(100.0, 100.0), 10).unwrap();
        assert_eq!(previous.points.len(), 2);
        assert_eq!(c.pending().unwrap().points, vec![pt(100.0, 100.0)]);
        assert_eq!(c.pending().unwrap().created_at, 10);
    }
}
