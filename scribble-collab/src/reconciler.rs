//! Merges remote stroke snapshots into the canvas.
//!
//! ```text
//! StrokeSet snapshot ──► replace remote layer ──► request repaint
//!                                                    │ (collapsed until
//!                                                    ▼  the next frame)
//! frame tick ──► clear ──► remote layer ──► local layer ──► in-progress
//! ```
//!
//! The local layer holds strokes this session committed that have not come
//! back in a snapshot yet, plus strokes whose commit failed. Drawing it on
//! every repaint keeps a clear from erasing local work.

use std::collections::BTreeMap;

use scribble_core::{Stroke, StrokeId, StrokeSet, UserId};

use crate::surface::DrawSurface;

/// At most one outstanding repaint request.
#[derive(Debug, Default)]
pub struct RepaintScheduler {
    pending: bool,
    requested: u64,
    superseded: u64,
}

impl RepaintScheduler {
    /// Ask for a repaint on the next frame. A request already pending is
    /// replaced, never stacked.
    pub fn request(&mut self) {
        if self.pending {
            self.superseded += 1;
        }
        self.pending = true;
        self.requested += 1;
    }

    /// Consume the pending request, if any.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn requested(&self) -> u64 {
        self.requested
    }

    /// Requests folded into one that was already pending.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }
}

#[derive(Debug, Default)]
pub struct LocalLayer {
    unconfirmed: BTreeMap<StrokeId, Stroke>,
    failed: Vec<Stroke>,
}

impl LocalLayer {
    pub fn unconfirmed(&self) -> impl Iterator<Item = (&StrokeId, &Stroke)> {
        self.unconfirmed.iter()
    }

    pub fn failed(&self) -> &[Stroke] {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.unconfirmed.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RenderReconciler {
    owner: UserId,
    remote: StrokeSet,
    local: LocalLayer,
    scheduler: RepaintScheduler,
    repaints: u64,
}

impl RenderReconciler {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            remote: StrokeSet::new(),
            local: LocalLayer::default(),
            scheduler: RepaintScheduler::default(),
            repaints: 0,
        }
    }

    /// Replace the remote layer with a fresh snapshot.
    pub fn on_stroke_set(&mut self, set: StrokeSet) {
        let owner = &self.owner;
        self.local.unconfirmed.retain(|id, _| !set.contains(owner, id));
        self.remote = set;
        self.scheduler.request();
    }

    /// A stroke was handed to the store under `id`.
    pub fn track_commit(&mut self, id: StrokeId, stroke: Stroke) {
        if !self.remote.contains(&self.owner, &id) {
            self.local.unconfirmed.insert(id, stroke);
        }
        self.scheduler.request();
    }

    /// A stroke that could not be committed. It stays on screen.
    pub fn track_failed(&mut self, stroke: Stroke) {
        self.local.failed.push(stroke);
        self.scheduler.request();
    }

    pub fn request_repaint(&mut self) {
        self.scheduler.request();
    }

    pub fn on_resize<S: DrawSurface + ?Sized>(&mut self, surface: &mut S, width: u32, height: u32) {
        surface.resize(width, height);
        self.scheduler.request();
    }

    /// Display refresh tick. Repaints if a request is pending.
    pub fn on_frame<S: DrawSurface + ?Sized>(&mut self, surface: &mut S, in_progress: Option<&Stroke>) -> bool {
        if !self.scheduler.take() {
            return false;
        }
        self.repaint(surface, in_progress);
        true
    }

    fn repaint<S: DrawSurface + ?Sized>(&mut self, surface: &mut S, in_progress: Option<&Stroke>) {
        surface.clear();
        let remote = self.remote.iter().map(|(_, _, stroke)| stroke);
        let unconfirmed = self.local.unconfirmed.values();
        let failed = self.local.failed.iter();
        for stroke in remote.chain(unconfirmed).chain(failed).chain(in_progress) {
            if stroke.is_renderable() {
                surface.draw_polyline(&stroke.points);
            }
        }
        self.repaints += 1;
        log::trace!(
            "Repaint #{}: {} remote, {} local stroke(s)",
            self.repaints,
            self.remote.len(),
            self.local.len()
        );
    }

    pub fn strokes(&self) -> &StrokeSet {
        &self.remote
    }

    pub fn local_layer(&self) -> &LocalLayer {
        &self.local
    }

    pub fn scheduler(&self) -> &RepaintScheduler {
        &self.scheduler
    }

    pub fn repaint_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    pub fn repaint_count(&self) -> u64 {
        self.repaints
    }
}
