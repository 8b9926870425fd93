//! Paint Module
//!
//! Recomposites the scene onto the overlay child. Render Composite is
//! used rather than CopyArea: it blends sources of differing depths onto
//! the 32-bit overlay and honors alpha.

use anyhow::Result;
use tracing::trace;
use x11rb::connection::Connection;
use x11rb::protocol::render::{ConnectionExt as _, PictOp};
use x11rb::rust_connection::RustConnection;

use crate::overlay::Overlay;
use crate::scene::Scene;

/// Composite every visible window over the overlay child, bottom-to-top.
///
/// Windows that are unmapped, or mapped but not yet backed by a picture,
/// are skipped; the stacking order decides who wins overlapping pixels.
pub fn repaint(conn: &RustConnection, scene: &Scene, overlay: &Overlay) -> Result<()> {
    for window in scene.paint_order() {
        if window == scene.root() {
            continue;
        }
        let Some(record) = scene.window(window) else {
            continue;
        };
        if !record.visible {
            continue;
        }
        let Some(picture) = scene.picture(window) else {
            continue;
        };
        trace!(
            "Compositing window 0x{:x} at ({}, {}) size {}x{}",
            record.window,
            record.x,
            record.y,
            record.width,
            record.height
        );
        conn.render_composite(
            PictOp::OVER,
            picture,
            x11rb::NONE,
            overlay.picture,
            0,
            0,
            0,
            0,
            record.x,
            record.y,
            record.width,
            record.height,
        )?;
    }
    conn.flush()?;
    Ok(())
}
