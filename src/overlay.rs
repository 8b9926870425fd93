//! Overlay Module
//!
//! Compositor bootstrap: redirects root subwindows to off-screen storage,
//! claims the Composite overlay window, and builds the ARGB child surface
//! all compositing lands on. Both overlays get an empty input shape so
//! pointer events fall through to the windows below.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use tracing::{info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::composite::{ConnectionExt as _, Redirect};
use x11rb::protocol::render::{
    ConnectionExt as _, CreatePictureAux, PictType, Pictformat, Picture,
};
use x11rb::protocol::shape::{ConnectionExt as _, SK, SO};
use x11rb::protocol::xproto::{
    ChangeWindowAttributesAux, ClipOrdering, Colormap, ColormapAlloc, ConnectionExt as _,
    CreateWindowAux, EventMask, Visualid, Window, WindowClass,
};
use x11rb::rust_connection::RustConnection;

use crate::atoms::Atoms;
use crate::display::DisplayPair;

/// Render pict formats, indexed by the visual they apply to.
pub struct PictureFormats {
    by_visual: HashMap<Visualid, Pictformat>,
    argb32: (Pictformat, Visualid),
}

impl PictureFormats {
    /// Fetch the server's pict formats and locate the ARGB32 format and a
    /// visual rendering it on the given screen.
    pub fn query(conn: &RustConnection, screen_num: usize) -> Result<Self> {
        let reply = conn
            .render_query_pict_formats()?
            .reply()
            .context("Render QueryPictFormats failed")?;

        let mut by_visual = HashMap::new();
        for screen in &reply.screens {
            for depth in &screen.depths {
                for pict_visual in &depth.visuals {
                    by_visual.insert(pict_visual.visual, pict_visual.format);
                }
            }
        }

        // ARGB32: a direct format at depth 32 with an 8-bit alpha channel
        // in the top byte.
        let format = reply
            .formats
            .iter()
            .filter(|info| (info.type_, info.depth) == (PictType::DIRECT, 32))
            .filter(|info| {
                let d = info.direct;
                (d.red_mask, d.green_mask, d.blue_mask, d.alpha_mask) == (0xff, 0xff, 0xff, 0xff)
            })
            .find(|info| {
                let d = info.direct;
                (d.red_shift, d.green_shift, d.blue_shift, d.alpha_shift) == (16, 8, 0, 24)
            })
            .context("server advertises no ARGB32 pict format")?;

        let screen = reply
            .screens
            .get(screen_num)
            .context("screen missing from QueryPictFormats reply")?;
        let visual = screen
            .depths
            .iter()
            .flat_map(|d| &d.visuals)
            .find(|v| v.format == format.id)
            .context("no visual renders the ARGB32 pict format on this screen")?
            .visual;

        Ok(Self {
            by_visual,
            argb32: (format.id, visual),
        })
    }

    pub fn format_for_visual(&self, visual: Visualid) -> Option<Pictformat> {
        self.by_visual.get(&visual).copied()
    }

    pub fn argb32_format(&self) -> Pictformat {
        self.argb32.0
    }

    pub fn argb32_visual(&self) -> Visualid {
        self.argb32.1
    }
}

/// The overlay surfaces the compositor paints onto.
pub struct Overlay {
    /// The server-supplied Composite overlay window.
    pub overlay: Window,
    /// Our 32-bit ARGB child of the overlay; the actual canvas.
    pub child: Window,
    pub colormap: Colormap,
    /// Render picture bound to `child`.
    pub picture: Picture,
    pub width: u16,
    pub height: u16,
}

impl Overlay {
    /// Run the bootstrap sequence. All requests go to the request
    /// connection except the event subscriptions, which must live on the
    /// connection the main loop drains.
    pub fn acquire(display: &DisplayPair, atoms: &Atoms) -> Result<(Self, PictureFormats)> {
        let conn = &display.request;
        let screen = display.screen();
        let root = screen.root;
        let (width, height) = (screen.width_in_pixels, screen.height_in_pixels);
        if width == 0 || height == 0 {
            bail!("root reports a degenerate geometry {}x{}", width, height);
        }

        // Manual redirection: the server stops painting subwindows to the
        // screen and we own the final presentation. Automatic mode would
        // have the server recompose without alpha.
        conn.composite_redirect_subwindows(root, Redirect::MANUAL)
            .context("CompositeRedirectSubwindows failed")?;
        info!("Redirected subwindows of root 0x{:x} (Manual)", root);

        // The overlay sits above all normal windows and below the screen
        // saver, with root geometry; the request also maps it.
        let overlay = conn
            .composite_get_overlay_window(root)?
            .reply()
            .context("CompositeGetOverlayWindow failed")?
            .overlay_win;
        info!("Using Composite Overlay Window 0x{:x}", overlay);

        let formats = PictureFormats::query(conn, display.screen_num)?;
        let visual = formats.argb32_visual();

        // Depth-32 windows require an explicit matching colormap plus
        // background and border pixels; fully transparent for both.
        let colormap = conn.generate_id()?;
        conn.create_colormap(ColormapAlloc::NONE, colormap, root, visual)?;

        let child = conn.generate_id()?;
        conn.create_window(
            32,
            child,
            overlay,
            0,
            0,
            width,
            height,
            0,
            WindowClass::INPUT_OUTPUT,
            visual,
            &CreateWindowAux::new()
                .background_pixel(0)
                .border_pixel(0)
                .colormap(colormap),
        )
        .context("failed to create the ARGB overlay child")?;

        let picture = conn.generate_id()?;
        conn.render_create_picture(picture, child, formats.argb32_format(), &CreatePictureAux::new())
            .context("failed to create the overlay picture")?;

        // Empty input shapes on both overlays: clicks pass through to
        // whatever is stacked below.
        for window in [overlay, child] {
            conn.shape_rectangles(
                SO::SET,
                SK::INPUT,
                ClipOrdering::UNSORTED,
                window,
                0,
                0,
                &[],
            )?;
        }

        // Substructure-notify only; substructure-redirect would make us a
        // window manager, which we are not.
        display
            .event
            .change_window_attributes(
                root,
                &ChangeWindowAttributesAux::new().event_mask(EventMask::SUBSTRUCTURE_NOTIFY),
            )?
            .check()
            .context("failed to select SubstructureNotify on the root")?;
        display.event.change_window_attributes(
            child,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::EXPOSURE),
        )?;
        display.event.flush()?;

        atoms
            .publish_identity(conn, child)
            .context("failed to publish identity properties")?;

        conn.map_window(child)?;
        conn.flush()?;
        info!(
            "Overlay child 0x{:x} mapped at {}x{} (depth 32, visual 0x{:x})",
            child, width, height, visual
        );

        Ok((
            Self {
                overlay,
                child,
                colormap,
                picture,
                width,
                height,
            },
            formats,
        ))
    }

    /// Free everything in reverse creation order. Failures here are
    /// logged, never fatal, so they cannot mask the error that ended the
    /// run.
    pub fn release(&self, conn: &RustConnection) {
        if let Err(e) = conn.render_free_picture(self.picture) {
            warn!("Failed to free overlay picture: {}", e);
        }
        if let Err(e) = conn.destroy_window(self.child) {
            warn!("Failed to destroy overlay child: {}", e);
        }
        if let Err(e) = conn.free_colormap(self.colormap) {
            warn!("Failed to free overlay colormap: {}", e);
        }
        if let Err(e) = conn.composite_release_overlay_window(self.overlay) {
            warn!("Failed to release the overlay window: {}", e);
        }
        if let Err(e) = conn.flush() {
            warn!("Failed to flush shutdown cleanup: {}", e);
        }
    }
}
