//! App Module
//!
//! The compositor's event loop. Drains the event connection, routes each
//! notification into the scene model, manages the per-window server
//! resources, and decides when the overlay needs recompositing.

use anyhow::{bail, Context, Result};
use std::io;
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::errors::ConnectionError;
use x11rb::protocol::damage::{ConnectionExt as _, ReportLevel};
use x11rb::protocol::render::{ConnectionExt as _, CreatePictureAux, Picture};
use x11rb::protocol::shape::SK;
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xproto::{ConnectionExt as _, Place, Window};
use x11rb::protocol::Event;

use crate::atoms::Atoms;
use crate::display::DisplayPair;
use crate::overlay::{Overlay, PictureFormats};
use crate::paint;
use crate::scene::Scene;

pub struct App {
    display: DisplayPair,
    scene: Scene,
    overlay: Overlay,
    formats: PictureFormats,
}

impl App {
    /// Connect, negotiate, and run the bootstrap sequence.
    pub fn new() -> Result<Self> {
        let display = DisplayPair::open()?;
        let atoms = Atoms::new(&display.request)?;
        let (overlay, formats) = Overlay::acquire(&display, &atoms)?;
        let scene = Scene::new(display.root());

        let damage_first_event = display.extensions.damage.first_event;
        debug!(
            "Damage notify events arrive at event code {}",
            damage_first_event
        );
        info!(
            "Compositor ready: {}x{} canvas on overlay child 0x{:x}",
            overlay.width, overlay.height, overlay.child
        );

        Ok(Self {
            display,
            scene,
            overlay,
            formats,
        })
    }

    /// Run until the server closes the event connection (clean shutdown)
    /// or an unrecoverable error surfaces. Cleanup runs on both paths and
    /// never masks the primary error.
    pub fn run(&mut self) -> Result<()> {
        let result = self.event_loop();
        self.overlay.release(&self.display.request);
        result
    }

    fn event_loop(&mut self) -> Result<()> {
        loop {
            let event = match self.display.event.wait_for_event() {
                Ok(event) => event,
                Err(ConnectionError::IoError(err)) if is_disconnect(&err) => {
                    info!("X server closed the event connection, shutting down");
                    return Ok(());
                }
                Err(err) => return Err(err).context("event connection failed"),
            };
            self.dispatch(event)?;
        }
    }

    /// Route one event. Model mutation completes before any repaint, so
    /// paint always observes a consistent scene.
    fn dispatch(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Error(err) => {
                bail!("X server reported an error: {:?}", err);
            }

            Event::CreateNotify(e) => {
                debug!("CreateNotify: window 0x{:x} under 0x{:x}", e.window, e.parent);
                self.scene
                    .add_window(e.parent, e.window, e.x, e.y, e.width, e.height)?;
                // Damage creation doubles as the notify subscription, so
                // the object must live on the event connection.
                let damage = self.display.event.generate_id()?;
                self.display
                    .event
                    .damage_create(damage, e.window, ReportLevel::NON_EMPTY)?;
                self.display.event.flush()?;
                self.scene.set_damage(e.window, damage)?;
            }

            Event::DestroyNotify(e) => {
                debug!("DestroyNotify: window 0x{:x}", e.window);
                let retired = self.scene.remove_window(e.window)?;
                for region in retired.regions {
                    self.display.request.xfixes_destroy_region(region)?;
                }
                for picture in retired.pictures {
                    self.display.request.render_free_picture(picture)?;
                }
                for damage in retired.damages {
                    self.display.event.damage_destroy(damage)?;
                }
                self.display.request.flush()?;
                self.display.event.flush()?;
            }

            Event::MapNotify(e) => {
                debug!("MapNotify: window 0x{:x}", e.window);
                self.scene.set_visible(e.window, true)?;
                if self.scene.picture(e.window).is_none() {
                    let picture = self.create_window_picture(e.window)?;
                    self.scene.set_picture(e.window, picture)?;
                }
                self.repaint()?;
            }

            Event::UnmapNotify(e) => {
                debug!("UnmapNotify: window 0x{:x}", e.window);
                self.scene.set_visible(e.window, false)?;
                self.repaint()?;
            }

            Event::ConfigureNotify(e) => {
                debug!(
                    "ConfigureNotify: window 0x{:x} at ({}, {}) size {}x{}, above 0x{:x}",
                    e.window, e.x, e.y, e.width, e.height, e.above_sibling
                );
                self.scene
                    .set_geometry(e.window, e.x, e.y, e.width, e.height)?;
                let above = (e.above_sibling != x11rb::NONE).then_some(e.above_sibling);
                self.scene.restack(e.window, above)?;

                let region = self.display.request.generate_id()?;
                self.display
                    .request
                    .xfixes_create_region_from_window(region, e.window, SK::BOUNDING)?;
                if let Some(stale) = self.scene.set_region(e.window, region)? {
                    self.display.request.xfixes_destroy_region(stale)?;
                }
                self.repaint()?;
            }

            Event::ReparentNotify(e) => {
                debug!("ReparentNotify: window 0x{:x} -> parent 0x{:x}", e.window, e.parent);
                self.scene.reparent(e.window, e.parent)?;
            }

            Event::CirculateNotify(e) => {
                debug!("CirculateNotify: window 0x{:x}, place {:?}", e.window, e.place);
                if e.place == Place::ON_TOP {
                    self.scene.raise(e.window)?;
                } else {
                    self.scene.lower(e.window)?;
                }
            }

            Event::GravityNotify(e) => {
                debug!("GravityNotify: window 0x{:x}", e.window);
                self.repaint()?;
            }

            Event::Expose(e) => {
                if e.window == self.overlay.child {
                    debug!("Expose on the overlay child, repainting");
                    self.repaint()?;
                } else {
                    debug!("Expose for unrelated window 0x{:x}, ignoring", e.window);
                }
            }

            Event::DamageNotify(e) => {
                // The damage object stays armed until its pending pixels
                // are subtracted, after the paint that consumed them.
                self.repaint()?;
                if self.scene.contains(e.drawable) {
                    self.display
                        .event
                        .damage_subtract(e.damage, x11rb::NONE, x11rb::NONE)?;
                    self.display.event.flush()?;
                } else {
                    // Destroyed mid-burst; its damage object is already
                    // gone (S6).
                    debug!("DamageNotify for departed window 0x{:x}", e.drawable);
                }
            }

            Event::ShapeNotify(_) | Event::XfixesSelectionNotify(_) | Event::XfixesCursorNotify(_) => {
                debug!("Unsolicited extension event, skipping: {}", event_name(&event));
            }

            Event::Unknown(_) => {
                bail!("unrecognized extension event on the event connection (no subscription)");
            }

            other => {
                bail!("unexpected core event on the event connection: {:?}", other);
            }
        }
        Ok(())
    }

    /// Bind a Render picture to a newly mapped window, using the pict
    /// format that matches the window's visual.
    fn create_window_picture(&self, window: Window) -> Result<Picture> {
        let attributes = self
            .display
            .request
            .get_window_attributes(window)?
            .reply()
            .with_context(|| format!("failed to query attributes of window 0x{:x}", window))?;
        let format = self
            .formats
            .format_for_visual(attributes.visual)
            .with_context(|| {
                format!(
                    "no pict format for visual 0x{:x} of window 0x{:x}",
                    attributes.visual, window
                )
            })?;
        let picture = self.display.request.generate_id()?;
        self.display
            .request
            .render_create_picture(picture, window, format, &CreatePictureAux::new())?;
        Ok(picture)
    }

    fn repaint(&self) -> Result<()> {
        paint::repaint(&self.display.request, &self.scene, &self.overlay)
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::ShapeNotify(_) => "ShapeNotify",
        Event::XfixesSelectionNotify(_) => "XFixesSelectionNotify",
        Event::XfixesCursorNotify(_) => "XFixesCursorNotify",
        _ => "unknown",
    }
}
