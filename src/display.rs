//! Display Module
//!
//! Opens the pair of X11 connections and negotiates the five extensions
//! the compositor depends on. Requests and their replies travel on the
//! request connection; asynchronous notifications are drained from the
//! event connection by the main loop. Damage objects must live on the
//! event connection, so every extension is version-negotiated on both.

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::protocol::composite::ConnectionExt as _;
use x11rb::protocol::damage::ConnectionExt as _;
use x11rb::protocol::render::ConnectionExt as _;
use x11rb::protocol::shape::ConnectionExt as _;
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xproto::{ConnectionExt as _, Screen, Window};
use x11rb::rust_connection::RustConnection;

const COMPOSITE_MIN: (u32, u32) = (0, 3);
const SHAPE_MIN: (u32, u32) = (1, 1);
const RENDER_MIN: (u32, u32) = (0, 11);
const DAMAGE_MIN: (u32, u32) = (1, 1);
const XFIXES_MIN: (u32, u32) = (2, 0);

/// One negotiated extension: wire codes plus the version the server
/// granted this connection.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionInfo {
    pub major_opcode: u8,
    pub first_event: u8,
    pub first_error: u8,
    pub version: (u32, u32),
}

/// The five extensions the compositor requires. Absence of any is fatal.
#[derive(Debug, Clone, Copy)]
pub struct Extensions {
    pub composite: ExtensionInfo,
    pub shape: ExtensionInfo,
    pub render: ExtensionInfo,
    pub damage: ExtensionInfo,
    pub xfixes: ExtensionInfo,
}

/// The compositor's two connections to the same display.
pub struct DisplayPair {
    /// Drained by the main loop; owns the Damage objects.
    pub event: RustConnection,
    /// Synchronous request/reply traffic; owns everything else.
    pub request: RustConnection,
    pub screen_num: usize,
    pub extensions: Extensions,
}

impl DisplayPair {
    /// Connect twice to `$DISPLAY` and negotiate extensions on both
    /// connections.
    pub fn open() -> Result<Self> {
        let (event, screen_num) =
            x11rb::connect(None).context("failed to open the event connection to the X server")?;
        let (request, request_screen) = x11rb::connect(None)
            .context("failed to open the request connection to the X server")?;
        if screen_num != request_screen {
            bail!(
                "connections landed on different screens ({} vs {})",
                screen_num,
                request_screen
            );
        }

        // The server answers BadRequest to any extension request on a
        // connection that has not run that extension's QueryVersion.
        let extensions = negotiate(&request).context("extension negotiation (request connection)")?;
        negotiate(&event).context("extension negotiation (event connection)")?;

        info!(
            "Connected to X server, screen {}: Composite {}.{}, Render {}.{}, Damage {}.{}, XFixes {}.{}, Shape {}.{}",
            screen_num,
            extensions.composite.version.0,
            extensions.composite.version.1,
            extensions.render.version.0,
            extensions.render.version.1,
            extensions.damage.version.0,
            extensions.damage.version.1,
            extensions.xfixes.version.0,
            extensions.xfixes.version.1,
            extensions.shape.version.0,
            extensions.shape.version.1,
        );

        Ok(Self {
            event,
            request,
            screen_num,
            extensions,
        })
    }

    pub fn screen(&self) -> &Screen {
        &self.request.setup().roots[self.screen_num]
    }

    pub fn root(&self) -> Window {
        self.screen().root
    }
}

/// Query presence and version of all five extensions on one connection.
fn negotiate(conn: &RustConnection) -> Result<Extensions> {
    let composite_codes = query_presence(conn, "Composite")?;
    let shape_codes = query_presence(conn, "SHAPE")?;
    let render_codes = query_presence(conn, "RENDER")?;
    let damage_codes = query_presence(conn, "DAMAGE")?;
    let xfixes_codes = query_presence(conn, "XFIXES")?;

    let reply = conn
        .composite_query_version(0, 4)?
        .reply()
        .context("Composite QueryVersion failed")?;
    let composite = describe(
        "Composite",
        composite_codes,
        (reply.major_version, reply.minor_version),
        COMPOSITE_MIN,
    )?;

    let reply = conn
        .shape_query_version()?
        .reply()
        .context("Shape QueryVersion failed")?;
    let shape = describe(
        "Shape",
        shape_codes,
        (reply.major_version.into(), reply.minor_version.into()),
        SHAPE_MIN,
    )?;

    let reply = conn
        .render_query_version(0, 11)?
        .reply()
        .context("Render QueryVersion failed")?;
    let render = describe(
        "Render",
        render_codes,
        (reply.major_version, reply.minor_version),
        RENDER_MIN,
    )?;

    let reply = conn
        .damage_query_version(1, 1)?
        .reply()
        .context("Damage QueryVersion failed")?;
    let damage = describe(
        "Damage",
        damage_codes,
        (reply.major_version, reply.minor_version),
        DAMAGE_MIN,
    )?;

    let reply = conn
        .xfixes_query_version(2, 0)?
        .reply()
        .context("XFixes QueryVersion failed")?;
    let xfixes = describe(
        "XFixes",
        xfixes_codes,
        (reply.major_version, reply.minor_version),
        XFIXES_MIN,
    )?;

    Ok(Extensions {
        composite,
        shape,
        render,
        damage,
        xfixes,
    })
}

fn query_presence(conn: &RustConnection, name: &str) -> Result<(u8, u8, u8)> {
    let reply = conn
        .query_extension(name.as_bytes())?
        .reply()
        .with_context(|| format!("QueryExtension {} failed", name))?;
    if !reply.present {
        bail!("required X extension {} is not present on the server", name);
    }
    Ok((reply.major_opcode, reply.first_event, reply.first_error))
}

fn describe(
    name: &str,
    codes: (u8, u8, u8),
    version: (u32, u32),
    required: (u32, u32),
) -> Result<ExtensionInfo> {
    check_version(name, version, required)?;
    let info = ExtensionInfo {
        major_opcode: codes.0,
        first_event: codes.1,
        first_error: codes.2,
        version,
    };
    debug!(
        "Extension {} {}.{}: opcode {}, first event {}, first error {}",
        name, info.version.0, info.version.1, info.major_opcode, info.first_event, info.first_error
    );
    Ok(info)
}

/// A different major version than required, or an older minor, is fatal.
fn check_version(name: &str, got: (u32, u32), required: (u32, u32)) -> Result<()> {
    if got.0 != required.0 || got.1 < required.1 {
        bail!(
            "X extension {} version {}.{} is incompatible (need {}.{})",
            name,
            got.0,
            got.1,
            required.0,
            required.1
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_version_passes() {
        assert!(check_version("Damage", (1, 1), DAMAGE_MIN).is_ok());
        assert!(check_version("Damage", (1, 4), DAMAGE_MIN).is_ok());
    }

    #[test]
    fn older_minor_is_rejected() {
        assert!(check_version("Render", (0, 10), RENDER_MIN).is_err());
    }

    #[test]
    fn different_major_is_rejected() {
        assert!(check_version("Composite", (1, 0), COMPOSITE_MIN).is_err());
        assert!(check_version("XFixes", (1, 9), XFIXES_MIN).is_err());
    }
}
