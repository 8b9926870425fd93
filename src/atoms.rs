//! Atoms Module
//!
//! Interned atoms and the identity properties the compositor publishes on
//! its own windows.

use anyhow::{Context, Result};
use std::os::unix::ffi::OsStrExt;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt as _, PropMode, Window};
use x11rb::wrapper::ConnectionExt as _;

/// Holds all interned atoms.
#[derive(Debug)]
pub struct Atoms {
    pub net_wm_pid: Atom,
}

impl Atoms {
    /// Intern all required atoms.
    pub fn new<C: Connection>(conn: &C) -> Result<Self> {
        let intern = |name: &str| -> Result<Atom> {
            Ok(conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
        };

        Ok(Self {
            net_wm_pid: intern("_NET_WM_PID")?,
        })
    }

    /// Publish `_NET_WM_PID` and `WM_CLIENT_MACHINE` on `window`. EWMH
    /// requires the two to be set together for the PID to be meaningful.
    pub fn publish_identity<C: Connection>(&self, conn: &C, window: Window) -> Result<()> {
        conn.change_property32(
            PropMode::REPLACE,
            window,
            self.net_wm_pid,
            AtomEnum::CARDINAL,
            &[std::process::id()],
        )?;

        let hostname = nix::unistd::gethostname().context("failed to read the host name")?;
        conn.change_property8(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_CLIENT_MACHINE,
            AtomEnum::STRING,
            hostname.as_bytes(),
        )?;

        Ok(())
    }
}
