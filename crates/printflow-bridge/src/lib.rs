// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintFlow Bridge: the channel between the running service and the desktop
// surface (preferences window, tray icon).
//
// State flows out as immutable `ServiceSnapshot`s on a watch channel;
// commands flow in on a bounded mpsc channel.  Nothing is shared mutably
// across the boundary, and the service never waits on the surface.

pub mod control;
pub mod headless;
pub mod surface;

pub use control::{
    ControlBridge, ControlCommand, ControlHandle, LastError, PrinterView, ServiceSnapshot,
    TrustInfo,
};
pub use headless::HeadlessSurface;
pub use surface::{DesktopSurface, drive_surface};
