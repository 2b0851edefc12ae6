// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printflow-document: turns a job payload into the exact byte stream handed
// to the spooler.
//
// Most formats pass through untouched; images are converted to a 1-bit
// ESC/POS raster, and the auto-cut flag appends the paper-cut command.

pub mod escpos;

pub use escpos::{RasterImage, render};
