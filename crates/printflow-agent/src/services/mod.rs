// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Startup and lifecycle services for the agent binary.

pub mod context;
pub mod data_dir;
pub mod maintenance;
pub mod network;
