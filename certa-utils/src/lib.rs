//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

pub mod cancel;
pub mod task;
pub mod telemetry;
pub mod traffic;
pub mod transport;
