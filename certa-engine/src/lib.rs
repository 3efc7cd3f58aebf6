//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod certify;
pub mod config;
pub mod debug;
pub mod delta;
pub mod error;
pub mod rule;
pub mod run;
pub mod snapshot;
#[cfg(feature = "testing")]
pub mod test;
pub mod validate;
pub mod verdict;
pub mod watch;
