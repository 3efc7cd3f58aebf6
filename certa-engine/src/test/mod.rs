//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//


use std::sync::Once;

use tracing::info;

static INIT: Once = Once::new();

// ===== helper functions =====

// Initializes tracing subscriber.
fn init_tracing() {
    tracing_subscriber::fmt::Subscriber::builder()
        .with_target(false)
        .with_ansi(false)
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("starting");
}

// ===== global functions =====

// Common initialization required by all tests.
pub fn setup() {
    INIT.call_once(|| {
        init_tracing();
    });
}
