//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use tokio::sync::watch;
use tokio::time::Instant;

// Owner side of an external cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

// Observer side of an external cancellation signal.
//
// A token fires when its handle requests cancellation or when its optional
// deadline passes, whichever comes first. A token whose handle was dropped
// without cancelling only fires on its deadline.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

// ===== impl CancelHandle =====

impl CancelHandle {
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        let token = CancelToken {
            rx: Some(rx),
            deadline: None,
        };
        (CancelHandle { tx }, token)
    }

    // Raises the cancellation signal. Calling it more than once is harmless.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

// ===== impl CancelToken =====

impl CancelToken {
    // Returns a token that never fires.
    pub fn never() -> CancelToken {
        CancelToken {
            rx: None,
            deadline: None,
        }
    }

    // Returns a token that only fires once the deadline passes.
    pub fn at(deadline: Instant) -> CancelToken {
        CancelToken {
            rx: None,
            deadline: Some(deadline),
        }
    }

    // Adds (or tightens) a deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> CancelToken {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn is_cancelled(&self) -> bool {
        let signalled = self.rx.as_ref().is_some_and(|rx| *rx.borrow());
        let expired = self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        signalled || expired
    }

    // Completes once the token fires.
    pub async fn cancelled(&self) {
        let signal = async {
            match self.rx.clone() {
                Some(mut rx) => {
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        // Handle dropped without cancelling.
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = signal => {}
            _ = deadline => {}
        }
    }
}

impl Default for CancelToken {
    fn default() -> CancelToken {
        CancelToken::never()
    }
}
