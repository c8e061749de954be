//! Fake backend that counts open resources
//!
//! Shared by the unit tests and, through `tests/common`, the integration
//! tests. The parent module must have `ConnectionOptions`, `Connector`,
//! `Error` and `Result` in scope.

use super::{ConnectionOptions, Connector, Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const KNOWN_KEYS: &[&str] = &["host", "port", "dbname", "user", "password", "mode"];

/// Shared open/close accounting
#[derive(Clone, Default, Debug)]
pub(crate) struct Ledger {
    open: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl Ledger {
    pub(crate) fn open(&self) -> FakeConn {
        self.open.fetch_add(1, Ordering::SeqCst);
        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        FakeConn {
            ledger: self.clone(),
            id,
        }
    }

    pub(crate) fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn total_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Wait (bounded) for aborted tasks to drop their resources
    pub(crate) async fn settle(&self) -> usize {
        for _ in 0..400 {
            if self.open_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.open_count()
    }
}

/// Fake native connection; closes itself on drop
#[derive(Debug)]
pub(crate) struct FakeConn {
    ledger: Ledger,
    pub(crate) id: usize,
}

impl Drop for FakeConn {
    fn drop(&mut self) {
        self.ledger.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connector over [`Ledger`]
///
/// Options are whitespace-separated `key=value` pairs over a small key set.
/// `mode=refuse` makes the handshake fail after the resource was opened.
#[derive(Clone, Debug, Default)]
pub(crate) struct CountingConnector {
    pub(crate) ledger: Ledger,
    pub(crate) delay: Duration,
}

impl CountingConnector {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            ledger: Ledger::default(),
            delay,
        }
    }
}

impl Connector for CountingConnector {
    type Conn = FakeConn;

    fn validate(&self, options: &ConnectionOptions) -> Result<()> {
        for pair in options.as_str().split_whitespace() {
            let (key, _) = pair.split_once('=').ok_or_else(|| {
                Error::Config(format!("missing \"=\" after \"{}\"", pair))
            })?;
            if !KNOWN_KEYS.contains(&key) {
                return Err(Error::Config(format!(
                    "invalid connection option \"{}\"",
                    key
                )));
            }
        }
        Ok(())
    }

    async fn connect(&self, options: &ConnectionOptions) -> Result<FakeConn> {
        self.validate(options)?;
        let conn = self.ledger.open();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if options.as_str().contains("mode=refuse") {
            return Err(Error::Authentication(
                "password authentication failed for user \"fake\"".into(),
            ));
        }
        Ok(conn)
    }
}
