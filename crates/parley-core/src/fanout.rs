//! Observable fire-and-forget fan-out.
//!
//! Each target of a fan-out gets its own task. The caller receives a
//! [`FanOut`] immediately and may drop it (the sends continue) or await
//! [`FanOut::wait`] to collect one [`DeliveryReport`] per target.

use std::net::SocketAddr;
use tokio::sync::mpsc;

use crate::error::ChatError;

/// Outcome of one send.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Peer address the frame was sent to
    pub target: SocketAddr,
    /// `Ok` if the frame was written and the connection closed cleanly
    pub outcome: Result<(), ChatError>,
}

impl DeliveryReport {
    /// Did the send succeed?
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Handle to a set of in-flight sends.
#[derive(Debug)]
pub struct FanOut {
    reports: Option<mpsc::UnboundedReceiver<DeliveryReport>>,
    targets: Vec<SocketAddr>,
}

impl FanOut {
    pub(crate) fn new(
        reports: mpsc::UnboundedReceiver<DeliveryReport>,
        targets: Vec<SocketAddr>,
    ) -> Self {
        Self {
            reports: Some(reports),
            targets,
        }
    }

    /// A fan-out with no targets.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            reports: None,
            targets: Vec::new(),
        }
    }

    /// Addresses the frame is being sent to.
    #[must_use]
    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    /// Number of sends started.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True if nothing was sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Fold another fan-out's targets and reports into this one.
    #[must_use]
    pub fn merge(self, other: FanOut) -> FanOut {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut targets = self.targets;
        targets.extend(other.targets);
        for mut source in [self.reports, other.reports].into_iter().flatten() {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(report) = source.recv().await {
                    if tx.send(report).is_err() {
                        break;
                    }
                }
            });
        }
        FanOut::new(rx, targets)
    }

    /// Wait for every send to finish and return their reports.
    ///
    /// Reports arrive in completion order, not target order.
    pub async fn wait(mut self) -> Vec<DeliveryReport> {
        let mut out = Vec::with_capacity(self.targets.len());
        if let Some(reports) = self.reports.as_mut() {
            while out.len() < self.targets.len() {
                match reports.recv().await {
                    Some(report) => out.push(report),
                    None => break,
                }
            }
        }
        out
    }
}
