//
// analysis/engine.rs
//
// Boundary to the external analysis engine
//

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

use crate::findings::RawFinding;
use crate::registry::OpenFile;

/// Sink the engine streams raw findings into, in any file order
#[derive(Debug, Clone)]
pub struct FindingListener {
    tx: mpsc::UnboundedSender<(Url, RawFinding)>,
}

impl FindingListener {
    pub fn handle(&self, uri: Url, finding: RawFinding) {
        if self.tx.send((uri, finding)).is_err() {
            log::trace!("Finding delivered after the batch stopped collecting");
        }
    }
}

/// Listener plus the receiving end the executor drains once the engine returns
pub fn finding_channel() -> (FindingListener, mpsc::UnboundedReceiver<(Url, RawFinding)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FindingListener { tx }, rx)
}

/// An analysis engine. Implementations need not be reentrant: the scheduler
/// never runs two calls at once.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Analyze `files`, reporting every finding through `listener`.
    ///
    /// `token` is cooperative; an engine may ignore it and finish normally,
    /// in which case its results are still applied.
    async fn analyze(
        &self,
        files: &[OpenFile],
        listener: FindingListener,
        token: CancellationToken,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_feeds_channel() {
        let (listener, mut rx) = finding_channel();
        let uri = Url::parse("file:///a.py").unwrap();
        listener.handle(uri.clone(), RawFinding::new("r", "m"));
        drop(listener);

        let (got_uri, finding) = rx.recv().await.unwrap();
        assert_eq!(got_uri, uri);
        assert_eq!(finding.rule_key, "r");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (listener, rx) = finding_channel();
        drop(rx);
        listener.handle(Url::parse("file:///a.py").unwrap(), RawFinding::new("r", "m"));
    }
}
