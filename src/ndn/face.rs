use crate::ndn::name::Name;
use crate::ndn::packet::{Data, Interest};
use tokio::sync::mpsc;

/// Outbound traffic from the manager toward the transport.
#[derive(Debug, Clone)]
pub enum FaceRequest {
    ExpressInterest(Interest),
    PutData(Data),
    RegisterPrefix(Name),
    UnregisterPrefix(Name),
    Shutdown,
}

/// Inbound traffic from the transport toward the manager.
#[derive(Debug, Clone)]
pub enum FaceEvent {
    Data(Data),
    Interest(Interest),
    /// The transport gave up waiting for the named interest.
    InterestTimeout(Name),
}

/// The manager-side handle of a face. The transport side (a forwarder
/// driver, or a test harness) holds the matching `FaceDriver`.
pub struct Face {
    tx: mpsc::UnboundedSender<FaceRequest>,
    rx: mpsc::UnboundedReceiver<FaceEvent>,
}

/// The transport side of a face pair.
pub struct FaceDriver {
    pub requests: mpsc::UnboundedReceiver<FaceRequest>,
    pub events: mpsc::UnboundedSender<FaceEvent>,
}

impl Face {
    pub fn pair() -> (Face, FaceDriver) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        (
            Face {
                tx: req_tx,
                rx: ev_rx,
            },
            FaceDriver {
                requests: req_rx,
                events: ev_tx,
            },
        )
    }

    // A dropped transport is not an error at this seam; the manager observes
    // it as a closed event stream.
    pub fn express_interest(&self, interest: Interest) {
        let _ = self.tx.send(FaceRequest::ExpressInterest(interest));
    }

    pub fn put(&self, data: Data) {
        let _ = self.tx.send(FaceRequest::PutData(data));
    }

    pub fn register_prefix(&self, prefix: Name) {
        let _ = self.tx.send(FaceRequest::RegisterPrefix(prefix));
    }

    pub fn unregister_prefix(&self, prefix: Name) {
        let _ = self.tx.send(FaceRequest::UnregisterPrefix(prefix));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(FaceRequest::Shutdown);
    }

    /// Next transport event; `None` once the transport side is gone.
    pub async fn next_event(&mut self) -> Option<FaceEvent> {
        self.rx.recv().await
    }
}
