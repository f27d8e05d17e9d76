//! In-memory carrier for tests
//!
//! A crossed pair of bounded channels standing in for a WebSocket. Frames
//! keep their boundaries and arrive in order, which is all the relay core
//! assumes of its carrier.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{CarrierError, CarrierSink, CarrierSource};

pub struct PipeSink {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
}

pub struct PipeSource {
    rx: mpsc::Receiver<Bytes>,
}

/// Create a connected pair of carrier endpoints.
///
/// Frames sent on the first endpoint's sink arrive at the second
/// endpoint's source and vice versa.
pub fn pipe_pair(capacity: usize) -> ((PipeSink, PipeSource), (PipeSink, PipeSource)) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (
        (
            PipeSink {
                tx: Mutex::new(Some(a_tx)),
            },
            PipeSource { rx: a_rx },
        ),
        (
            PipeSink {
                tx: Mutex::new(Some(b_tx)),
            },
            PipeSource { rx: b_rx },
        ),
    )
}

#[async_trait]
impl CarrierSink for PipeSink {
    async fn send_frame(&self, frame: Bytes) -> Result<(), CarrierError> {
        // clone the sender out so the lock is not held across the await
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => tx.send(frame).await.map_err(|_| CarrierError::Closed),
            None => Err(CarrierError::Closed),
        }
    }

    async fn close(&self) {
        *self.tx.lock() = None;
    }
}

#[async_trait]
impl CarrierSource for PipeSource {
    async fn next_frame(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}
