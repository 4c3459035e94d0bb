use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use super::{Inbound, Outbound, Transport, TransportError};

pub fn link() -> (NetLink, TransportLink) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        NetLink {
            inbound: inbound_rx,
            outbound: outbound_tx,
        },
        TransportLink {
            inbound: inbound_tx,
            outbound: outbound_rx,
        },
    )
}

/// Simulation side: inbound events are drained by the tick, outbound
/// messages leave in production order.
#[derive(Debug)]
pub struct NetLink {
    inbound: UnboundedReceiver<Inbound>,
    outbound: UnboundedSender<Outbound>,
}

impl NetLink {
    pub fn try_recv(&mut self) -> Option<Inbound> {
        match self.inbound.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Returns `false` once the transport side is gone.
    pub fn send(&self, outbound: Outbound) -> bool {
        self.outbound.send(outbound).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }
}

#[derive(Debug)]
pub struct TransportLink {
    inbound: UnboundedSender<Inbound>,
    outbound: UnboundedReceiver<Outbound>,
}

impl TransportLink {
    pub fn deliver(&self, event: Inbound) -> bool {
        self.inbound.send(event).is_ok()
    }

    pub fn try_next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    pub fn pump(&mut self, transport: &mut dyn Transport) -> Result<(), TransportError> {
        for event in transport.poll()? {
            if self.inbound.send(event).is_err() {
                return Err(TransportError::Closed);
            }
        }

        loop {
            match self.outbound.try_recv() {
                Ok(out) => {
                    if let Err(e) =
                        transport.send(out.target, &out.message, out.message.is_reliable())
                    {
                        log::warn!(
                            "Failed to send {:?} to {:?}: {}",
                            out.message.kind(),
                            out.target,
                            e
                        );
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    transport.flush()?;
                    return Err(TransportError::Closed);
                }
            }
        }

        transport.flush()
    }
}

/// Runs a transport on its own thread until shut down or until the
/// simulation side goes away.
pub struct NetworkPump {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl NetworkPump {
    const IDLE_SLEEP: Duration = Duration::from_millis(1);

    pub fn spawn(mut transport: Box<dyn Transport>, mut link: TransportLink) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("network-pump".to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) && transport.is_open() {
                    match link.pump(transport.as_mut()) {
                        Ok(()) => {}
                        Err(TransportError::Closed) => break,
                        Err(e) => log::error!("Network error: {}", e),
                    }
                    thread::sleep(Self::IDLE_SLEEP);
                }
                transport.close();
                log::debug!("Network pump stopped");
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to start network pump: {}", e);
                running.store(false, Ordering::SeqCst);
                None
            }
        };

        Self { running, handle }
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Network pump thread panicked");
            }
        }
    }
}

impl Drop for NetworkPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}
