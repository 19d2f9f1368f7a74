pub mod connection;
pub mod listener;

pub use connection::{handle_connection, ConnectionSettings};
pub use listener::Listener;

use crate::application::config::models::Config;
use crate::application::dispatcher::RequestDispatcher;
use crate::common::error::Result;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Accepts clients and serves each connection on its own thread.
pub struct Server {
    listener: Listener,
    dispatcher: Arc<RequestDispatcher>,
    settings: Arc<ConnectionSettings>,
}

impl Server {
    pub fn bind(config: &Config) -> Result<Self> {
        let listener = Listener::bind(config.server.listen)?;
        // SERVER_PORT reflects the port actually bound.
        let dispatcher = RequestDispatcher::new(config, listener.addr().port())?;
        Ok(Self {
            listener,
            dispatcher: Arc::new(dispatcher),
            settings: Arc::new(ConnectionSettings::from_config(&config.server)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.addr()
    }

    pub fn dispatcher(&self) -> Arc<RequestDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Serve forever.
    pub fn run(self) -> Result<()> {
        info!(
            "listening on http://{} (max {} concurrent scripts)",
            self.local_addr(),
            self.dispatcher.admission().limit()
        );

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    // e.g. out of file descriptors; don't spin
                    thread::sleep(Duration::from_millis(50));
                    continue;
                }
            };

            let dispatcher = Arc::clone(&self.dispatcher);
            let settings = Arc::clone(&self.settings);
            let spawned = thread::Builder::new()
                .name(format!("conn-{}", peer))
                .spawn(move || {
                    if let Err(e) = handle_connection(stream, peer, &dispatcher, &settings) {
                        warn!("connection from {} failed: {}", peer, e);
                    }
                });
            if let Err(e) = spawned {
                warn!("could not start a thread for {}: {}", peer, e);
            }
        }
    }
}
