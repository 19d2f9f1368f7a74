use crate::common::error::Result;
use std::net::{SocketAddr, TcpListener, TcpStream};

/// Listener manages the listening socket for accepting connections
pub struct Listener {
    socket: TcpListener,
    addr: SocketAddr,
}

impl Listener {
    /// Bind to `addr`. Port 0 picks a free port; see [`addr`](Listener::addr).
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = TcpListener::bind(addr)?;
        let addr = socket.local_addr()?;
        Ok(Self { socket, addr })
    }

    /// Block until a client connects
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        Ok(self.socket.accept()?)
    }

    /// Address actually bound
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}
