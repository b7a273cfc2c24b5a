use std::{
    collections::HashMap,
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener},
};

use log::{debug, error};
use replicon_wire::prelude::*;

use super::tcp::FramedStream;

/// The socket used by the server.
///
/// Opens a registry channel for every accepted client.
pub struct ExampleServer {
    listener: TcpListener,
    connections: HashMap<ChannelId, FramedStream>,
}

impl ExampleServer {
    /// Opens an example server socket on the specified port.
    ///
    /// Use 0 to pick a free port.
    pub fn new(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            connections: Default::default(),
        })
    }

    /// Returns local address if the server is running.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns the number of connected clients.
    pub fn connected_clients(&self) -> usize {
        self.connections.len()
    }

    /// Returns channels of all connected clients.
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.connections.keys().copied()
    }

    /// Accepts new clients and applies messages received from connected clients.
    ///
    /// Clients that closed the connection or sent malformed data are disconnected.
    pub fn receive(&mut self, registry: &mut AuthorityRegistry) {
        self.accept(registry);

        let mut disconnected = Vec::new();
        for (&channel_id, connection) in &mut self.connections {
            loop {
                match connection.receive() {
                    Ok(Some(message)) => {
                        if let Err(e) = registry.receive(channel_id, message) {
                            error!("disconnecting `{channel_id}` due to malformed message: {e}");
                            disconnected.push(channel_id);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        if e.kind() == io::ErrorKind::UnexpectedEof {
                            debug!("`{channel_id}` closed the connection");
                        } else {
                            error!("disconnecting `{channel_id}` due to message read error: {e}");
                        }
                        disconnected.push(channel_id);
                        break;
                    }
                }
            }
        }

        for channel_id in disconnected {
            self.disconnect(channel_id, registry);
        }
    }

    /// Sends data accumulated in registry channels to connected clients.
    ///
    /// Should be called after [`AuthorityRegistry::tick`].
    pub fn send(&mut self, registry: &mut AuthorityRegistry) {
        let mut disconnected = Vec::new();
        for (&channel_id, connection) in &mut self.connections {
            let channel = registry
                .channel(channel_id)
                .expect("all connections should have open channels");
            if channel.is_pending_clear() {
                continue;
            }

            let data = registry
                .send_data(channel_id)
                .expect("all connections should have open channels");
            if let Err(e) = connection.send(data) {
                error!("disconnecting `{channel_id}` due to error: {e}");
                disconnected.push(channel_id);
            }
        }

        for channel_id in disconnected {
            self.disconnect(channel_id, registry);
        }
    }

    /// Closes the connection and the registry channel of a client.
    pub fn disconnect(&mut self, channel_id: ChannelId, registry: &mut AuthorityRegistry) {
        if self.connections.remove(&channel_id).is_some() {
            debug!("disconnecting `{channel_id}`");
            registry.close_connection(channel_id);
        }
    }

    fn accept(&mut self, registry: &mut AuthorityRegistry) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => match FramedStream::new(stream) {
                    Ok(connection) => {
                        let channel_id = registry.open_connection();
                        debug!("connecting `{addr}` as `{channel_id}`");
                        self.connections.insert(channel_id, connection);
                    }
                    Err(e) => error!("unable to configure stream for `{addr}`: {e}"),
                },
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        error!("unable to accept connection: {e}");
                    }
                    break;
                }
            }
        }
    }
}
