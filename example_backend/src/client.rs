use std::{
    io,
    net::{SocketAddr, TcpStream},
};

use log::debug;
use replicon_wire::prelude::*;

use super::tcp::FramedStream;

/// The socket used by the client.
pub struct ExampleClient {
    stream: FramedStream,
    connected: bool,
}

impl ExampleClient {
    /// Opens an example client socket connected to a server on the specified port.
    pub fn new(addr: impl Into<SocketAddr>) -> io::Result<Self> {
        let stream = TcpStream::connect(addr.into())?;
        Ok(Self {
            stream: FramedStream::new(stream)?,
            connected: true,
        })
    }

    /// Returns local address if connected.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Returns true if the server didn't close the connection.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Applies all messages received from the server to the directory.
    ///
    /// Returns an error if the connection broke or the server sent malformed data.
    /// Messages received before the error stay applied.
    pub fn receive(&mut self, directory: &mut InboundDirectory) -> io::Result<()> {
        if !self.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }

        loop {
            match self.stream.receive() {
                Ok(Some(message)) => directory
                    .receive(message)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        debug!("server closed the connection");
                    }
                    self.connected = false;
                    return Err(e);
                }
            }
        }
    }

    /// Sends messages posted on mirrors to the server.
    pub fn send(&mut self, directory: &mut InboundDirectory) -> io::Result<()> {
        if let Some(message) = directory.take_messages() {
            self.stream.send(&message)?;
        }

        Ok(())
    }
}
