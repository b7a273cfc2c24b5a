use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream},
};

use bytes::{Buf, Bytes, BytesMut};

/// Non-blocking stream that sends and receives length-prefixed messages.
pub(super) struct FramedStream {
    stream: TcpStream,

    /// Bytes read from the socket that don't form a complete message yet.
    received: BytesMut,

    /// Whether the peer closed its side.
    ///
    /// Already received messages can still be read.
    closed: bool,
}

impl FramedStream {
    pub(super) fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            received: Default::default(),
            closed: false,
        })
    }

    pub(super) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub(super) fn send(&mut self, message: &[u8]) -> io::Result<()> {
        let len = u32::try_from(message.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "message should fit into `u32` length",
            )
        })?;
        self.stream.write_all(&len.to_le_bytes())?;
        self.stream.write_all(message)?;

        Ok(())
    }

    /// Returns the next complete message.
    ///
    /// Returns [`None`] if no complete message is available yet
    /// and [`io::ErrorKind::UnexpectedEof`] once the peer closed the connection
    /// and all its messages were read.
    pub(super) fn receive(&mut self) -> io::Result<Option<Bytes>> {
        self.read_available()?;

        if let Some(message) = self.split_message() {
            return Ok(Some(message));
        }

        if self.closed {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        Ok(None)
    }

    fn read_available(&mut self) -> io::Result<()> {
        let mut chunk = [0; 4096];
        while !self.closed {
            match self.stream.read(&mut chunk) {
                Ok(0) => self.closed = true,
                Ok(len) => self.received.extend_from_slice(&chunk[..len]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn split_message(&mut self) -> Option<Bytes> {
        let mut header = &self.received[..];
        let len = header.try_get_u32_le().ok()? as usize;
        if header.len() < len {
            return None;
        }

        self.received.advance(size_of::<u32>());
        Some(self.received.split_to(len).freeze())
    }
}
