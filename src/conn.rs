//! The capability every pooled connection implements

use std::io;
use std::net::{Shutdown, TcpStream};

use crate::errors::BoxError;

/// A closable resource that can live in a [`ChannelPool`](crate::ChannelPool)
///
/// The pool never looks inside a connection. It only ever calls `close` on
/// connections it decides to discard.
///
/// # Examples
///
/// ```
/// use connpool::{BoxError, Conn};
///
/// struct Session {
///     id: u32,
/// }
///
/// impl Conn for Session {
///     fn close(self) -> Result<(), BoxError> {
///         println!("closing session {}", self.id);
///         Ok(())
///     }
/// }
/// ```
pub trait Conn: Send + 'static {
    /// Release whatever the connection holds
    fn close(self) -> Result<(), BoxError>;
}

impl Conn for TcpStream {
    fn close(self) -> Result<(), BoxError> {
        match self.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already hung up; the socket is released on drop either way.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
