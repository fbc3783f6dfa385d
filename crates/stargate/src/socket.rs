//! Blocking socket abstraction for upgraded connections.
//!
//! A connection needs three handles on one socket: a read half owned by the
//! receive path, a write half shared by senders, and a control handle that
//! can shut the socket down while a reader is blocked. `TcpStream` provides
//! all three through `try_clone`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

pub trait Socket: Read + Write + Send + Sync + Sized + 'static {
    /// Another handle to the same underlying socket.
    fn try_clone(&self) -> io::Result<Self>;

    /// Shut down both directions. A reader blocked on any clone of this
    /// socket must return promptly afterwards.
    fn shutdown(&self) -> io::Result<()>;

    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for TcpStream {
    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

#[cfg(unix)]
impl Socket for std::os::unix::net::UnixStream {
    fn try_clone(&self) -> io::Result<Self> {
        std::os::unix::net::UnixStream::try_clone(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory socket for unit tests.

    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::Arc;

    use parking_lot::{Condvar, Mutex};

    use super::Socket;

    #[derive(Default)]
    struct Shared {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
        peer_closed: bool,
        shut_down: bool,
        write_error: Option<io::ErrorKind>,
    }

    /// Socket whose inbound bytes are scripted and whose outbound bytes are
    /// captured. Reads block until data arrives, the peer hangs up, or the
    /// socket is shut down.
    #[derive(Clone, Default)]
    pub(crate) struct MockSocket {
        shared: Arc<(Mutex<Shared>, Condvar)>,
    }

    impl MockSocket {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Queue bytes for the connection to read.
        pub(crate) fn push_inbound(&self, bytes: &[u8]) {
            let (lock, cond) = &*self.shared;
            lock.lock().inbound.extend(bytes);
            cond.notify_all();
        }

        /// Simulate the peer closing its end: reads drain then return 0.
        pub(crate) fn hang_up(&self) {
            let (lock, cond) = &*self.shared;
            lock.lock().peer_closed = true;
            cond.notify_all();
        }

        /// Make every subsequent write fail with `kind`.
        pub(crate) fn fail_writes(&self, kind: io::ErrorKind) {
            self.shared.0.lock().write_error = Some(kind);
        }

        pub(crate) fn written(&self) -> Vec<u8> {
            self.shared.0.lock().outbound.clone()
        }

        pub(crate) fn is_shut_down(&self) -> bool {
            self.shared.0.lock().shut_down
        }
    }

    impl Read for MockSocket {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let (lock, cond) = &*self.shared;
            let mut shared = lock.lock();
            loop {
                if shared.shut_down {
                    return Ok(0);
                }
                if !shared.inbound.is_empty() {
                    let n = buf.len().min(shared.inbound.len());
                    for (slot, byte) in buf.iter_mut().zip(shared.inbound.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
                if shared.peer_closed {
                    return Ok(0);
                }
                cond.wait(&mut shared);
            }
        }
    }

    impl Write for MockSocket {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut shared = self.shared.0.lock();
            if let Some(kind) = shared.write_error {
                return Err(io::Error::new(kind, "simulated write failure"));
            }
            if shared.shut_down {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "socket shut down"));
            }
            shared.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Socket for MockSocket {
        fn try_clone(&self) -> io::Result<Self> {
            Ok(self.clone())
        }

        fn shutdown(&self) -> io::Result<()> {
            let (lock, cond) = &*self.shared;
            lock.lock().shut_down = true;
            cond.notify_all();
            Ok(())
        }
    }
}
