//! Byte transports for the Raptor serial link.

use std::io;

/// A half-duplex byte link to the camera's serial port.
///
/// `read_chunk` blocks for at most the link's configured read timeout and
/// returns `Ok(0)` when nothing arrived in that time.
pub trait SerialLink: Send {
    /// Drop any bytes already waiting in the receive buffer.
    fn discard_input(&mut self) -> io::Result<()>;

    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl SerialLink for Box<dyn SerialLink> {
    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }

    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_frame(bytes)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_chunk(buf)
    }
}

#[cfg(feature = "serial")]
pub use self::port::SerialPortLink;

#[cfg(feature = "serial")]
mod port {
    use super::SerialLink;
    use serialport::{ClearBuffer, SerialPort};
    use std::io::{self, Read, Write};
    use std::time::Duration;
    use tracing::debug;

    /// Host serial port (`/dev/ttyS0`, USB adapters) carrying Raptor frames.
    pub struct SerialPortLink {
        port: Box<dyn SerialPort>,
    }

    impl SerialPortLink {
        /// Open `path` at `baud`, 8N1, with the given per-read timeout.
        pub fn open(path: &str, baud: u32, read_timeout: Duration) -> io::Result<Self> {
            let port = serialport::new(path, baud).timeout(read_timeout).open()?;
            debug!("Opened serial port {path} at {baud} baud");
            Ok(Self { port })
        }
    }

    impl SerialLink for SerialPortLink {
        fn discard_input(&mut self) -> io::Result<()> {
            self.port.clear(ClearBuffer::Input)?;
            Ok(())
        }

        fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.port.write_all(bytes)?;
            self.port.flush()
        }

        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(e),
            }
        }
    }
}
