// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Serial (UART / pseudo-terminal) transport.
//
// The device is opened non-blocking and switched to raw mode at the
// configured baud rate. Messages are wrapped in the framing from
// `super::framing`; only frames addressed to the agent are delivered.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::framing::{encode_frame, FrameDecoder};
use super::{Endpoint, InputPacket, OutputPacket, Transport, TransportError};

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    Some(match baud {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        _ => return None,
    })
}

fn configure_raw(fd: RawFd, baud: u32) -> io::Result<()> {
    let speed = baud_constant(baud).ok_or_else(|| {
        io::Error::new(ErrorKind::InvalidInput, format!("unsupported baud rate {}", baud))
    })?;

    let mut tio = std::mem::MaybeUninit::<libc::termios>::uninit();
    // SAFETY:
    // - fd is an open descriptor owned by the caller's File
    // - tio points to writable storage large enough for a termios
    if unsafe { libc::tcgetattr(fd, tio.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: tcgetattr returned 0, so it fully initialised tio.
    let mut tio = unsafe { tio.assume_init() };

    // SAFETY:
    // - tio is a valid, initialised termios owned by this frame
    // - cfmakeraw and cfsetspeed only modify the struct in place
    let rc = unsafe {
        libc::cfmakeraw(&mut tio);
        libc::cfsetspeed(&mut tio, speed)
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;

    // SAFETY:
    // - fd is still open
    // - tio is a valid termios prepared above
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Wait for the descriptor to become readable. Returns false on timeout.
fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    // SAFETY:
    // - pfd is a single valid pollfd borrowed exclusively for the call
    // - nfds is 1, matching the one entry passed
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    match rc {
        -1 => {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                Ok(false)
            } else {
                Err(err)
            }
        }
        0 => Ok(false),
        _ if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 => {
            Err(io::Error::new(ErrorKind::BrokenPipe, "serial device error"))
        }
        _ => Ok(true),
    }
}

struct SerialInput {
    file: File,
    decoder: FrameDecoder,
    ready: VecDeque<InputPacket>,
}

/// Serial transport speaking the framed protocol on one device.
pub struct SerialTransport {
    device: String,
    baud: u32,
    local_address: u8,
    max_payload: usize,
    input: Mutex<SerialInput>,
    output: Mutex<File>,
    name: String,
}

impl SerialTransport {
    /// Open `device` at `baud`; `local_address` is the agent's framing address.
    pub fn open(
        device: &str,
        baud: u32,
        local_address: u8,
        max_payload: usize,
    ) -> Result<Self, TransportError> {
        let (input, output) = Self::open_device(device, baud)
            .map_err(|e| TransportError::Server(format!("{}: {}", device, e)))?;
        log::info!("[XRCE-SERIAL] opened {} at {} baud", device, baud);
        Ok(Self {
            device: device.to_string(),
            baud,
            local_address,
            max_payload,
            input: Mutex::new(SerialInput {
                file: input,
                decoder: FrameDecoder::new(max_payload),
                ready: VecDeque::new(),
            }),
            output: Mutex::new(output),
            name: format!("serial:{}", device),
        })
    }

    fn open_device(device: &str, baud: u32) -> io::Result<(File, File)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(device)?;
        match configure_raw(file.as_raw_fd(), baud) {
            Ok(()) => {}
            // Plain files and pipes have no line settings.
            Err(e) if e.raw_os_error() == Some(libc::ENOTTY) => {
                log::debug!("[XRCE-SERIAL] {} is not a terminal", device);
            }
            Err(e) => return Err(e),
        }
        let writer = file.try_clone()?;
        Ok((file, writer))
    }

    fn drain_readable(&self, input: &mut SerialInput) -> io::Result<()> {
        let mut chunk = [0u8; 256];
        loop {
            match input.file.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    for &b in &chunk[..n] {
                        match input.decoder.push(b) {
                            Some(Ok(frame)) if frame.dst == self.local_address => {
                                input.ready.push_back(InputPacket {
                                    source: Endpoint::Serial { address: frame.src },
                                    message: frame.payload,
                                });
                            }
                            Some(Ok(frame)) => {
                                log::debug!(
                                    "[XRCE-SERIAL] frame for {} ignored (agent is {})",
                                    frame.dst,
                                    self.local_address
                                );
                            }
                            Some(Err(e)) => log::warn!("[XRCE-SERIAL] dropped frame: {:?}", e),
                            None => {}
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl Transport for SerialTransport {
    fn recv_message(&self, timeout: Duration) -> Result<InputPacket, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut input = self.input.lock();
        loop {
            if let Some(pkt) = input.ready.pop_front() {
                return Ok(pkt);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let readable = poll_readable(input.file.as_raw_fd(), remaining)
                .map_err(|e| TransportError::Server(e.to_string()))?;
            if readable {
                self.drain_readable(&mut input)
                    .map_err(|e| TransportError::Server(e.to_string()))?;
            }
        }
    }

    fn send_message(&self, packet: &OutputPacket) -> Result<(), TransportError> {
        let Endpoint::Serial { address } = packet.destination else {
            return Err(TransportError::Connection(format!(
                "not a serial endpoint: {}",
                packet.destination
            )));
        };
        if packet.message.len() > self.max_payload {
            return Err(TransportError::Connection(format!(
                "message of {} bytes exceeds frame limit {}",
                packet.message.len(),
                self.max_payload
            )));
        }
        let frame = encode_frame(self.local_address, address, &packet.message);

        let mut out = self.output.lock();
        let mut data = frame.as_slice();
        while !data.is_empty() {
            match out.write(data) {
                Ok(0) => return Err(TransportError::Server("serial write returned 0".into())),
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::Server(e.to_string())),
            }
        }
        Ok(())
    }

    fn recover(&self) -> bool {
        match Self::open_device(&self.device, self.baud) {
            Ok((reader, writer)) => {
                let mut input = self.input.lock();
                input.file = reader;
                input.decoder = FrameDecoder::new(self.max_payload);
                input.ready.clear();
                *self.output.lock() = writer;
                log::info!("[XRCE-SERIAL] reopened {}", self.device);
                true
            }
            Err(e) => {
                log::error!("[XRCE-SERIAL] cannot reopen {}: {}", self.device, e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::framing::{Frame, FrameDecoder};
    use std::ffi::CStr;
    use std::os::unix::io::FromRawFd;

    /// Open a pseudo-terminal pair; returns the master side and the slave path.
    fn open_pty() -> (File, String) {
        // SAFETY: plain libc calls on a descriptor we own; ptsname is read
        // immediately, before any other pty call in this thread.
        unsafe {
            let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            assert!(master >= 0);
            assert_eq!(libc::grantpt(master), 0);
            assert_eq!(libc::unlockpt(master), 0);
            let name = CStr::from_ptr(libc::ptsname(master))
                .to_string_lossy()
                .into_owned();
            (File::from_raw_fd(master), name)
        }
    }

    #[test]
    fn test_serial_over_pty() {
        let (mut master, slave) = open_pty();
        let transport = SerialTransport::open(&slave, 115200, 0, 512).unwrap();

        // One frame for someone else, then one for the agent.
        master.write_all(&encode_frame(5, 9, b"other")).unwrap();
        master.write_all(&encode_frame(5, 0, b"\x7e\x01ping")).unwrap();

        let pkt = transport.recv_message(Duration::from_secs(2)).unwrap();
        assert_eq!(pkt.source, Endpoint::Serial { address: 5 });
        assert_eq!(pkt.message, b"\x7e\x01ping");

        transport
            .send_message(&OutputPacket {
                destination: Endpoint::Serial { address: 5 },
                message: b"pong".to_vec(),
            })
            .unwrap();

        let mut dec = FrameDecoder::new(512);
        let mut buf = [0u8; 64];
        let n = master.read(&mut buf).unwrap();
        let frames: Vec<_> = buf[..n].iter().filter_map(|&b| dec.push(b)).collect();
        assert_eq!(
            frames,
            vec![Ok(Frame {
                src: 0,
                dst: 5,
                payload: b"pong".to_vec()
            })]
        );
    }

    #[test]
    fn test_serial_timeout_and_bad_destination() {
        let (_master, slave) = open_pty();
        let transport = SerialTransport::open(&slave, 115200, 0, 512).unwrap();
        assert_eq!(
            transport.recv_message(Duration::from_millis(20)).unwrap_err(),
            TransportError::Timeout
        );
        let err = transport
            .send_message(&OutputPacket {
                destination: Endpoint::Can { id: 3 },
                message: vec![1],
            })
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[test]
    fn test_unsupported_baud_rate() {
        let (_master, slave) = open_pty();
        assert!(matches!(
            SerialTransport::open(&slave, 12345, 0, 512),
            Err(TransportError::Server(_))
        ));
    }

    #[test]
    fn test_recover_reopens_device() {
        let (_master, slave) = open_pty();
        let transport = SerialTransport::open(&slave, 57600, 1, 512).unwrap();
        assert!(transport.recover());
        assert_eq!(transport.name(), format!("serial:{}", slave));
    }
}
