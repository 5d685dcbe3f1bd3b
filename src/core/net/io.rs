use crate::common::error::{Result, ServerError};
use crate::core::net::fd::Socket;

/// Outcome of a single non-blocking read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadStatus {
    Data(usize),
    WouldBlock,
    Eof,
}

pub fn read_non_blocking(socket: &Socket, buf: &mut [u8]) -> Result<ReadStatus> {
    loop {
        let n = unsafe {
            libc::read(
                socket.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n > 0 {
            return Ok(ReadStatus::Data(n as usize));
        }
        if n == 0 {
            return Ok(ReadStatus::Eof);
        }
        let err = std::io::Error::last_os_error();
        match err.kind() {
            std::io::ErrorKind::Interrupted => continue,
            std::io::ErrorKind::WouldBlock => return Ok(ReadStatus::WouldBlock),
            _ => return Err(ServerError::IoError(err)),
        }
    }
}

/// Returns the number of bytes written; 0 when the socket would block.
pub fn write_non_blocking(socket: &Socket, buf: &[u8]) -> Result<usize> {
    loop {
        let n = unsafe {
            libc::send(
                socket.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = std::io::Error::last_os_error();
        match err.kind() {
            std::io::ErrorKind::Interrupted => continue,
            std::io::ErrorKind::WouldBlock => return Ok(0),
            _ => return Err(ServerError::IoError(err)),
        }
    }
}
