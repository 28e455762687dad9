// Shared diagnostic pipe allocation
//
// Both transcoder processes write their textual diagnostics to one merged
// stream. The write end is handed to the children (duplicated once), the
// read end stays in the parent for the error reader thread. This is the only
// platform-specific piece of the orchestration; everything above it works in
// terms of `File` and `Stdio`.

use std::fs::File;
use std::io;
use std::process::Stdio;

/// One diagnostic pipe: the parent-held read end plus one `Stdio` write end
/// per child process.
pub struct DiagnosticPipe {
    pub reader: File,
    pub writer_a: Stdio,
    pub writer_b: Stdio,
}

#[cfg(unix)]
pub fn diagnostic_pipe() -> io::Result<DiagnosticPipe> {
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let read_end = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write_end = unsafe { OwnedFd::from_raw_fd(fds[1]) };

    // Mark close-on-exec so the raw ends never leak into a child; spawn
    // re-dups the write end onto the child's stderr slot, which clears the
    // flag on the duplicate.
    for fd in [&read_end, &write_end] {
        let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
        if flags < 0
            || unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0
        {
            return Err(io::Error::last_os_error());
        }
    }

    let write_clone = write_end.try_clone()?;
    Ok(DiagnosticPipe {
        reader: File::from(read_end),
        writer_a: Stdio::from(write_end),
        writer_b: Stdio::from(write_clone),
    })
}

#[cfg(not(unix))]
pub fn diagnostic_pipe() -> io::Result<DiagnosticPipe> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "shared diagnostic pipe is only implemented on unix targets",
    ))
}
