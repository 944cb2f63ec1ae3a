//! Raw file descriptor helpers shared by output capture and child spawning.

use std::os::unix::io::RawFd;

/// Create a pipe pair, returning (read_fd, write_fd).
///
/// Both ends are close-on-exec; callers clear the flag on whatever they hand
/// to a child.
pub fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    // pipe2 sets the flag atomically, so a fork on another thread never
    // inherits these ends.
    #[cfg(target_os = "linux")]
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    #[cfg(not(target_os = "linux"))]
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    #[cfg(not(target_os = "linux"))]
    for &fd in &fds {
        set_cloexec(fd, true);
    }
    Ok((fds[0], fds[1]))
}

/// Set or clear close-on-exec on a descriptor.
pub fn set_cloexec(fd: RawFd, on: bool) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return;
        }
        let flags = if on {
            flags | libc::FD_CLOEXEC
        } else {
            flags & !libc::FD_CLOEXEC
        };
        libc::fcntl(fd, libc::F_SETFD, flags);
    }
}

/// Close a raw file descriptor.
pub fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}
