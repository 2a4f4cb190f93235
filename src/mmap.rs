use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;

fn shm_name(name: &str) -> io::Result<CString> {
    if !name.starts_with('/') || name[1..].contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid shared memory name {name:?}: must be \"/name\" with no other '/'"),
        ));
    }
    CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Opens the POSIX shared memory object `name` read-write.
///
/// With `create` the object is created (empty) if missing; without it a
/// missing object is an error and nothing is created.
pub(crate) fn open_shared_memory(name: &str, create: bool) -> io::Result<OwnedFd> {
    let name = shm_name(name)?;
    let flags = if create {
        libc::O_CREAT | libc::O_RDWR
    } else {
        libc::O_RDWR
    };
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, 0o600) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Current size of the object behind `fd`, in bytes.
pub(crate) fn shared_memory_size(fd: &OwnedFd) -> io::Result<usize> {
    let mut stat = unsafe { std::mem::zeroed::<libc::stat>() };
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } == -1 {
        return Err(io::Error::last_os_error());
    }
    usize::try_from(stat.st_size).map_err(io::Error::other)
}

/// Sizes a freshly created object. Never call this on an object other
/// processes may have mapped: shrinking it faults their next access.
pub(crate) fn resize_shared_memory(fd: &OwnedFd, size: usize) -> io::Result<()> {
    let size = libc::off_t::try_from(size).map_err(io::Error::other)?;
    if unsafe { libc::ftruncate(fd.as_raw_fd(), size) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Maps `size` bytes of `fd` read-write and shared.
///
/// The mapping stays valid once the descriptor is closed.
pub(crate) fn map_shared_memory(fd: &OwnedFd, size: usize) -> io::Result<NonNull<u8>> {
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr.cast::<u8>())
        .ok_or_else(|| io::Error::other("mmap returned a null address"))
}

/// Unmaps a region previously returned by [`map_shared_memory`].
///
/// # Safety
///
/// `ptr` and `size` must describe a live mapping, and no references into it
/// may be used afterwards.
pub(crate) unsafe fn unmap_shared_memory(ptr: NonNull<u8>, size: usize) -> io::Result<()> {
    unsafe {
        if libc::munmap(ptr.as_ptr().cast(), size) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Removes the shared memory object `name`. Existing mappings stay valid.
pub(crate) fn unlink_shared_memory(name: &str) -> io::Result<()> {
    let name = shm_name(name)?;
    if unsafe { libc::shm_unlink(name.as_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
