//! Status codes returned by the connector and by backends.
//!
//! This mirrors the kind table in the design doc: the connector never
//! remaps a backend error to a different kind, it only adds the kinds it
//! owns itself (`EBusy`, `EInval`, `EXDev`, `ENoSys`).

use thiserror::Error;

/// Outcome of a connector or backend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Status {
    /// Success.
    #[error("ok")]
    Ok,
    /// No such entry, or the entry lives under an unmount-pending mount.
    #[error("no such entry")]
    ENoEnt,
    /// Mount point has children cached, or unmount found outstanding opens.
    #[error("resource busy")]
    EBusy,
    /// Mount target is not a directory.
    #[error("invalid argument")]
    EInval,
    /// Rename or link crossed a mount boundary.
    #[error("cross-device link")]
    EXDev,
    /// Operation is not implemented.
    #[error("function not implemented")]
    ENoSys,
    /// Whatever the backend returned, passed through verbatim.
    #[error("backend error (errno {0})")]
    Errno(i32),
}

impl Status {
    /// Converts the status to a libc error code for the kernel-facing reply.
    ///
    /// `Ok` has no errno representation; callers must branch on success
    /// separately before calling this.
    pub fn to_errno(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::ENoEnt => libc::ENOENT,
            Status::EBusy => libc::EBUSY,
            Status::EInval => libc::EINVAL,
            Status::EXDev => libc::EXDEV,
            Status::ENoSys => libc::ENOSYS,
            Status::Errno(e) => e,
        }
    }

    /// Wraps a raw `io::Error` as a passthrough backend status.
    pub fn from_io_error(e: &std::io::Error) -> Self {
        Status::Errno(e.raw_os_error().unwrap_or(libc::EIO))
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl From<std::io::Error> for Status {
    fn from(e: std::io::Error) -> Self {
        Status::from_io_error(&e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(Status::ENoEnt.to_errno(), libc::ENOENT);
        assert_eq!(Status::EBusy.to_errno(), libc::EBUSY);
        assert_eq!(Status::EInval.to_errno(), libc::EINVAL);
        assert_eq!(Status::EXDev.to_errno(), libc::EXDEV);
        assert_eq!(Status::ENoSys.to_errno(), libc::ENOSYS);
        assert_eq!(Status::Errno(libc::EACCES).to_errno(), libc::EACCES);
    }

    #[test]
    fn io_error_passthrough() {
        let e = std::io::Error::from_raw_os_error(libc::EPERM);
        let status: Status = e.into();
        assert_eq!(status.to_errno(), libc::EPERM);
    }

    #[test]
    fn io_error_without_os_error_maps_to_eio() {
        let e = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(Status::from_io_error(&e).to_errno(), libc::EIO);
    }
}
