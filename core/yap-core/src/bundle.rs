//! Worker sources embedded in the binary.
//!
//! The bootstrap writes these into the system directory on every start, so
//! the worker on disk always matches the supervisor that launches it.

/// A file materialised under the system directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundledFile {
    /// Path relative to the system directory.
    pub path: &'static str,
    pub contents: &'static [u8],
}

pub const WORKER_SCRIPT: BundledFile = BundledFile {
    path: "main.py",
    contents: include_bytes!("../worker/main.py"),
};

pub const DEPENDENCY_MANIFEST: BundledFile = BundledFile {
    path: "requirements.txt",
    contents: include_bytes!("../worker/requirements.txt"),
};

pub const WORKER_BUNDLE: &[BundledFile] = &[WORKER_SCRIPT, DEPENDENCY_MANIFEST];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_is_not_empty() {
        for file in WORKER_BUNDLE {
            assert!(!file.contents.is_empty(), "{} is empty", file.path);
        }
    }

    #[test]
    fn worker_announces_readiness() {
        let script = std::str::from_utf8(WORKER_SCRIPT.contents).unwrap();
        assert!(script.contains(crate::worker::READY_SENTINEL));
        assert!(script.contains("SIGUSR1"));
        assert!(script.contains("SIGUSR2"));
    }
}
