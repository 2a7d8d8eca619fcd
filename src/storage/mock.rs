//! In-memory medium with failure injection, used by tests.

use super::{MediumKind, StorageMedium};
use crate::error::CamError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

type FileMap = Arc<Mutex<HashMap<String, Vec<u8>>>>;

pub struct MockMedium {
    kind: MediumKind,
    files: FileMap,
    present: AtomicBool,
    mount_ok: AtomicBool,
    fail_opens: AtomicUsize,
    mount_count: AtomicUsize,
    unmount_count: AtomicUsize,
}

impl MockMedium {
    pub fn new(kind: MediumKind) -> Self {
        Self {
            kind,
            files: Arc::new(Mutex::new(HashMap::new())),
            present: AtomicBool::new(true),
            mount_ok: AtomicBool::new(true),
            fail_opens: AtomicUsize::new(0),
            mount_count: AtomicUsize::new(0),
            unmount_count: AtomicUsize::new(0),
        }
    }

    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub fn set_mount_ok(&self, ok: bool) {
        self.mount_ok.store(ok, Ordering::SeqCst);
    }

    /// Makes the next `n` open attempts fail (simulates a stale mount).
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    pub fn mount_count(&self) -> usize {
        self.mount_count.load(Ordering::SeqCst)
    }

    pub fn unmount_count(&self) -> usize {
        self.unmount_count.load(Ordering::SeqCst)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

/// Buffers writes and commits them to the shared map when dropped,
/// mirroring open-write-close on a real filesystem.
struct MockFile {
    path: String,
    buf: Vec<u8>,
    dest: FileMap,
}

impl Write for MockFile {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for MockFile {
    fn drop(&mut self) {
        self.dest
            .lock()
            .insert(self.path.clone(), std::mem::take(&mut self.buf));
    }
}

impl StorageMedium for MockMedium {
    fn kind(&self) -> MediumKind {
        self.kind
    }

    fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn mount(&self) -> Result<(), CamError> {
        self.mount_count.fetch_add(1, Ordering::SeqCst);
        if self.mount_ok.load(Ordering::SeqCst) {
            self.present.store(true, Ordering::SeqCst);
            // A fresh mount clears any injected open failures.
            self.fail_opens.store(0, Ordering::SeqCst);
            Ok(())
        } else {
            Err(CamError::StorageUnmounted)
        }
    }

    fn unmount(&self) {
        self.unmount_count.fetch_add(1, Ordering::SeqCst);
        self.present.store(false, Ordering::SeqCst);
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send>, CamError> {
        let pending = self.fail_opens.load(Ordering::SeqCst);
        if pending > 0 {
            if pending != usize::MAX {
                self.fail_opens.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(CamError::StorageWriteFailed(format!(
                "injected open failure for {}",
                path
            )));
        }
        Ok(Box::new(MockFile {
            path: path.to_string(),
            buf: Vec::new(),
            dest: Arc::clone(&self.files),
        }))
    }

    fn remove(&self, path: &str) -> Result<(), CamError> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| CamError::StorageWriteFailed(format!("no such file {}", path)))
    }
}
