//! Thread-local storage slots with process-wide keys.

use std::ffi::c_void;

use crate::error::Result;
use crate::host;

/// Keys the host guarantees can be live at the same time; creating more may
/// fail.
pub const LOCAL_SLOT_MIN_AVAILABLE: usize = host::LOCAL_SLOT_MIN_AVAILABLE;

/// A process-wide key naming one pointer-sized storage cell per thread.
///
/// Every thread starts with a null cell and only ever reads and writes its
/// own. The slot does not interpret or finalize stored values: when a thread
/// ends or the slot is dropped, whatever the pointers referred to is still
/// the caller's to clean up.
pub struct LocalSlot {
    key: host::RawTlsKey,
}

impl LocalSlot {
    /// Create a slot.
    ///
    /// # Errors
    /// [`SyncError::OutOfMemory`](crate::SyncError::OutOfMemory) or
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) when the host has
    /// no keys left.
    pub fn create() -> Result<LocalSlot> {
        Ok(LocalSlot {
            key: host::RawTlsKey::create()?,
        })
    }

    /// Store `value` in the calling thread's cell.
    ///
    /// Storing any pointer is safe; dereferencing what it points to remains
    /// the caller's responsibility.
    pub fn set(&self, value: *mut c_void) -> Result<()> {
        self.key.set(value)
    }

    /// The calling thread's cell, null if never set.
    pub fn get(&self) -> *mut c_void {
        self.key.get()
    }
}

impl Drop for LocalSlot {
    fn drop(&mut self) {
        if let Err(error) = self.key.delete() {
            log::warn!("thread-local key deletion failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_value_is_null() {
        let slot = LocalSlot::create().expect("create should succeed");
        assert!(slot.get().is_null());
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let slot = LocalSlot::create().unwrap();
        let mut value = 7u32;

        slot.set(&mut value as *mut u32 as *mut c_void).unwrap();
        assert_eq!(slot.get() as *mut u32, &mut value as *mut u32);

        slot.set(std::ptr::null_mut()).unwrap();
        assert!(slot.get().is_null());
    }

    #[test]
    fn test_cells_are_per_thread() {
        let slot = Arc::new(LocalSlot::create().unwrap());
        let mut main_value = 1u32;
        slot.set(&mut main_value as *mut u32 as *mut c_void).unwrap();

        let slot_in_thread = Arc::clone(&slot);
        thread::spawn(move || {
            // A fresh thread sees null, and its writes stay its own.
            assert!(slot_in_thread.get().is_null());
            let mut thread_value = 2u32;
            slot_in_thread
                .set(&mut thread_value as *mut u32 as *mut c_void)
                .unwrap();
            assert_eq!(
                unsafe { *(slot_in_thread.get() as *const u32) },
                2
            );
        })
        .join()
        .expect("thread should not panic");

        assert_eq!(unsafe { *(slot.get() as *const u32) }, 1);
    }

    #[test]
    fn test_several_slots_coexist() {
        let slots: Vec<LocalSlot> = (0..8)
            .map(|_| LocalSlot::create().expect("create should succeed"))
            .collect();
        let mut values: Vec<u32> = (0..8).collect();

        for (slot, value) in slots.iter().zip(values.iter_mut()) {
            slot.set(value as *mut u32 as *mut c_void).unwrap();
        }
        for (index, slot) in slots.iter().enumerate() {
            assert_eq!(unsafe { *(slot.get() as *const u32) }, index as u32);
        }
    }
}
