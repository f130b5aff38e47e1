//! Shared scalar channel: one value living in an anonymous `MAP_SHARED`
//! mapping, so a forked child writes it and the parent reads it back after
//! `waitpid`.

use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr;

use crate::error::{ClockSyncError, Result};

/// A value that may travel through a [`SharedScalar`].
///
/// # Safety
///
/// The all-zero bit pattern must be a valid `Self`, and the type must hold
/// no pointers or handles that are meaningless in another process.
pub unsafe trait SharedValue: Copy + 'static {}

unsafe impl SharedValue for i32 {}
unsafe impl SharedValue for u32 {}
unsafe impl SharedValue for u64 {}
unsafe impl SharedValue for f64 {}

/// One zero-initialized `T` visible with identical contents to this process
/// and to any process it forks afterwards.
///
/// The writer side consumes the handle in [`publish`](Self::publish) and the
/// reader side in [`take`](Self::take), so each value is written at most once
/// and read at most once. Dropping the handle unmaps it.
pub struct SharedScalar<T: SharedValue> {
    map: *mut libc::c_void,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: SharedValue> SharedScalar<T> {
    /// Maps exactly `size_of::<T>()` bytes, zeroed.
    pub fn allocate() -> Result<Self> {
        let len = size_of::<T>();
        let map = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if map == libc::MAP_FAILED {
            return Err(ClockSyncError::SharedAlloc(std::io::Error::last_os_error()));
        }
        // Anonymous pages are already zero; keep the invariant explicit.
        unsafe { ptr::write_bytes(map as *mut u8, 0, len) };
        Ok(Self {
            map,
            len,
            _marker: PhantomData,
        })
    }

    /// Size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Writes the value and releases this process's view of the mapping.
    pub fn publish(self, value: T) {
        unsafe { ptr::write_volatile(self.map as *mut T, value) };
    }

    /// Reads the value and releases the mapping.
    pub fn take(self) -> T {
        unsafe { ptr::read_volatile(self.map as *const T) }
    }
}

impl<T: SharedValue> Drop for SharedScalar<T> {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map, self.len);
        }
    }
}
