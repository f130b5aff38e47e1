//! CUDA driver API backend.
//!
//! The driver library is opened at runtime with `libloading`, so nothing
//! links against CUDA and the library is only ever loaded inside the
//! isolated child that uses it.

use std::ffi::{c_char, c_void, CStr, CString};
use std::mem::offset_of;
use std::ptr;
use std::rc::Rc;

use libloading::Library;
use log::{debug, error, warn};

use super::ptx;
use super::{ClockDevice, DeviceBackend, DeviceProperties, FlagSet, HandshakeFlags};
use crate::counter::CounterKind;
use crate::error::{ClockSyncError, Result};

type CUresult = i32;
type CUdevice = i32;
type CUdeviceptr = u64;
type CUcontext = *mut c_void;
type CUmodule = *mut c_void;
type CUfunction = *mut c_void;
type CUstream = *mut c_void;

const CUDA_SUCCESS: CUresult = 0;

const CU_DEVICE_ATTRIBUTE_WARP_SIZE: i32 = 10;
const CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT: i32 = 16;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR: i32 = 75;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR: i32 = 76;

const CU_CTX_SCHED_SPIN: u32 = 0x01;
const CU_CTX_MAP_HOST: u32 = 0x08;

const CU_MEMHOSTALLOC_PORTABLE: u32 = 0x01;
const CU_MEMHOSTALLOC_DEVICEMAP: u32 = 0x02;

const DRIVER_NAMES: &[&str] = &["libcuda.so.1", "libcuda.so"];

type CuInit = unsafe extern "C" fn(u32) -> CUresult;
type CuDeviceGet = unsafe extern "C" fn(*mut CUdevice, i32) -> CUresult;
type CuDeviceGetAttribute = unsafe extern "C" fn(*mut i32, i32, CUdevice) -> CUresult;
type CuCtxCreate = unsafe extern "C" fn(*mut CUcontext, u32, CUdevice) -> CUresult;
type CuCtxDestroy = unsafe extern "C" fn(CUcontext) -> CUresult;
type CuCtxSynchronize = unsafe extern "C" fn() -> CUresult;
type CuModuleLoadData = unsafe extern "C" fn(*mut CUmodule, *const c_void) -> CUresult;
type CuModuleUnload = unsafe extern "C" fn(CUmodule) -> CUresult;
type CuModuleGetFunction =
    unsafe extern "C" fn(*mut CUfunction, CUmodule, *const c_char) -> CUresult;
type CuLaunchKernel = unsafe extern "C" fn(
    CUfunction,
    u32,
    u32,
    u32,
    u32,
    u32,
    u32,
    u32,
    CUstream,
    *mut *mut c_void,
    *mut *mut c_void,
) -> CUresult;
type CuMemAlloc = unsafe extern "C" fn(*mut CUdeviceptr, usize) -> CUresult;
type CuMemFree = unsafe extern "C" fn(CUdeviceptr) -> CUresult;
type CuMemcpyDtoH = unsafe extern "C" fn(*mut c_void, CUdeviceptr, usize) -> CUresult;
type CuMemHostAlloc = unsafe extern "C" fn(*mut *mut c_void, usize, u32) -> CUresult;
type CuMemHostGetDevicePointer =
    unsafe extern "C" fn(*mut CUdeviceptr, *mut c_void, u32) -> CUresult;
type CuMemFreeHost = unsafe extern "C" fn(*mut c_void) -> CUresult;
type CuGetErrorString = unsafe extern "C" fn(CUresult, *mut *const c_char) -> CUresult;

/// Calls a driver entry point and turns a failure into
/// [`ClockSyncError::Driver`] tagged with the call site.
macro_rules! cu {
    ($drv:expr, $name:ident ( $($arg:expr),* $(,)? )) => {{
        let code = unsafe { ($drv.$name)($($arg),*) };
        $drv.check(code, stringify!($name), file!(), line!())
    }};
}

/// Resolved driver entry points. The `Library` is kept alive alongside the
/// copied function pointers.
pub struct CudaDriver {
    cu_init: CuInit,
    cu_device_get: CuDeviceGet,
    cu_device_get_attribute: CuDeviceGetAttribute,
    cu_ctx_create: CuCtxCreate,
    cu_ctx_destroy: CuCtxDestroy,
    cu_ctx_synchronize: CuCtxSynchronize,
    cu_module_load_data: CuModuleLoadData,
    cu_module_unload: CuModuleUnload,
    cu_module_get_function: CuModuleGetFunction,
    cu_launch_kernel: CuLaunchKernel,
    cu_mem_alloc: CuMemAlloc,
    cu_mem_free: CuMemFree,
    cu_memcpy_dtoh: CuMemcpyDtoH,
    cu_mem_host_alloc: CuMemHostAlloc,
    cu_mem_host_get_device_pointer: CuMemHostGetDevicePointer,
    cu_mem_free_host: CuMemFreeHost,
    cu_get_error_string: CuGetErrorString,
    _lib: Library,
}

impl CudaDriver {
    /// Opens the driver library, resolves every entry point and runs
    /// `cuInit`.
    pub fn load() -> Result<Self> {
        let lib = open_library()?;
        let driver = unsafe {
            Self {
                cu_init: symbol(&lib, b"cuInit\0")?,
                cu_device_get: symbol(&lib, b"cuDeviceGet\0")?,
                cu_device_get_attribute: symbol(&lib, b"cuDeviceGetAttribute\0")?,
                cu_ctx_create: symbol(&lib, b"cuCtxCreate_v2\0")?,
                cu_ctx_destroy: symbol(&lib, b"cuCtxDestroy_v2\0")?,
                cu_ctx_synchronize: symbol(&lib, b"cuCtxSynchronize\0")?,
                cu_module_load_data: symbol(&lib, b"cuModuleLoadData\0")?,
                cu_module_unload: symbol(&lib, b"cuModuleUnload\0")?,
                cu_module_get_function: symbol(&lib, b"cuModuleGetFunction\0")?,
                cu_launch_kernel: symbol(&lib, b"cuLaunchKernel\0")?,
                cu_mem_alloc: symbol(&lib, b"cuMemAlloc_v2\0")?,
                cu_mem_free: symbol(&lib, b"cuMemFree_v2\0")?,
                cu_memcpy_dtoh: symbol(&lib, b"cuMemcpyDtoH_v2\0")?,
                cu_mem_host_alloc: symbol(&lib, b"cuMemHostAlloc\0")?,
                cu_mem_host_get_device_pointer: symbol(&lib, b"cuMemHostGetDevicePointer_v2\0")?,
                cu_mem_free_host: symbol(&lib, b"cuMemFreeHost\0")?,
                cu_get_error_string: symbol(&lib, b"cuGetErrorString\0")?,
                _lib: lib,
            }
        };
        cu!(driver, cu_init(0))?;
        Ok(driver)
    }

    fn check(&self, code: CUresult, call: &'static str, file: &'static str, line: u32) -> Result<()> {
        if code == CUDA_SUCCESS {
            return Ok(());
        }
        let description = self.error_string(code);
        error!("CUDA error {} ({}) in {} at {}:{}", code, description, call, file, line);
        Err(ClockSyncError::Driver {
            call,
            code,
            description,
            file,
            line,
        })
    }

    fn error_string(&self, code: CUresult) -> String {
        let mut text: *const c_char = ptr::null();
        let r = unsafe { (self.cu_get_error_string)(code, &mut text) };
        if r != CUDA_SUCCESS || text.is_null() {
            return "unrecognized error code".to_string();
        }
        unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
    }

    fn device(&self, index: i32) -> Result<CUdevice> {
        let mut dev: CUdevice = 0;
        cu!(self, cu_device_get(&mut dev, index))?;
        Ok(dev)
    }

    fn attribute(&self, dev: CUdevice, attr: i32) -> Result<i32> {
        let mut value = 0i32;
        cu!(self, cu_device_get_attribute(&mut value, attr, dev))?;
        Ok(value)
    }

    fn properties(&self, dev: CUdevice) -> Result<DeviceProperties> {
        Ok(DeviceProperties {
            compute_major: self.attribute(dev, CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?,
            compute_minor: self.attribute(dev, CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?,
            multiprocessor_count: self.attribute(dev, CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)?,
            warp_size: self.attribute(dev, CU_DEVICE_ATTRIBUTE_WARP_SIZE)?,
        })
    }
}

fn open_library() -> Result<Library> {
    let mut last = String::from("no candidate names");
    for name in DRIVER_NAMES {
        match unsafe { Library::new(name) } {
            Ok(lib) => {
                debug!("loaded CUDA driver from {}", name);
                return Ok(lib);
            }
            Err(e) => last = format!("{}: {}", name, e),
        }
    }
    Err(ClockSyncError::DriverUnavailable(last))
}

unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Result<T> {
    lib.get::<T>(name)
        .map(|sym| *sym)
        .map_err(|_| ClockSyncError::MissingSymbol(String::from_utf8_lossy(&name[..name.len() - 1]).into()))
}

/// Handshake flags in page-locked host memory mapped into the device's
/// address space.
pub struct PinnedFlags {
    driver: Rc<CudaDriver>,
    host: *mut c_void,
    device: CUdeviceptr,
}

impl PinnedFlags {
    fn device_addr(&self, offset: usize) -> CUdeviceptr {
        self.device + offset as CUdeviceptr
    }
}

impl FlagSet for PinnedFlags {
    fn flags(&self) -> &HandshakeFlags {
        unsafe { &*(self.host as *const HandshakeFlags) }
    }
}

impl Drop for PinnedFlags {
    fn drop(&mut self) {
        if let Err(e) = cu!(self.driver, cu_mem_free_host(self.host)) {
            warn!("failed to free handshake flags: {}", e);
        }
    }
}

/// A device selected by index, with its own context and the clock module
/// loaded.
pub struct CudaDevice {
    driver: Rc<CudaDriver>,
    context: CUcontext,
    module: CUmodule,
    sample_fn: CUfunction,
    spin_fn: CUfunction,
    properties: DeviceProperties,
    counter: CounterKind,
    pending_sample: Option<CUdeviceptr>,
}

impl CudaDevice {
    pub fn open(index: i32) -> Result<Self> {
        let driver = Rc::new(CudaDriver::load()?);
        let dev = driver.device(index)?;
        let properties = driver.properties(dev)?;
        let counter = properties.counter_kind();
        debug!(
            "device {}: compute {}.{}, {} SMs, warp {}, counter {}",
            index,
            properties.compute_major,
            properties.compute_minor,
            properties.multiprocessor_count,
            properties.warp_size,
            counter
        );

        let mut context: CUcontext = ptr::null_mut();
        cu!(driver, cu_ctx_create(&mut context, CU_CTX_SCHED_SPIN | CU_CTX_MAP_HOST, dev))?;

        // From here on `Drop` releases whatever has been created.
        let mut device = Self {
            driver,
            context,
            module: ptr::null_mut(),
            sample_fn: ptr::null_mut(),
            spin_fn: ptr::null_mut(),
            properties,
            counter,
            pending_sample: None,
        };
        device.load_module()?;
        Ok(device)
    }

    fn load_module(&mut self) -> Result<()> {
        let source = CString::new(ptx::module_source(self.counter))
            .map_err(|_| ClockSyncError::Protocol("PTX source contains a NUL byte"))?;
        cu!(self.driver, cu_module_load_data(&mut self.module, source.as_ptr() as *const c_void))?;
        self.sample_fn = self.function(ptx::SAMPLE_ENTRY)?;
        self.spin_fn = self.function(ptx::SPIN_ENTRY)?;
        Ok(())
    }

    fn function(&self, name: &str) -> Result<CUfunction> {
        let cname = CString::new(name).map_err(|_| ClockSyncError::Protocol("kernel name contains a NUL byte"))?;
        let mut func: CUfunction = ptr::null_mut();
        cu!(self.driver, cu_module_get_function(&mut func, self.module, cname.as_ptr()))?;
        Ok(func)
    }

    /// Launches `func` on a single thread. Every entry of `params` points at
    /// one kernel argument.
    fn launch_single(&self, func: CUfunction, params: &mut [*mut c_void]) -> Result<()> {
        cu!(
            self.driver,
            cu_launch_kernel(
                func,
                1,
                1,
                1,
                1,
                1,
                1,
                0,
                ptr::null_mut(),
                params.as_mut_ptr(),
                ptr::null_mut(),
            )
        )
    }

    fn release_sample(&mut self) {
        if let Some(buf) = self.pending_sample.take() {
            if let Err(e) = cu!(self.driver, cu_mem_free(buf)) {
                warn!("failed to free sample buffer: {}", e);
            }
        }
    }
}

impl ClockDevice for CudaDevice {
    type Flags = PinnedFlags;

    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn counter(&self) -> CounterKind {
        self.counter
    }

    fn map_flags(&mut self) -> Result<PinnedFlags> {
        let len = std::mem::size_of::<HandshakeFlags>();
        let mut host: *mut c_void = ptr::null_mut();
        cu!(
            self.driver,
            cu_mem_host_alloc(&mut host, len, CU_MEMHOSTALLOC_PORTABLE | CU_MEMHOSTALLOC_DEVICEMAP)
        )?;
        unsafe { ptr::write_bytes(host as *mut u8, 0, len) };

        let mut flags = PinnedFlags {
            driver: Rc::clone(&self.driver),
            host,
            device: 0,
        };
        cu!(self.driver, cu_mem_host_get_device_pointer(&mut flags.device, host, 0))?;
        Ok(flags)
    }

    fn launch_sample(&mut self, flags: &PinnedFlags) -> Result<()> {
        self.release_sample();
        let mut sample: CUdeviceptr = 0;
        cu!(self.driver, cu_mem_alloc(&mut sample, std::mem::size_of::<u64>()))?;
        self.pending_sample = Some(sample);

        let mut ready = flags.device_addr(offset_of!(HandshakeFlags, ready));
        let mut start = flags.device_addr(offset_of!(HandshakeFlags, start));
        let mut end = flags.device_addr(offset_of!(HandshakeFlags, end));
        let mut params = [
            &mut ready as *mut CUdeviceptr as *mut c_void,
            &mut start as *mut CUdeviceptr as *mut c_void,
            &mut end as *mut CUdeviceptr as *mut c_void,
            &mut sample as *mut CUdeviceptr as *mut c_void,
        ];
        self.launch_single(self.sample_fn, &mut params)
    }

    fn fetch_sample(&mut self) -> Result<u64> {
        let buf = self
            .pending_sample
            .ok_or(ClockSyncError::Protocol("no sample task was launched"))?;
        cu!(self.driver, cu_ctx_synchronize())?;
        let mut value = 0u64;
        cu!(
            self.driver,
            cu_memcpy_dtoh(&mut value as *mut u64 as *mut c_void, buf, std::mem::size_of::<u64>())
        )?;
        self.release_sample();
        Ok(value)
    }

    fn launch_spin(&mut self, ticks: u64) -> Result<()> {
        let mut ticks = ticks;
        let mut params = [&mut ticks as *mut u64 as *mut c_void];
        self.launch_single(self.spin_fn, &mut params)
    }

    fn synchronize(&mut self) -> Result<()> {
        cu!(self.driver, cu_ctx_synchronize())
    }
}

impl Drop for CudaDevice {
    fn drop(&mut self) {
        self.release_sample();
        if !self.module.is_null() {
            if let Err(e) = cu!(self.driver, cu_module_unload(self.module)) {
                warn!("failed to unload clock module: {}", e);
            }
        }
        if let Err(e) = cu!(self.driver, cu_ctx_destroy(self.context)) {
            warn!("failed to destroy context: {}", e);
        }
    }
}

/// The real device backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct CudaBackend;

impl DeviceBackend for CudaBackend {
    type Device = CudaDevice;

    fn properties(&self, device_index: i32) -> Result<DeviceProperties> {
        let driver = CudaDriver::load()?;
        let dev = driver.device(device_index)?;
        driver.properties(dev)
    }

    fn open(&self, device_index: i32) -> Result<CudaDevice> {
        CudaDevice::open(device_index)
    }
}
