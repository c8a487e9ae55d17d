//! Unicorn headset acquisition via the vendor SDK.
//!
//! The SDK ships as a shared library next to the executable; symbols are
//! resolved at runtime with `libloading` so the crate builds (and the
//! synthetic path runs) on machines without the hardware stack installed.
//! The device handle the SDK hands out is opaque; `UnicornDriver` owns it
//! and closes it on drop.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use anyhow::{anyhow, Context, Result};
use libloading::Library;
use log::{info, warn};
use once_cell::sync::OnceCell;

use crate::acq::AcqProvider;
use crate::types::NUM_CH_CHUNK;

#[cfg(target_os = "windows")]
const UNICORN_LIB: &str = "Unicorn.dll";
#[cfg(not(target_os = "windows"))]
const UNICORN_LIB: &str = "libunicorn.so";

const UNICORN_ERROR_SUCCESS: c_int = 0;
const UNICORN_SERIAL_LENGTH_MAX: usize = 14;
const MAX_DEVICES: usize = 8;

type UnicornHandle = u64;

struct UnicornApi {
    #[allow(dead_code)]
    lib: Library,
    get_available_devices:
        unsafe extern "C" fn(*mut [c_char; UNICORN_SERIAL_LENGTH_MAX], *mut u32, bool) -> c_int,
    open_device: unsafe extern "C" fn(*const c_char, *mut UnicornHandle) -> c_int,
    close_device: unsafe extern "C" fn(*mut UnicornHandle) -> c_int,
    start_acquisition: unsafe extern "C" fn(UnicornHandle, bool) -> c_int,
    stop_acquisition: unsafe extern "C" fn(UnicornHandle) -> c_int,
    get_data: unsafe extern "C" fn(UnicornHandle, u32, *mut f32, u32) -> c_int,
    get_number_of_acquired_channels: unsafe extern "C" fn(UnicornHandle, *mut u32) -> c_int,
}

impl UnicornApi {
    fn load() -> Result<Self> {
        // the SDK library must sit on the loader path (shipped in repo root)
        let lib = unsafe { Library::new(UNICORN_LIB) }
            .with_context(|| format!("{UNICORN_LIB} not found on loader path"))?;
        // Safety: signatures match the published Unicorn C API.
        unsafe {
            Ok(Self {
                get_available_devices: *lib.get(b"UNICORN_GetAvailableDevices\0")?,
                open_device: *lib.get(b"UNICORN_OpenDevice\0")?,
                close_device: *lib.get(b"UNICORN_CloseDevice\0")?,
                start_acquisition: *lib.get(b"UNICORN_StartAcquisition\0")?,
                stop_acquisition: *lib.get(b"UNICORN_StopAcquisition\0")?,
                get_data: *lib.get(b"UNICORN_GetData\0")?,
                get_number_of_acquired_channels: *lib
                    .get(b"UNICORN_GetNumberOfAcquiredChannels\0")?,
                lib,
            })
        }
    }

    fn instance() -> Result<&'static UnicornApi> {
        static API: OnceCell<UnicornApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }

    fn check(code: c_int, ctx: &str) -> Result<()> {
        if code == UNICORN_ERROR_SUCCESS {
            Ok(())
        } else {
            Err(anyhow!("{ctx} failed (Unicorn code {code})"))
        }
    }

    fn first_available_serial(&self) -> Result<Vec<u8>> {
        let mut serials = [[0 as c_char; UNICORN_SERIAL_LENGTH_MAX]; MAX_DEVICES];
        let mut count = MAX_DEVICES as u32;
        Self::check(
            unsafe { (self.get_available_devices)(serials.as_mut_ptr(), &mut count, true) },
            "UNICORN_GetAvailableDevices",
        )?;
        if count == 0 {
            return Err(anyhow!("no Unicorn device available"));
        }
        // Safety: SDK NUL-terminates serial strings within the fixed buffer.
        let serial = unsafe { CStr::from_ptr(serials[0].as_ptr()) };
        Ok(serial.to_bytes_with_nul().to_vec())
    }
}

/// Owning wrapper over the opaque SDK device handle.
pub struct UnicornDriver {
    handle: Option<UnicornHandle>,
    serial: Vec<u8>,
    num_channels: usize,
    acquiring: bool,
}

impl UnicornDriver {
    pub fn new() -> Self {
        Self {
            handle: None,
            serial: Vec::new(),
            num_channels: NUM_CH_CHUNK,
            acquiring: false,
        }
    }

    fn open(&mut self) -> Result<()> {
        let api = UnicornApi::instance()?;
        self.serial = api.first_available_serial()?;
        let mut handle: UnicornHandle = 0;
        UnicornApi::check(
            unsafe { (api.open_device)(self.serial.as_ptr() as *const c_char, &mut handle) },
            "UNICORN_OpenDevice",
        )?;
        self.handle = Some(handle);

        let mut n: u32 = 0;
        UnicornApi::check(
            unsafe { (api.get_number_of_acquired_channels)(handle, &mut n) },
            "UNICORN_GetNumberOfAcquiredChannels",
        )?;
        // the device reports EEG + aux rows; the chunk format carries EEG only
        self.num_channels = (n as usize).min(NUM_CH_CHUNK).max(1);
        info!(
            target: "producer",
            "unicorn open: {} acquired channels (using {})", n, self.num_channels
        );
        Ok(())
    }
}

impl Default for UnicornDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AcqProvider for UnicornDriver {
    fn init(&mut self) -> bool {
        match self.open() {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "producer", "unicorn init: {e:#}");
                false
            }
        }
    }

    fn start(&mut self, test_mode: bool) -> bool {
        let Some(handle) = self.handle else {
            return false;
        };
        let api = match UnicornApi::instance() {
            Ok(api) => api,
            Err(_) => return false,
        };
        match UnicornApi::check(
            unsafe { (api.start_acquisition)(handle, test_mode) },
            "UNICORN_StartAcquisition",
        ) {
            Ok(()) => {
                self.acquiring = true;
                true
            }
            Err(e) => {
                warn!(target: "producer", "{e:#}");
                false
            }
        }
    }

    fn stop_and_close(&mut self) -> bool {
        let Some(mut handle) = self.handle.take() else {
            return true;
        };
        let api = match UnicornApi::instance() {
            Ok(api) => api,
            Err(_) => return false,
        };
        let mut ok = true;
        if self.acquiring {
            if let Err(e) = UnicornApi::check(
                unsafe { (api.stop_acquisition)(handle) },
                "UNICORN_StopAcquisition",
            ) {
                warn!(target: "producer", "{e:#}");
                ok = false;
            }
            self.acquiring = false;
        }
        if let Err(e) = UnicornApi::check(
            unsafe { (api.close_device)(&mut handle) },
            "UNICORN_CloseDevice",
        ) {
            warn!(target: "producer", "{e:#}");
            ok = false;
        }
        ok
    }

    fn get_data(&mut self, num_scans: usize, dest: &mut [f32]) -> bool {
        if num_scans == 0 {
            return false;
        }
        let Some(handle) = self.handle else {
            return false;
        };
        let needed = num_scans * self.num_channels;
        if dest.len() < needed {
            return false;
        }
        let api = match UnicornApi::instance() {
            Ok(api) => api,
            Err(_) => return false,
        };
        UnicornApi::check(
            unsafe {
                (api.get_data)(
                    handle,
                    num_scans as u32,
                    dest.as_mut_ptr(),
                    needed as u32,
                )
            },
            "UNICORN_GetData",
        )
        .is_ok()
    }

    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn channel_labels(&self) -> Vec<String> {
        // Unicorn electrode montage, EEG1..EEG8
        ["Fz", "C3", "Cz", "C4", "Pz", "PO7", "Oz", "PO8"]
            .iter()
            .take(self.num_channels)
            .map(|s| (*s).to_owned())
            .collect()
    }
}

impl Drop for UnicornDriver {
    fn drop(&mut self) {
        self.stop_and_close();
    }
}
