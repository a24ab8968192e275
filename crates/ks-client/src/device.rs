//! Character-device transport
//!
//! Each request opens the device node read/write, issues one ioctl, and
//! closes the node again when the endpoint drops. The `Raw*` structs match
//! the driver's C layout field for field; pointer fields borrow caller
//! buffers for the duration of the ioctl only.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use ks_core::config::DEFAULT_DEVICE;
use ks_core::{Command, CryptoRequest, Endpoint, Errno, Request, Transport, CLIENT_TICKET_SIZE};

const IOC_MAGIC: u8 = b'7';

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;

/// Linux `_IOC` request number for a keystore command.
pub const fn ioc(dir: u32, nr: u8, size: usize) -> u32 {
    (dir << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | ((IOC_MAGIC as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
}

fn direction(command: Command) -> u32 {
    match command {
        Command::Version => IOC_READ,
        Command::Register
        | Command::WrappedKeySize
        | Command::LoadKey
        | Command::EncryptSize
        | Command::DecryptSize => IOC_READ | IOC_WRITE,
        Command::Unregister
        | Command::GenerateKey
        | Command::WrapKey
        | Command::UnloadKey
        | Command::Encrypt
        | Command::Decrypt => IOC_WRITE,
    }
}

#[repr(C)]
#[derive(Debug, Default)]
struct RawVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

#[allow(dead_code)] // input fields are read by the driver
#[repr(C)]
#[derive(Debug, Default)]
struct RawRegister {
    seed_type: u32,
    client_ticket: [u8; CLIENT_TICKET_SIZE],
}

#[allow(dead_code)] // input fields are read by the driver
#[repr(C)]
#[derive(Debug)]
struct RawUnregister {
    client_ticket: [u8; CLIENT_TICKET_SIZE],
}

#[allow(dead_code)] // input fields are read by the driver
#[repr(C)]
#[derive(Debug, Default)]
struct RawWrappedKeySize {
    key_spec: u32,
    key_size: u32,
    unwrapped_key_size: u32,
}

#[allow(dead_code)] // input fields are read by the driver
#[repr(C)]
#[derive(Debug)]
struct RawGenerateKey {
    client_ticket: [u8; CLIENT_TICKET_SIZE],
    key_spec: u32,
    wrapped_key: *mut u8,
}

#[allow(dead_code)] // input fields are read by the driver
#[repr(C)]
#[derive(Debug)]
struct RawWrapKey {
    client_ticket: [u8; CLIENT_TICKET_SIZE],
    key_spec: u32,
    app_key: *const u8,
    app_key_size: u32,
    wrapped_key: *mut u8,
}

#[allow(dead_code)] // input fields are read by the driver
#[repr(C)]
#[derive(Debug)]
struct RawLoadKey {
    client_ticket: [u8; CLIENT_TICKET_SIZE],
    wrapped_key: *mut u8,
    wrapped_key_size: u32,
    slot_id: u32,
}

#[allow(dead_code)] // input fields are read by the driver
#[repr(C)]
#[derive(Debug)]
struct RawUnloadKey {
    client_ticket: [u8; CLIENT_TICKET_SIZE],
    slot_id: u32,
}

#[allow(dead_code)] // input fields are read by the driver
#[repr(C)]
#[derive(Debug, Default)]
struct RawCryptoSize {
    algospec: u32,
    input_size: u32,
    output_size: u32,
}

#[allow(dead_code)] // input fields are read by the driver
#[repr(C)]
#[derive(Debug)]
struct RawEncryptDecrypt {
    client_ticket: [u8; CLIENT_TICKET_SIZE],
    slot_id: u32,
    algospec: u32,
    iv: *const u8,
    iv_size: u32,
    input: *const u8,
    input_size: u32,
    output: *mut u8,
}

/// Length of a buffer as the driver's 32-bit size field.
fn field_len(buf: &[u8]) -> Result<u32, Errno> {
    u32::try_from(buf.len()).map_err(|_| Errno::INVAL)
}

impl RawEncryptDecrypt {
    fn new(req: &mut CryptoRequest<'_>) -> Result<Self, Errno> {
        Ok(Self {
            client_ticket: *req.ticket.as_bytes(),
            slot_id: req.slot_id,
            algospec: req.algo.tag(),
            iv: req.iv.as_ptr(),
            iv_size: field_len(req.iv)?,
            input: req.input.as_ptr(),
            input_size: field_len(req.input)?,
            output: req.output.as_mut_ptr(),
        })
    }
}

/// Keystore device node, `/dev/keystore` unless configured otherwise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTransport {
    path: PathBuf,
}

impl DeviceTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for DeviceTransport {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE)
    }
}

impl Transport for DeviceTransport {
    type Endpoint<'t> = DeviceEndpoint
    where
        Self: 't;

    fn open(&self) -> Result<DeviceEndpoint, Errno> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(Errno::from)?;
        Ok(DeviceEndpoint { file })
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

/// An open device node; closed when dropped
#[derive(Debug)]
pub struct DeviceEndpoint {
    file: File,
}

impl DeviceEndpoint {
    fn ioctl<R>(&mut self, command: Command, raw: &mut R) -> Result<(), Errno> {
        let request = ioc(direction(command), command.number(), std::mem::size_of::<R>());
        // SAFETY: `raw` is a #[repr(C)] struct laid out as the driver expects
        // for `command`, and every pointer inside it borrows a live buffer
        // that outlasts this call.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, raw as *mut R) };
        if rc < 0 {
            Err(Errno::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Endpoint for DeviceEndpoint {
    fn issue(&mut self, request: Request<'_>) -> Result<(), Errno> {
        let command = request.command();
        match request {
            Request::Version { version } => {
                let mut raw = RawVersion::default();
                self.ioctl(command, &mut raw)?;
                version.major = raw.major;
                version.minor = raw.minor;
                version.patch = raw.patch;
            }
            Request::Register { seed, ticket } => {
                let mut raw = RawRegister {
                    seed_type: seed.tag(),
                    ..Default::default()
                };
                self.ioctl(command, &mut raw)?;
                *ticket = raw.client_ticket;
            }
            Request::Unregister { ticket } => {
                let mut raw = RawUnregister {
                    client_ticket: *ticket.as_bytes(),
                };
                self.ioctl(command, &mut raw)?;
            }
            Request::WrappedKeySize { key_spec, sizes } => {
                let mut raw = RawWrappedKeySize {
                    key_spec: key_spec.tag(),
                    ..Default::default()
                };
                self.ioctl(command, &mut raw)?;
                sizes.wrapped = raw.key_size as usize;
                sizes.unwrapped = raw.unwrapped_key_size as usize;
            }
            Request::GenerateKey {
                ticket,
                key_spec,
                wrapped_key,
            } => {
                let mut raw = RawGenerateKey {
                    client_ticket: *ticket.as_bytes(),
                    key_spec: key_spec.tag(),
                    wrapped_key: wrapped_key.as_mut_ptr(),
                };
                self.ioctl(command, &mut raw)?;
            }
            Request::WrapKey {
                ticket,
                key_spec,
                app_key,
                wrapped_key,
            } => {
                let mut raw = RawWrapKey {
                    client_ticket: *ticket.as_bytes(),
                    key_spec: key_spec.tag(),
                    app_key: app_key.as_ptr(),
                    app_key_size: field_len(app_key)?,
                    wrapped_key: wrapped_key.as_mut_ptr(),
                };
                self.ioctl(command, &mut raw)?;
            }
            Request::LoadKey {
                ticket,
                wrapped_key,
                slot_id,
            } => {
                let mut raw = RawLoadKey {
                    client_ticket: *ticket.as_bytes(),
                    wrapped_key_size: field_len(wrapped_key)?,
                    wrapped_key: wrapped_key.as_mut_ptr(),
                    slot_id: 0,
                };
                self.ioctl(command, &mut raw)?;
                *slot_id = raw.slot_id;
            }
            Request::UnloadKey { ticket, slot_id } => {
                let mut raw = RawUnloadKey {
                    client_ticket: *ticket.as_bytes(),
                    slot_id,
                };
                self.ioctl(command, &mut raw)?;
            }
            Request::EncryptSize {
                algo,
                input_size,
                output_size,
            }
            | Request::DecryptSize {
                algo,
                input_size,
                output_size,
            } => {
                let mut raw = RawCryptoSize {
                    algospec: algo.tag(),
                    input_size,
                    ..Default::default()
                };
                self.ioctl(command, &mut raw)?;
                *output_size = raw.output_size;
            }
            Request::Encrypt(mut req) | Request::Decrypt(mut req) => {
                let mut raw = RawEncryptDecrypt::new(&mut req)?;
                self.ioctl(command, &mut raw)?;
            }
        }
        Ok(())
    }
}
