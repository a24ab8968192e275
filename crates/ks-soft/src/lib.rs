//! ks-soft: an in-process keystore backend
//!
//! Speaks the same request protocol as the kernel driver, so the client
//! library can be exercised end to end without `/dev/keystore`:
//!
//! ```text
//! device seed ─┐
//!              ├── HKDF(seed, client id) ── client key (AES-SIV) ── wrap/unwrap
//! user seed  ──┘
//! slot table (16 per ticket) ── AES-GCM / AES-CCM / ECIES
//! ```
//!
//! Also instruments itself (endpoint opens, closes, issued requests) and
//! lets tests inject the "rewrap before load" condition.

pub mod cipher;
pub mod keys;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use ks_core::{
    ClientTicket, CryptoRequest, Endpoint, Errno, KeySpec, Request, SeedClass, Transport,
    CLIENT_TICKET_SIZE, KEYSTORE_API_VERSION,
};

use crate::cipher::LoadedKey;
use crate::keys::{ClientKey, CLIENT_ID_SIZE, SEED_SIZE};

/// Key slots available to one registered client
pub const MAX_SLOTS_PER_CLIENT: usize = 16;

struct Session {
    seed: SeedClass,
    key: ClientKey,
    slots: Vec<Option<LoadedKey>>,
}

impl Session {
    fn slot(&self, slot_id: u32) -> Result<&LoadedKey, Errno> {
        self.slots
            .get(slot_id as usize)
            .and_then(Option::as_ref)
            .ok_or(Errno::INVAL)
    }
}

struct State {
    device_seed: Zeroizing<[u8; SEED_SIZE]>,
    user_seed: Zeroizing<[u8; SEED_SIZE]>,
    client_id: [u8; CLIENT_ID_SIZE],
    sessions: HashMap<[u8; CLIENT_TICKET_SIZE], Session>,
    rewrap_pending: bool,
    open_error: Option<Errno>,
}

impl State {
    fn session(&mut self, ticket: &ClientTicket) -> Result<&mut Session, Errno> {
        self.sessions.get_mut(ticket.as_bytes()).ok_or(Errno::INVAL)
    }

    fn register(
        &mut self,
        seed: SeedClass,
        out: &mut [u8; CLIENT_TICKET_SIZE],
    ) -> Result<(), Errno> {
        let seed_bytes = match seed {
            SeedClass::Device => &self.device_seed,
            SeedClass::User => &self.user_seed,
        };
        let key = ClientKey::derive(seed_bytes, &self.client_id)?;

        let mut ticket = [0u8; CLIENT_TICKET_SIZE];
        loop {
            OsRng.fill_bytes(&mut ticket);
            if !self.sessions.contains_key(&ticket) {
                break;
            }
        }
        let mut slots = Vec::with_capacity(MAX_SLOTS_PER_CLIENT);
        slots.resize_with(MAX_SLOTS_PER_CLIENT, || None);
        self.sessions.insert(ticket, Session { seed, key, slots });

        *out = ticket;
        tracing::debug!(%seed, sessions = self.sessions.len(), "client registered");
        Ok(())
    }

    fn load(
        &mut self,
        ticket: &ClientTicket,
        wrapped: &mut [u8],
        slot_out: &mut u32,
    ) -> Result<(), Errno> {
        let rewrap = self.rewrap_pending;
        let session = self.session(ticket)?;
        let spec = keys::spec_for_wrapped_len(wrapped.len()).ok_or(Errno::INVAL)?;
        let material = session.key.unwrap(wrapped)?;

        if rewrap {
            let generation = wrapped[0].wrapping_add(1);
            session.key.wrap(generation, &material, wrapped)?;
            self.rewrap_pending = false;
            tracing::debug!(generation, "wrapped key replaced, caller must retry");
            return Err(Errno::AGAIN);
        }

        let free = session
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Errno::NOSPC)?;
        session.slots[free] = Some(LoadedKey { spec, material });
        *slot_out = free as u32;
        tracing::debug!(slot = free, %spec, seed = %session.seed, "key loaded");
        Ok(())
    }

    fn crypt(&mut self, req: CryptoRequest<'_>, encrypt: bool) -> Result<(), Errno> {
        let session = self.session(req.ticket)?;
        let key = session.slot(req.slot_id)?;
        if encrypt {
            cipher::encrypt(key, req.algo, req.iv, req.input, req.output)
        } else {
            cipher::decrypt(key, req.algo, req.iv, req.input, req.output)
        }
    }

    fn handle(&mut self, request: Request<'_>) -> Result<(), Errno> {
        match request {
            Request::Version { version } => {
                *version = KEYSTORE_API_VERSION;
                Ok(())
            }
            Request::Register { seed, ticket } => self.register(seed, ticket),
            Request::Unregister { ticket } => self
                .sessions
                .remove(ticket.as_bytes())
                .map(|_| ())
                .ok_or(Errno::INVAL),
            Request::WrappedKeySize { key_spec, sizes } => {
                *sizes = keys::key_sizes(key_spec);
                Ok(())
            }
            Request::GenerateKey {
                ticket,
                key_spec,
                wrapped_key,
            } => {
                let session = self.session(ticket)?;
                let material = keys::generate_material(key_spec);
                session.key.wrap(0, &material, wrapped_key)
            }
            Request::WrapKey {
                ticket,
                key_spec,
                app_key,
                wrapped_key,
            } => {
                let session = self.session(ticket)?;
                if app_key.len() != key_spec.key_len() {
                    return Err(Errno::INVAL);
                }
                if key_spec == KeySpec::EccPair {
                    keys::decode_ecc_secret(app_key)?;
                }
                session.key.wrap(0, app_key, wrapped_key)
            }
            Request::LoadKey {
                ticket,
                wrapped_key,
                slot_id,
            } => self.load(ticket, wrapped_key, slot_id),
            Request::UnloadKey { ticket, slot_id } => {
                let session = self.session(ticket)?;
                session
                    .slots
                    .get_mut(slot_id as usize)
                    .and_then(Option::take)
                    .map(|_| ())
                    .ok_or(Errno::INVAL)
            }
            Request::EncryptSize {
                algo,
                input_size,
                output_size,
            } => {
                *output_size = cipher::encrypt_size(algo, input_size)?;
                Ok(())
            }
            Request::DecryptSize {
                algo,
                input_size,
                output_size,
            } => {
                *output_size = cipher::decrypt_size(algo, input_size)?;
                Ok(())
            }
            Request::Encrypt(req) => self.crypt(req, true),
            Request::Decrypt(req) => self.crypt(req, false),
        }
    }
}

struct Shared {
    state: Mutex<State>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    requests: AtomicUsize,
}

/// Software keystore. Clones share one backend instance.
#[derive(Clone)]
pub struct SoftBackend {
    shared: Arc<Shared>,
}

impl SoftBackend {
    /// Random device and user seeds, client identity from the running executable.
    pub fn new() -> Self {
        Self::from_parts(keys::random_seed(), keys::random_seed(), keys::current_client_id())
    }

    /// Fixed seeds, so keys wrapped by one instance load in another.
    pub fn with_seeds(device: [u8; SEED_SIZE], user: [u8; SEED_SIZE]) -> Self {
        Self::from_parts(
            Zeroizing::new(device),
            Zeroizing::new(user),
            keys::current_client_id(),
        )
    }

    /// Pretend to be a different calling program.
    pub fn with_client_identity(self, identity: &str) -> Self {
        self.state().client_id = keys::client_id_for(identity);
        self
    }

    fn from_parts(
        device_seed: Zeroizing<[u8; SEED_SIZE]>,
        user_seed: Zeroizing<[u8; SEED_SIZE]>,
        client_id: [u8; CLIENT_ID_SIZE],
    ) -> Self {
        let state = State {
            device_seed,
            user_seed,
            client_id,
            sessions: HashMap::new(),
            rewrap_pending: false,
            open_error: None,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                requests: AtomicUsize::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The next load rewraps the caller's key in place and fails with `EAGAIN`.
    pub fn require_rewrap_on_next_load(&self) {
        self.state().rewrap_pending = true;
    }

    /// The next endpoint open fails with `errno`.
    pub fn fail_next_open(&self, errno: Errno) {
        self.state().open_error = Some(errno);
    }

    /// Replace the user seed. Keys wrapped under the old one stop loading.
    pub fn reset_user_seed(&self) {
        self.state().user_seed = keys::random_seed();
        tracing::info!("user seed reset");
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }

    /// Number of tickets currently registered
    pub fn sessions(&self) -> usize {
        self.state().sessions.len()
    }

    /// Number of occupied slots across all sessions
    pub fn loaded_keys(&self) -> usize {
        self.state()
            .sessions
            .values()
            .map(|s| s.slots.iter().filter(|slot| slot.is_some()).count())
            .sum()
    }
}

impl Default for SoftBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoftBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftBackend")
            .field("opens", &self.opens())
            .field("closes", &self.closes())
            .field("requests", &self.requests())
            .finish()
    }
}

/// One open connection to a [`SoftBackend`]
pub struct SoftEndpoint<'t> {
    backend: &'t SoftBackend,
}

impl Endpoint for SoftEndpoint<'_> {
    fn issue(&mut self, request: Request<'_>) -> Result<(), Errno> {
        self.backend.shared.requests.fetch_add(1, Ordering::SeqCst);
        self.backend.state().handle(request)
    }
}

impl Drop for SoftEndpoint<'_> {
    fn drop(&mut self) {
        self.backend.shared.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Transport for SoftBackend {
    type Endpoint<'t> = SoftEndpoint<'t>
    where
        Self: 't;

    fn open(&self) -> Result<SoftEndpoint<'_>, Errno> {
        if let Some(errno) = self.state().open_error.take() {
            return Err(errno);
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(SoftEndpoint { backend: self })
    }

    fn target(&self) -> String {
        "ks-soft".into()
    }
}
