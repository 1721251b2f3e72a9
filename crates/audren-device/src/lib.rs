//! Hardware audio output boundary.
//!
//! The renderer core hands rendered frames to an [`AudioDevice`]; this crate
//! provides the session plumbing between that trait and a real backend:
//! [`DeviceSession`] queues and tracks guest buffers under one parent lock,
//! and [`OutputManager`] owns the session table under a separate allocation
//! lock so registering sessions never contends with per-session buffer work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error;

/// Upper bound on buffers queueable per session before the ring reports
/// full.
pub const MAX_QUEUED_BUFFERS: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("buffer ring full ({0} buffers queued)")]
    BufferRingFull(usize),

    #[error("buffer tag {0:#x} is not registered")]
    UnknownBuffer(u64),

    #[error("session limit reached ({0} active)")]
    SessionLimit(usize),
}

/// Operations a physical audio output device must provide.
///
/// Narrow by design: the renderer core only needs buffer lifecycle,
/// transport and volume control.
pub trait AudioDevice: Send {
    fn register_buffer(&mut self, tag: u64, samples: &[f32]) -> Result<(), DeviceError>;
    fn unregister_buffer(&mut self, tag: u64) -> Result<(), DeviceError>;
    fn queue_buffer(&mut self, tag: u64) -> Result<(), DeviceError>;
    fn was_buffer_fully_consumed(&self, tag: u64) -> bool;
    fn start(&mut self);
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn get_volume(&self) -> f32;
    fn get_played_sample_count(&self) -> u64;
    fn prepare_to_close(&mut self);
}

/// In-memory device backend: consumes queued buffers on explicit `advance`
/// calls. Used by tests and headless runs; a real backend wraps the host
/// audio API behind the same trait.
#[derive(Debug, Default)]
pub struct LoopbackDevice {
    registered: Vec<(u64, usize)>,
    queued: VecDeque<u64>,
    consumed: Vec<u64>,
    running: bool,
    volume: f32,
    played_samples: u64,
}

impl LoopbackDevice {
    pub fn new() -> Self {
        Self {
            volume: 1.0,
            ..Default::default()
        }
    }

    /// Consumes the oldest queued buffer, as a real device would on a
    /// period boundary.
    pub fn advance(&mut self) {
        if !self.running {
            return;
        }
        if let Some(tag) = self.queued.pop_front() {
            if let Some((_, len)) = self.registered.iter().find(|(t, _)| *t == tag) {
                self.played_samples += *len as u64;
            }
            self.consumed.push(tag);
        }
    }
}

impl AudioDevice for LoopbackDevice {
    fn register_buffer(&mut self, tag: u64, samples: &[f32]) -> Result<(), DeviceError> {
        self.registered.push((tag, samples.len()));
        Ok(())
    }

    fn unregister_buffer(&mut self, tag: u64) -> Result<(), DeviceError> {
        let before = self.registered.len();
        self.registered.retain(|(t, _)| *t != tag);
        if self.registered.len() == before {
            return Err(DeviceError::UnknownBuffer(tag));
        }
        self.consumed.retain(|t| *t != tag);
        Ok(())
    }

    fn queue_buffer(&mut self, tag: u64) -> Result<(), DeviceError> {
        if !self.registered.iter().any(|(t, _)| *t == tag) {
            return Err(DeviceError::UnknownBuffer(tag));
        }
        if self.queued.len() >= MAX_QUEUED_BUFFERS {
            return Err(DeviceError::BufferRingFull(self.queued.len()));
        }
        self.queued.push_back(tag);
        Ok(())
    }

    fn was_buffer_fully_consumed(&self, tag: u64) -> bool {
        self.consumed.contains(&tag)
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 2.0);
    }

    fn get_volume(&self) -> f32 {
        self.volume
    }

    fn get_played_sample_count(&self) -> u64 {
        self.played_samples
    }

    fn prepare_to_close(&mut self) {
        self.running = false;
        self.queued.clear();
    }
}

/// Shares one device between a session and an external driver (the host
/// callback that consumes periods, or a test).
pub struct SharedDevice<T: AudioDevice>(Arc<Mutex<T>>);

impl<T: AudioDevice> SharedDevice<T> {
    pub fn new(device: T) -> Self {
        Self(Arc::new(Mutex::new(device)))
    }

    pub fn handle(&self) -> Self {
        Self(Arc::clone(&self.0))
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.lock().expect("shared device lock poisoned"))
    }
}

impl<T: AudioDevice> AudioDevice for SharedDevice<T> {
    fn register_buffer(&mut self, tag: u64, samples: &[f32]) -> Result<(), DeviceError> {
        self.with(|d| d.register_buffer(tag, samples))
    }

    fn unregister_buffer(&mut self, tag: u64) -> Result<(), DeviceError> {
        self.with(|d| d.unregister_buffer(tag))
    }

    fn queue_buffer(&mut self, tag: u64) -> Result<(), DeviceError> {
        self.with(|d| d.queue_buffer(tag))
    }

    fn was_buffer_fully_consumed(&self, tag: u64) -> bool {
        self.0
            .lock()
            .expect("shared device lock poisoned")
            .was_buffer_fully_consumed(tag)
    }

    fn start(&mut self) {
        self.with(|d| d.start());
    }

    fn stop(&mut self) {
        self.with(|d| d.stop());
    }

    fn set_volume(&mut self, volume: f32) {
        self.with(|d| d.set_volume(volume));
    }

    fn get_volume(&self) -> f32 {
        self.0.lock().expect("shared device lock poisoned").get_volume()
    }

    fn get_played_sample_count(&self) -> u64 {
        self.0
            .lock()
            .expect("shared device lock poisoned")
            .get_played_sample_count()
    }

    fn prepare_to_close(&mut self) {
        self.with(|d| d.prepare_to_close());
    }
}

#[derive(Debug)]
struct SessionInner {
    device: Box<dyn AudioDevice>,
    /// Buffers appended but not yet observed consumed, oldest first.
    in_flight: VecDeque<u64>,
    released: Vec<u64>,
    started: bool,
}

impl std::fmt::Debug for dyn AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AudioDevice")
    }
}

/// One output session.
///
/// Every operation funnels through the single parent lock; `update` is the
/// background drain that moves consumed buffers to the released list and
/// signals the release event.
pub struct DeviceSession {
    parent_lock: Mutex<SessionInner>,
    release_event: Condvar,
    release_signaled: AtomicBool,
}

impl DeviceSession {
    pub fn new(device: Box<dyn AudioDevice>) -> Self {
        Self {
            parent_lock: Mutex::new(SessionInner {
                device,
                in_flight: VecDeque::new(),
                released: Vec::new(),
                started: false,
            }),
            release_event: Condvar::new(),
            release_signaled: AtomicBool::new(false),
        }
    }

    pub fn append_buffer(&self, tag: u64, samples: &[f32]) -> Result<(), DeviceError> {
        let mut inner = self.parent_lock.lock().expect("session lock poisoned");
        if inner.in_flight.len() >= MAX_QUEUED_BUFFERS {
            return Err(DeviceError::BufferRingFull(inner.in_flight.len()));
        }
        inner.device.register_buffer(tag, samples)?;
        inner.device.queue_buffer(tag)?;
        inner.in_flight.push_back(tag);
        Ok(())
    }

    pub fn start(&self) {
        let mut inner = self.parent_lock.lock().expect("session lock poisoned");
        inner.started = true;
        inner.device.start();
    }

    pub fn stop(&self) {
        let mut inner = self.parent_lock.lock().expect("session lock poisoned");
        inner.started = false;
        inner.device.stop();
    }

    pub fn set_volume(&self, volume: f32) {
        let mut inner = self.parent_lock.lock().expect("session lock poisoned");
        inner.device.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        let inner = self.parent_lock.lock().expect("session lock poisoned");
        inner.device.get_volume()
    }

    pub fn played_sample_count(&self) -> u64 {
        let inner = self.parent_lock.lock().expect("session lock poisoned");
        inner.device.get_played_sample_count()
    }

    /// Background drain: moves fully-consumed buffers to the released list
    /// and raises the release event when any were freed.
    pub fn update(&self) {
        let mut inner = self.parent_lock.lock().expect("session lock poisoned");
        let mut released_any = false;
        while let Some(&tag) = inner.in_flight.front() {
            if !inner.device.was_buffer_fully_consumed(tag) {
                break;
            }
            inner.in_flight.pop_front();
            inner.released.push(tag);
            released_any = true;
        }
        if released_any {
            self.release_signaled.store(true, Ordering::Release);
            self.release_event.notify_all();
        }
    }

    /// Takes the released buffer tags, oldest first.
    pub fn drain_released(&self) -> Vec<u64> {
        let mut inner = self.parent_lock.lock().expect("session lock poisoned");
        self.release_signaled.store(false, Ordering::Release);
        std::mem::take(&mut inner.released)
    }

    pub fn was_release_signaled(&self) -> bool {
        self.release_signaled.load(Ordering::Acquire)
    }

    pub fn prepare_to_close(&self) {
        let mut inner = self.parent_lock.lock().expect("session lock poisoned");
        inner.device.prepare_to_close();
        inner.in_flight.clear();
    }
}

/// Session table. Allocation takes its own lock, distinct from every
/// per-session parent lock, so opening a session never blocks buffer work
/// on the others.
pub struct OutputManager {
    sessions_lock: Mutex<Vec<Option<Arc<DeviceSession>>>>,
    max_sessions: usize,
}

impl OutputManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions_lock: Mutex::new((0..max_sessions).map(|_| None).collect()),
            max_sessions,
        }
    }

    pub fn open_session(
        &self,
        device: Box<dyn AudioDevice>,
    ) -> Result<(usize, Arc<DeviceSession>), DeviceError> {
        let mut sessions = self.sessions_lock.lock().expect("session table poisoned");
        let slot = sessions
            .iter()
            .position(Option::is_none)
            .ok_or(DeviceError::SessionLimit(self.max_sessions))?;
        let session = Arc::new(DeviceSession::new(device));
        sessions[slot] = Some(Arc::clone(&session));
        Ok((slot, session))
    }

    pub fn session(&self, id: usize) -> Option<Arc<DeviceSession>> {
        let sessions = self.sessions_lock.lock().expect("session table poisoned");
        sessions.get(id).and_then(Clone::clone)
    }

    pub fn close_session(&self, id: usize) {
        let taken = {
            let mut sessions = self.sessions_lock.lock().expect("session table poisoned");
            sessions.get_mut(id).and_then(Option::take)
        };
        if let Some(session) = taken {
            session.prepare_to_close();
        } else {
            log::debug!("close_session: no session in slot {id}");
        }
    }

    /// Background sweep over every open session.
    pub fn update_all(&self) {
        let sessions: Vec<Arc<DeviceSession>> = {
            let table = self.sessions_lock.lock().expect("session table poisoned");
            table.iter().flatten().cloned().collect()
        };
        // Per-session locks are taken outside the table lock.
        for session in sessions {
            session.update();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_loopback() -> (OutputManager, Arc<DeviceSession>, SharedDevice<LoopbackDevice>) {
        let manager = OutputManager::new(4);
        let device = SharedDevice::new(LoopbackDevice::new());
        let handle = device.handle();
        let (_, session) = manager.open_session(Box::new(device)).unwrap();
        (manager, session, handle)
    }

    #[test]
    fn buffers_complete_in_fifo_order() {
        let (manager, session, device) = open_loopback();
        session.start();
        session.append_buffer(1, &[0.0; 240]).unwrap();
        session.append_buffer(2, &[0.0; 240]).unwrap();
        session.append_buffer(3, &[0.0; 240]).unwrap();

        // Consume two periods.
        device.with(|d| {
            d.advance();
            d.advance();
        });
        manager.update_all();

        assert!(session.was_release_signaled());
        assert_eq!(session.drain_released(), vec![1, 2]);
        assert!(!session.was_release_signaled());
        assert_eq!(session.drain_released(), Vec::<u64>::new());
    }

    #[test]
    fn ring_reports_full_at_capacity() {
        let (_, session, _) = open_loopback();
        for tag in 0..MAX_QUEUED_BUFFERS as u64 {
            session.append_buffer(tag, &[0.0; 16]).unwrap();
        }
        assert_eq!(
            session.append_buffer(999, &[0.0; 16]),
            Err(DeviceError::BufferRingFull(MAX_QUEUED_BUFFERS))
        );
    }

    #[test]
    fn session_table_enforces_its_limit_and_recycles_slots() {
        let manager = OutputManager::new(2);
        let (a, _) = manager.open_session(Box::new(LoopbackDevice::new())).unwrap();
        let (b, _) = manager.open_session(Box::new(LoopbackDevice::new())).unwrap();
        assert_ne!(a, b);
        assert!(matches!(
            manager.open_session(Box::new(LoopbackDevice::new())),
            Err(DeviceError::SessionLimit(2))
        ));

        manager.close_session(a);
        let (c, _) = manager.open_session(Box::new(LoopbackDevice::new())).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn volume_and_played_samples_round_trip_through_the_lock() {
        let (_, session, device) = open_loopback();
        session.set_volume(0.5);
        assert_eq!(session.volume(), 0.5);

        session.start();
        session.append_buffer(7, &[0.0; 480]).unwrap();
        device.with(LoopbackDevice::advance);
        assert_eq!(session.played_sample_count(), 480);
    }
}
