#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ros_kmd::{
    Adapter, AdapterConfig, BufferKind, DmaBuffer, InterruptData, SchedulerError,
    SchedulerInterface, StartResources, SubmitCommandArgs,
};
use ros_memory::{HostSystemMemory, LocalMemory};

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

#[derive(Debug, Default)]
struct Recorded {
    completions: Vec<InterruptData>,
    inside_synchronize: bool,
    unsynchronized_notifications: usize,
    synchronize_calls: usize,
    dpc_requests: usize,
    dpc_notifications: usize,
}

/// Scheduler fake that records every completion it is told about.
///
/// `hold()` makes the next synchronized call block until `release()`, which lets tests keep the
/// worker busy while they queue more work.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    state: Mutex<Recorded>,
    changed: Condvar,
    fail_synchronize: AtomicBool,
    held: Mutex<bool>,
    released: Condvar,
}

impl RecordingScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let scheduler = Self::default();
        scheduler.fail_synchronize.store(true, Ordering::SeqCst);
        Arc::new(scheduler)
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.state.lock().unwrap()
    }

    pub fn hold(&self) {
        *self.held.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.released.notify_all();
    }

    /// Waits until the worker is parked inside a held synchronized call.
    pub fn wait_until_held(&self) {
        self.wait_for(|r| r.synchronize_calls >= 1 && r.inside_synchronize);
    }

    fn wait_for(&self, mut done: impl FnMut(&Recorded) -> bool) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        let mut state = self.lock();
        while !done(&state) {
            let now = Instant::now();
            assert!(now < deadline, "timed out waiting for scheduler callbacks: {state:?}");
            state = self.changed.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    pub fn wait_for_synchronize_calls(&self, count: usize) {
        self.wait_for(|r| r.synchronize_calls >= count && !r.inside_synchronize);
    }

    /// Waits for `count` completions and returns the fence ids in notification order.
    pub fn wait_for_fences(&self, count: usize) -> Vec<u64> {
        self.wait_for(|r| r.completions.len() >= count);
        self.fences()
    }

    pub fn fences(&self) -> Vec<u64> {
        self.lock()
            .completions
            .iter()
            .map(|c| match c {
                InterruptData::DmaCompleted {
                    submission_fence_id,
                    ..
                } => *submission_fence_id,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<InterruptData> {
        self.lock().completions.clone()
    }

    pub fn unsynchronized_notifications(&self) -> usize {
        self.lock().unsynchronized_notifications
    }

    pub fn dpc_requests(&self) -> usize {
        self.lock().dpc_requests
    }

    pub fn dpc_notifications(&self) -> usize {
        self.lock().dpc_notifications
    }
}

impl SchedulerInterface for RecordingScheduler {
    fn synchronize_execution(
        &self,
        callback: &mut dyn FnMut() -> bool,
    ) -> Result<bool, SchedulerError> {
        {
            let mut state = self.lock();
            state.synchronize_calls += 1;
            state.inside_synchronize = true;
        }
        self.changed.notify_all();

        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.released.wait(held).unwrap();
        }
        drop(held);

        let result = if self.fail_synchronize.load(Ordering::SeqCst) {
            Err(SchedulerError::SynchronizeExecution(
                "interrupt spinlock unavailable".into(),
            ))
        } else {
            Ok(callback())
        };

        self.lock().inside_synchronize = false;
        self.changed.notify_all();
        result
    }

    fn notify_interrupt(&self, data: &InterruptData) {
        let mut state = self.lock();
        if !state.inside_synchronize {
            state.unsynchronized_notifications += 1;
        }
        state.completions.push(*data);
        drop(state);
        self.changed.notify_all();
    }

    fn queue_dpc(&self) -> bool {
        self.lock().dpc_requests += 1;
        true
    }

    fn notify_dpc(&self) {
        self.lock().dpc_notifications += 1;
    }
}

pub struct Harness {
    pub adapter: Adapter,
    pub scheduler: Arc<RecordingScheduler>,
    pub local: Arc<LocalMemory>,
    pub system: Arc<HostSystemMemory>,
}

impl Harness {
    pub fn start(config: AdapterConfig) -> Self {
        Self::start_with(config, RecordingScheduler::new())
    }

    pub fn start_with(config: AdapterConfig, scheduler: Arc<RecordingScheduler>) -> Self {
        init_tracing();
        let local = Arc::new(LocalMemory::new(0x10_000));
        let system = Arc::new(HostSystemMemory::new());
        let mut adapter = Adapter::add(config);
        adapter
            .start(StartResources {
                scheduler: scheduler.clone(),
                local_memory: Arc::clone(&local),
                system_memory: system.clone(),
                hardware: None,
            })
            .unwrap();
        Self {
            adapter,
            scheduler,
            local,
            system,
        }
    }

    /// Submits the whole of `buffer` with a non-zero DMA address.
    pub fn submit(&self, buffer: &Arc<DmaBuffer>, fence_id: u64) {
        self.submit_range(buffer, 0, buffer.size(), fence_id);
    }

    pub fn submit_range(&self, buffer: &Arc<DmaBuffer>, start: usize, end: usize, fence_id: u64) {
        self.adapter
            .submit_command(SubmitCommandArgs {
                buffer: Arc::clone(buffer),
                start_offset: start,
                end_offset: end,
                fence_id,
                dma_buffer_physical_address: 0x8000_0000,
            })
            .unwrap();
    }
}

pub fn software_buffer(commands: Vec<u8>) -> Arc<DmaBuffer> {
    Arc::new(DmaBuffer::with_contents(BufferKind::SoftwareCommands, commands))
}
