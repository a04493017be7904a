//! Phase-synchronized intra-op worker pool
//!
//! The pool executes one tensor operation at a time across N workers. The
//! main thread doubles as worker 0; workers 1..N-1 are OS threads parked on
//! a single condition variable. Work is published as a *phase*: a monotonic
//! counter incremented once per submitted op. A worker that misses a
//! broadcast still sees `pool.phase > worker.phase` on its next wakeup, so
//! lost wakeups are impossible. The pool stays hot between operations;
//! per-op wake-up is one broadcast plus N-1 condvar wakes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::kernels::{ComputePayload, KernelRegistry};
use crate::tensor::TensorNode;

/// Payload slot for one worker, written by the main thread during kickoff
/// while the worker is quiesced.
struct PayloadSlot {
    node: Option<Arc<TensorNode>>,
    thread_num: usize,
}

/// Everything guarded by the pool mutex.
struct PoolState {
    /// Teardown flag; workers exit their loop when they observe it.
    interrupt: bool,
    /// Current compute phase. Incremented once per kickoff and once at
    /// teardown; never decreases.
    phase: u64,
    /// Workers that have completed the current phase.
    num_completed: usize,
    /// Workers that execute the kernel this phase; the rest are
    /// parked-in-phase (they observe the phase but skip the kernel).
    num_active_workers: usize,
    /// Last phase each worker has observed; `worker_phases[i] <= phase`.
    worker_phases: Vec<u64>,
    payloads: Vec<PayloadSlot>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    cv: Condvar,
    num_allocated_workers: usize,
    /// Spawned workers currently inside their loop. Only read outside the
    /// mutex during startup/teardown spin-yield.
    num_workers_online: AtomicUsize,
    kernels: Arc<KernelRegistry>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("thread pool mutex poisoned")
    }

    /// One await/work/signal round for `thread_idx`. Returns false when the
    /// pool was interrupted, true when a phase was retired.
    fn worker_step(&self, thread_idx: usize) -> bool {
        let payload = {
            let mut state = self.lock();
            while !state.interrupt && state.phase == state.worker_phases[thread_idx] {
                state = self
                    .cv
                    .wait(state)
                    .expect("thread pool mutex poisoned");
            }
            if state.interrupt {
                return false;
            }
            state.worker_phases[thread_idx] = state.phase;
            // One-shot guard: the node is taken out of the slot, so a phase
            // can never execute twice. Parked-in-phase workers leave it for
            // the next kickoff to overwrite.
            let node = if thread_idx < state.num_active_workers {
                state.payloads[thread_idx].node.take()
            } else {
                None
            };
            ComputePayload {
                node,
                thread_idx,
                thread_num: state.payloads[thread_idx].thread_num,
            }
        };
        self.kernels.dispatch(&payload);
        let mut state = self.lock();
        state.num_completed += 1;
        if state.num_completed == self.num_allocated_workers {
            // Last one out wakes the main thread blocked in barrier().
            self.cv.notify_all();
        }
        true
    }
}

fn worker_thread_main(shared: Arc<PoolShared>, thread_idx: usize) {
    shared.num_workers_online.fetch_add(1, Ordering::SeqCst);
    while shared.worker_step(thread_idx) {}
    shared.num_workers_online.fetch_sub(1, Ordering::SeqCst);
}

/// Intra-op worker pool. Dropping it interrupts and joins every worker.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Create a pool of `num_workers` workers (the caller is worker 0) and
    /// block until every spawned worker is online and parked on the
    /// condition variable.
    pub fn new(num_workers: usize, kernels: Arc<KernelRegistry>) -> Self {
        assert!(num_workers >= 1, "thread pool needs at least one worker");
        let payloads = (0..num_workers)
            .map(|_| PayloadSlot {
                node: None,
                thread_num: num_workers,
            })
            .collect();
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                interrupt: false,
                phase: 0,
                num_completed: 0,
                num_active_workers: num_workers,
                worker_phases: vec![0; num_workers],
                payloads,
            }),
            cv: Condvar::new(),
            num_allocated_workers: num_workers,
            num_workers_online: AtomicUsize::new(0),
            kernels,
        });
        let handles = (1..num_workers)
            .map(|thread_idx| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("cpuforge-worker-{thread_idx}"))
                    .spawn(move || worker_thread_main(shared, thread_idx))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        while shared.num_workers_online.load(Ordering::SeqCst) != num_workers - 1 {
            thread::yield_now();
        }
        ThreadPool { shared, handles }
    }

    /// Publish a new phase: payload, active width, phase bump, then wake
    /// everyone.
    fn kickoff(&self, node: &Arc<TensorNode>, num_active_workers: usize) {
        {
            let mut state = self.shared.lock();
            state.num_active_workers = num_active_workers;
            for slot in &mut state.payloads {
                slot.node = Some(Arc::clone(node));
                slot.thread_num = num_active_workers;
            }
            state.phase += 1;
            state.num_completed = 0;
        }
        self.shared.cv.notify_all();
    }

    /// Block until all allocated workers have signalled completion of the
    /// current phase.
    fn barrier(&self) {
        let mut state = self.shared.lock();
        while state.num_completed != self.shared.num_allocated_workers {
            state = self
                .shared
                .cv
                .wait(state)
                .expect("thread pool mutex poisoned");
        }
        debug_assert!(
            state.worker_phases.iter().all(|&p| p == state.phase),
            "barrier returned with a worker behind the current phase"
        );
    }

    /// Execute `node` across `num_active_workers` workers and wait for the
    /// op to retire. The calling thread is worker 0.
    pub fn parallel_compute(&self, node: &Arc<TensorNode>, num_active_workers: usize) {
        debug_assert!(
            (1..=self.shared.num_allocated_workers).contains(&num_active_workers),
            "active worker count out of range"
        );
        self.kickoff(node, num_active_workers);
        // Worker 0 never waits here: kickoff just advanced the phase.
        self.shared.worker_step(0);
        self.barrier();
    }

    /// Number of workers the pool holds, including worker 0.
    pub fn num_allocated_workers(&self) -> usize {
        self.shared.num_allocated_workers
    }

    /// Spawned workers currently inside their loop (excludes worker 0).
    pub fn workers_online(&self) -> usize {
        self.shared.num_workers_online.load(Ordering::SeqCst)
    }

    /// Current compute phase; equals the number of retired ops.
    pub fn phase(&self) -> u64 {
        self.shared.lock().phase
    }

    /// Last phase each worker has observed. Diagnostics only.
    pub fn worker_phases(&self) -> Vec<u64> {
        self.shared.lock().worker_phases.clone()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.interrupt = true;
            state.phase += 1;
        }
        self.shared.cv.notify_all();
        while self.shared.num_workers_online.load(Ordering::SeqCst) != 0 {
            thread::yield_now();
        }
        for handle in self.handles.drain(..) {
            handle.join().expect("failed to join worker thread");
        }
    }
}
