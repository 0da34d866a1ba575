//! Threading runtime for producer units
//!
//! Uses native OS threads (std::thread); each unit owns its own emit stream
//! and event count. Units share only the stop condition and, when a cap is
//! set, a chunked event budget.

use crate::config::{BurstPattern, EventRate};
use crate::workload::BurstScheduler;
use crate::{Error, Result};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

pub mod affinity;

// Re-export main types
pub use affinity::{get_core_count, platform_affinity, AffinityControl, NoAffinity, OsAffinity};

/// Cooperative stop flag shared by all producer units
///
/// Set once, read often. Units poll it between cycles, so no ordering
/// stronger than eventual visibility is needed.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every unit to stop after its current cycle
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Events a unit takes from a shared cap at a time
const CAP_CHUNK: u64 = 1024;

/// Event cap shared by all units, handed out in chunks
///
/// Units count locally and only touch the shared counter once per chunk.
#[derive(Debug)]
struct EventBudget {
    remaining: AtomicU64,
}

impl EventBudget {
    fn new(cap: u64) -> Self {
        Self { remaining: AtomicU64::new(cap) }
    }

    /// Take up to one chunk; 0 once the cap is used up
    fn reserve(&self) -> u64 {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                (left > 0).then(|| left - left.min(CAP_CHUNK))
            })
            .map_or(0, |left| left.min(CAP_CHUNK))
    }
}

/// What every producer unit runs
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerPlan {
    pub burst_pattern: BurstPattern,
    pub event_rate: EventRate,
    pub duration: Duration,
    /// Total events across all units; emits past the cap are suppressed
    /// and a unit with nothing left to reserve exits
    pub event_count: Option<u64>,
}

/// Outcome of a producer run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub threads: usize,
    pub events_emitted: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn events_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.events_emitted as f64 / secs
        } else {
            0.0
        }
    }
}

/// Multi-threaded runtime that drives `threads` burst schedulers in parallel
pub struct ProducerRuntime {
    num_threads: usize,
}

impl ProducerRuntime {
    /// Create a new producer runtime
    pub fn new(num_threads: usize) -> Self {
        Self { num_threads }
    }

    /// Run all units until the deadline, the stop signal, or the event cap
    ///
    /// `emitter_factory` is called once per unit (with the unit index) on the
    /// unit's own thread and returns that unit's emit callback. All units are
    /// released together through a barrier.
    pub fn run<F, E>(
        &self,
        plan: &ProducerPlan,
        stop: &StopSignal,
        emitter_factory: F,
    ) -> Result<RunSummary>
    where
        F: Fn(usize) -> E + Send + Sync + 'static,
        E: FnMut(),
    {
        if self.num_threads == 0 {
            return Err(Error::invalid("Producer runtime needs at least one thread"));
        }
        // Surface configuration errors before any thread starts
        crate::workload::BurstShape::resolve(plan.burst_pattern, plan.event_rate)?;

        let barrier = Arc::new(Barrier::new(self.num_threads));
        let budget = plan.event_count.map(|cap| Arc::new(EventBudget::new(cap)));
        let factory = Arc::new(emitter_factory);
        let start = Instant::now();
        let deadline = start + plan.duration;
        let mut handles = Vec::with_capacity(self.num_threads);

        for unit_id in 0..self.num_threads {
            let barrier = barrier.clone();
            let budget = budget.clone();
            let factory = factory.clone();
            let stop = stop.clone();
            let plan = plan.clone();

            let handle = thread::Builder::new()
                .name(format!("producer-{unit_id}"))
                .spawn(move || -> Result<u64> {
                    let mut emit_event = factory(unit_id);
                    let emitted = Cell::new(0u64);
                    let allowance = Cell::new(0u64);
                    let exhausted = Cell::new(false);
                    let emit = || {
                        if let Some(budget) = &budget {
                            if allowance.get() == 0 {
                                allowance.set(budget.reserve());
                            }
                            if allowance.get() == 0 {
                                exhausted.set(true);
                                return;
                            }
                            allowance.set(allowance.get() - 1);
                        }
                        emit_event();
                        emitted.set(emitted.get() + 1);
                    };
                    let mut scheduler =
                        BurstScheduler::new(plan.burst_pattern, plan.event_rate, emit)?;

                    barrier.wait();
                    while !stop.is_stopped() && !exhausted.get() && Instant::now() < deadline {
                        scheduler.cycle();
                    }
                    drop(scheduler);
                    Ok(emitted.get())
                })?;

            handles.push(handle);
        }

        let mut events_emitted = 0u64;
        for handle in handles {
            events_emitted += handle
                .join()
                .map_err(|e| Error::Other(format!("Producer thread panicked: {:?}", e)))??;
        }

        Ok(RunSummary { threads: self.num_threads, events_emitted, elapsed: start.elapsed() })
    }

    /// Get number of threads
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn plan(pattern: BurstPattern, rate: EventRate, duration: Duration) -> ProducerPlan {
        ProducerPlan { burst_pattern: pattern, event_rate: rate, duration, event_count: None }
    }

    #[test]
    fn test_drip_scenario_ten_per_second() {
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let sink = stamps.clone();
        let runtime = ProducerRuntime::new(1);

        let summary = runtime
            .run(
                &plan(BurstPattern::Drip, EventRate::PerSecond(10), Duration::from_secs(1)),
                &StopSignal::new(),
                move |_| {
                    let sink = sink.clone();
                    move || sink.lock().unwrap().push(Instant::now())
                },
            )
            .unwrap();

        let stamps = stamps.lock().unwrap();
        assert_eq!(summary.events_emitted, stamps.len() as u64);
        assert!((9..=11).contains(&stamps.len()), "expected ~10 emits, got {}", stamps.len());
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_units_run_independently() {
        let per_unit = Arc::new(Mutex::new(vec![0u64; 4]));
        let sink = per_unit.clone();

        let summary = ProducerRuntime::new(4)
            .run(
                &plan(BurstPattern::Bolus, EventRate::PerSecond(20), Duration::from_millis(300)),
                &StopSignal::new(),
                move |unit_id| {
                    let sink = sink.clone();
                    move || sink.lock().unwrap()[unit_id] += 1
                },
            )
            .unwrap();

        // One bolus per unit fits in 300ms
        assert_eq!(*per_unit.lock().unwrap(), vec![20, 20, 20, 20]);
        assert_eq!(summary.events_emitted, 80);
        assert_eq!(summary.threads, 4);
    }

    #[test]
    fn test_event_cap_is_exact() {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();

        let mut capped = plan(BurstPattern::None, EventRate::Unbounded, Duration::from_secs(30));
        capped.event_count = Some(10_000);

        let summary = ProducerRuntime::new(3)
            .run(&capped, &StopSignal::new(), move |_| {
                let counter = counter.clone();
                move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
            .unwrap();

        assert_eq!(fired.load(Ordering::Relaxed), 10_000);
        assert_eq!(summary.events_emitted, 10_000);
        assert!(summary.elapsed < Duration::from_secs(30));
    }

    #[test]
    fn test_budget_hands_out_chunks() {
        let budget = EventBudget::new(2 * CAP_CHUNK + 452);
        assert_eq!(budget.reserve(), CAP_CHUNK);
        assert_eq!(budget.reserve(), CAP_CHUNK);
        assert_eq!(budget.reserve(), 452);
        assert_eq!(budget.reserve(), 0);
        assert_eq!(budget.reserve(), 0);
    }

    #[test]
    fn test_cap_below_one_chunk_per_unit() {
        // Fewer events than one chunk per unit: some units get nothing
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();

        let mut capped = plan(BurstPattern::None, EventRate::Unbounded, Duration::from_secs(30));
        capped.event_count = Some(CAP_CHUNK * 2 + 7);

        let summary = ProducerRuntime::new(4)
            .run(&capped, &StopSignal::new(), move |_| {
                let counter = counter.clone();
                move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
            .unwrap();

        assert_eq!(fired.load(Ordering::Relaxed), CAP_CHUNK * 2 + 7);
        assert_eq!(summary.events_emitted, CAP_CHUNK * 2 + 7);
        assert!(summary.elapsed < Duration::from_secs(30));
    }

    #[test]
    fn test_uncapped_counts_are_summed_per_unit() {
        let per_unit = Arc::new(Mutex::new(vec![0u64; 3]));
        let sink = per_unit.clone();

        let summary = ProducerRuntime::new(3)
            .run(
                &plan(BurstPattern::None, EventRate::Unbounded, Duration::from_millis(50)),
                &StopSignal::new(),
                move |unit_id| {
                    let sink = sink.clone();
                    move || sink.lock().unwrap()[unit_id] += 1
                },
            )
            .unwrap();

        let per_unit = per_unit.lock().unwrap();
        assert!(per_unit.iter().all(|n| *n > 0), "{per_unit:?}");
        assert_eq!(summary.events_emitted, per_unit.iter().sum::<u64>());
    }

    #[test]
    fn test_external_stop_signal() {
        let stop = StopSignal::new();
        let trigger = stop.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.request_stop();
        });

        let summary = ProducerRuntime::new(2)
            .run(
                &plan(BurstPattern::Drip, EventRate::PerSecond(100), Duration::from_secs(30)),
                &stop,
                |_| || {},
            )
            .unwrap();
        stopper.join().unwrap();

        assert!(stop.is_stopped());
        assert!(summary.elapsed < Duration::from_secs(2), "stop took {:?}", summary.elapsed);
    }

    #[test]
    fn test_invalid_plan_fails_before_spawning() {
        let result = ProducerRuntime::new(2).run(
            &plan(BurstPattern::Drip, EventRate::Unbounded, Duration::from_secs(1)),
            &StopSignal::new(),
            |_| || {},
        );
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

        let result = ProducerRuntime::new(0).run(
            &plan(BurstPattern::None, EventRate::Unbounded, Duration::from_secs(1)),
            &StopSignal::new(),
            |_| || {},
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_events_per_sec() {
        let summary =
            RunSummary { threads: 1, events_emitted: 500, elapsed: Duration::from_secs(2) };
        assert_eq!(summary.events_per_sec(), 250.0);
        let empty = RunSummary { threads: 1, events_emitted: 0, elapsed: Duration::ZERO };
        assert_eq!(empty.events_per_sec(), 0.0);
    }
}
