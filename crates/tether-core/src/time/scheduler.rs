//! 可注入的延迟任务调度器。
//!
//! 生产实现 [`ThreadScheduler`] 维护一个按截止时间排序的小顶堆与一条专用计时线程；
//! 测试实现 [`MockScheduler`] 以虚拟时间驱动，`advance` 返回前所有到期任务均已执行完毕。

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{CoreError, Result, codes};

/// 调度器执行的任务。
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// 统一的“当前时间 + 延迟执行”能力。
///
/// # 契约说明（What）
/// - `now` 单调不减；
/// - `schedule` 立即返回，任务在 `delay` 之后于调度器自己的执行上下文中运行，
///   除非在此之前通过 [`TimerHandle::cancel`] 取消；
/// - 任务不得长时间阻塞，否则会推迟同一调度器上的其他任务。
pub trait Scheduler: Send + Sync + 'static {
    /// 当前单调时间点。
    fn now(&self) -> Instant;

    /// 在 `delay` 之后执行 `task`。
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// 已登记任务的句柄。
///
/// 取消与触发竞争同一个原子位：`cancel` 返回 `true` 时任务保证不会运行。
#[derive(Clone)]
pub struct TimerHandle {
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    fn armed() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ARMED)),
        }
    }

    /// 取消任务；任务已运行或已取消时返回 `false`。
    pub fn cancel(&self) -> bool {
        self.transition(CANCELLED)
    }

    /// 任务尚未运行且未取消。
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    /// 任务是否已被取消。
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// 任务是否已开始运行。
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    fn try_fire(&self) -> bool {
        self.transition(FIRED)
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(ARMED, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Acquire) {
            ARMED => "armed",
            FIRED => "fired",
            _ => "cancelled",
        };
        f.debug_tuple("TimerHandle").field(&state).finish()
    }
}

fn fire(handle: &TimerHandle, task: TimerTask) {
    if !handle.try_fire() {
        return;
    }
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::error!(target: "tether::time", "scheduled task panicked");
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    handle: TimerHandle,
    task: TimerTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // `BinaryHeap` 是大顶堆，反转比较得到“最早截止优先、同截止按登记顺序”。
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    queue: Mutex<TimerQueue>,
    wake: Condvar,
}

/// 单线程计时调度器。
///
/// # 教案式说明
/// - **意图 (Why)**：重连与过期计时频率低，一条后台线程即可覆盖；线程归调度器独占，
///   [`shutdown`](Self::shutdown) 或 `Drop` 时会被唤醒并 `join`，不依赖进程退出回收；
/// - **实现 (How)**：登记任务时压入小顶堆并唤醒线程；线程按最早截止时间 `wait_until`，
///   到期后在释放队列锁的状态下执行任务，任务内可以安全地再次调用 `schedule`；
/// - **契约 (What)**：关闭后尚未触发的任务全部标记为取消，之后登记的任务立即处于取消态。
pub struct ThreadScheduler {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    /// 启动计时线程。
    pub fn new() -> Result<Self> {
        Self::with_name("tether-timer")
    }

    /// 以指定线程名启动计时线程。
    pub fn with_name(name: &str) -> Result<Self> {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(TimerQueue {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run_timer_loop(&worker_shared))
            .map_err(|err| {
                CoreError::new(codes::RUNTIME_SPAWN_FAILED, "failed to spawn timer thread")
                    .with_cause(err)
            })?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// 停止计时线程并取消所有未触发任务；幂等。
    pub fn shutdown(&self) {
        let abandoned = {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            std::mem::take(&mut queue.heap)
        };
        self.shared.wake.notify_all();
        for entry in abandoned.into_vec() {
            entry.handle.cancel();
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            // 任务内部丢弃最后一个引用时不能 join 自己。
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                tracing::error!(target: "tether::time", "timer thread terminated abnormally");
            }
        }
    }

    /// 尚未触发的任务数量（含已取消但未出堆的条目）。
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }
}

impl fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("queued", &self.queued())
            .finish()
    }
}

impl Scheduler for ThreadScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::armed();
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            handle.cancel();
            tracing::warn!(target: "tether::time", "schedule called after shutdown; task dropped");
            return handle;
        }
        // 截止时间超出 `Instant` 表示范围：视为永不触发，句柄保持待定直到被取消。
        let Some(deadline) = Instant::now().checked_add(delay) else {
            tracing::debug!(target: "tether::time", delay_secs = delay.as_secs(), "delay exceeds clock range; timer never fires");
            return handle;
        };
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Entry {
            deadline,
            seq,
            handle: handle.clone(),
            task,
        });
        drop(queue);
        self.shared.wake.notify_one();
        handle
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer_loop(shared: &TimerShared) {
    let mut queue = shared.queue.lock();
    loop {
        if queue.shutdown {
            return;
        }
        let next_deadline = queue.heap.peek().map(|entry| entry.deadline);
        match next_deadline {
            None => shared.wake.wait(&mut queue),
            Some(deadline) if deadline > Instant::now() => {
                let _ = shared.wake.wait_until(&mut queue, deadline);
            }
            Some(_) => {
                if let Some(entry) = queue.heap.pop() {
                    MutexGuard::unlocked(&mut queue, || fire(&entry.handle, entry.task));
                }
            }
        }
    }
}

struct MockEntry {
    deadline: Duration,
    seq: u64,
    handle: TimerHandle,
    task: TimerTask,
}

struct MockState {
    origin: Instant,
    elapsed: Duration,
    next_seq: u64,
    entries: Vec<MockEntry>,
}

/// 虚拟时间调度器。
///
/// # 契约说明（What）
/// - 时间只在 [`advance`](Self::advance) 时前进；
/// - 到期任务按 `(截止时间, 登记顺序)` 在调用 `advance` 的线程上执行，
///   执行期间新登记且在目标时间内到期的任务也会在本次 `advance` 中执行；
/// - 克隆共享同一份虚拟时间。
#[derive(Clone)]
pub struct MockScheduler {
    state: Arc<Mutex<MockState>>,
}

impl MockScheduler {
    /// 以当前真实时间为起点创建虚拟时间。
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                next_seq: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// 推进虚拟时间并执行所有到期任务。
    pub fn advance(&self, delta: Duration) {
        let target = self.state.lock().elapsed.saturating_add(delta);
        loop {
            let due = {
                let mut state = self.state.lock();
                state.entries.retain(|entry| entry.handle.is_pending());
                let next = state
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.deadline <= target)
                    .min_by_key(|(_, entry)| (entry.deadline, entry.seq))
                    .map(|(index, _)| index);
                match next {
                    Some(index) => {
                        let entry = state.entries.remove(index);
                        if entry.deadline > state.elapsed {
                            state.elapsed = entry.deadline;
                        }
                        Some(entry)
                    }
                    None => {
                        state.elapsed = target;
                        None
                    }
                }
            };
            match due {
                Some(entry) => fire(&entry.handle, entry.task),
                None => break,
            }
        }
    }

    /// 执行已到期（零延迟）的任务而不推进时间。
    pub fn run_due(&self) {
        self.advance(Duration::ZERO);
    }

    /// 自起点以来的虚拟时间。
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// 仍在等待的任务数量。
    pub fn pending_tasks(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.handle.is_pending())
            .count()
    }

    /// 距最近一个待执行任务的剩余虚拟时间。
    pub fn next_delay(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|entry| entry.handle.is_pending())
            .map(|entry| entry.deadline.saturating_sub(state.elapsed))
            .min()
    }
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockScheduler")
            .field("elapsed", &self.elapsed())
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

impl Scheduler for MockScheduler {
    fn now(&self) -> Instant {
        let state = self.state.lock();
        state.origin + state.elapsed
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::armed();
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let deadline = state.elapsed.saturating_add(delay);
        state.entries.push(MockEntry {
            deadline,
            seq,
            handle: handle.clone(),
            task,
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn mock_runs_due_tasks_in_deadline_order() {
        let scheduler = MockScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (label, delay) in [("late", 30), ("early", 10), ("tie-a", 20), ("tie-b", 20)] {
            let log = Arc::clone(&log);
            let _ = scheduler.schedule(
                Duration::from_millis(delay),
                Box::new(move || log.lock().push(label)),
            );
        }
        scheduler.advance(Duration::from_millis(20));
        assert_eq!(*log.lock(), vec!["early", "tie-a", "tie-b"]);
        assert_eq!(scheduler.next_delay(), Some(Duration::from_millis(10)));
        scheduler.advance(Duration::from_millis(10));
        assert_eq!(log.lock().len(), 4);
        assert_eq!(scheduler.elapsed(), Duration::from_millis(30));
    }

    #[test]
    fn unrepresentable_deadline_never_fires() {
        let scheduler = ThreadScheduler::with_name("tether-test-far").expect("timer thread");
        let (tx, rx) = mpsc::channel();
        let handle = scheduler.schedule(
            Duration::MAX,
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(handle.is_pending());
        assert_eq!(scheduler.queued(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
        assert!(handle.cancel());
        scheduler.shutdown();
    }

    #[test]
    fn cancelled_task_never_runs() {
        let scheduler = MockScheduler::new();
        let ran = Arc::new(AtomicU8::new(0));
        let counter = Arc::clone(&ran);
        let handle = scheduler.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                counter.store(1, Ordering::SeqCst);
            }),
        );
        assert!(handle.cancel());
        assert!(!handle.cancel());
        scheduler.advance(Duration::from_secs(5));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn task_scheduled_from_task_runs_within_same_advance() {
        let scheduler = MockScheduler::new();
        let hits = Arc::new(AtomicU8::new(0));
        let nested = scheduler.clone();
        let counter = Arc::clone(&hits);
        let _ = scheduler.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let counter = Arc::clone(&counter);
                let _ = nested.schedule(
                    Duration::from_millis(5),
                    Box::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );
        scheduler.advance(Duration::from_millis(10));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn thread_scheduler_fires_and_shuts_down() {
        let scheduler = ThreadScheduler::new().expect("spawn timer");
        let (tx, rx) = mpsc::channel();
        let handle = scheduler.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send("fired");
            }),
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).expect("timer fired"),
            "fired"
        );
        assert!(handle.has_fired());

        let abandoned = scheduler.schedule(Duration::from_secs(3600), Box::new(|| {}));
        scheduler.shutdown();
        assert!(abandoned.is_cancelled());
        let after = scheduler.schedule(Duration::ZERO, Box::new(|| {}));
        assert!(after.is_cancelled());
    }
}
