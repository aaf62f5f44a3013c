//! 序号到达追踪：以“连续区间（run）”压缩记录已观测序号，并给出缺口。
//!
//! # 设计背景（Why）
//! - 服务端为每个频道下发单调递增的序号，客户端断线、重连期间可能漏收；
//! - 已观测集合往往是“一段从起点开始的长前缀 + 少量孤岛”，按区间存储比按值存储紧凑得多。
//!
//! # 表示方式（What）
//! - 每个区间显式标注为 [`Run::Prefix`]（从起点 `floor` 开始）、[`Run::Singleton`]、[`Run::Span`]；
//! - 对外的标记序列（[`SequencePresenceTracker::markers`]）：前缀区间只贡献结束值，
//!   单点区间贡献一个值，跨度区间贡献起止两个值；区间之间至少隔一个缺失值。
//!
//! # 执行逻辑（How）
//! - 插入时以二分查找定位第一个结束值不小于 `v` 的区间；若已覆盖则直接返回；
//! - 否则检查左邻（结束于 `v-1`）与右邻（起始于 `v+1`），合并为一个区间后按起点重新打标；
//! - 复杂度：查找 `O(log n)`，合并为一次 `Vec` 的插入或删除，`n` 为区间数而非序号数。

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// 默认起点。
pub const DEFAULT_FLOOR: u64 = 1;

/// 已观测序号的一个极大连续区间。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Run {
    /// 从起点开始的前缀区间，仅记录结束值。
    Prefix { end: u64 },
    /// 单个序号。
    Singleton(u64),
    /// 不含起点、长度不小于 2 的区间。
    Span { start: u64, end: u64 },
}

impl Run {
    fn from_bounds(start: u64, end: u64, floor: u64) -> Self {
        if start == floor {
            Run::Prefix { end }
        } else if start == end {
            Run::Singleton(start)
        } else {
            Run::Span { start, end }
        }
    }

    fn start(&self, floor: u64) -> u64 {
        match *self {
            Run::Prefix { .. } => floor,
            Run::Singleton(value) => value,
            Run::Span { start, .. } => start,
        }
    }

    fn end(&self) -> u64 {
        match *self {
            Run::Prefix { end } => end,
            Run::Singleton(value) => value,
            Run::Span { end, .. } => end,
        }
    }

    fn push_markers(&self, out: &mut Vec<u64>) {
        match *self {
            Run::Prefix { end } => out.push(end),
            Run::Singleton(value) => out.push(value),
            Run::Span { start, end } => {
                out.push(start);
                out.push(end);
            }
        }
    }
}

/// 单个流的序号到达追踪器。
///
/// 方法均需 `&mut self`，跨线程使用时由外层（例如 [`SequenceLedger`]）以每流一把锁串行化。
#[derive(Clone, PartialEq, Eq)]
pub struct SequencePresenceTracker {
    floor: u64,
    runs: Vec<Run>,
}

impl SequencePresenceTracker {
    /// 以默认起点 1 创建追踪器。
    pub fn new() -> Self {
        Self::with_floor(DEFAULT_FLOOR)
    }

    /// 以指定起点创建追踪器；小于起点的序号视为已覆盖。
    pub fn with_floor(floor: u64) -> Self {
        Self {
            floor,
            runs: Vec::new(),
        }
    }

    /// 起点。
    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// 标记 `value` 已观测；仅当内部状态发生变化时返回 `true`。
    ///
    /// ```rust
    /// use tether_core::sequence::SequencePresenceTracker;
    ///
    /// let mut tracker = SequencePresenceTracker::new();
    /// for v in [1, 2, 3, 5] {
    ///     tracker.add(v);
    /// }
    /// assert_eq!(tracker.markers(), vec![3, 5]);
    /// assert!(tracker.add(4));
    /// assert_eq!(tracker.markers(), vec![5]);
    /// assert!(!tracker.add(4));
    /// ```
    pub fn add(&mut self, value: u64) -> bool {
        if value < self.floor {
            return false;
        }
        let floor = self.floor;
        let index = self.runs.partition_point(|run| run.end() < value);
        if let Some(run) = self.runs.get(index)
            && run.start(floor) <= value
        {
            return false;
        }

        let joins_below = index > 0
            && value
                .checked_sub(1)
                .is_some_and(|below| self.runs[index - 1].end() == below);
        let joins_above = index < self.runs.len()
            && value
                .checked_add(1)
                .is_some_and(|above| self.runs[index].start(floor) == above);

        match (joins_below, joins_above) {
            (true, true) => {
                let start = self.runs[index - 1].start(floor);
                let end = self.runs[index].end();
                self.runs[index - 1] = Run::from_bounds(start, end, floor);
                self.runs.remove(index);
            }
            (true, false) => {
                let start = self.runs[index - 1].start(floor);
                self.runs[index - 1] = Run::from_bounds(start, value, floor);
            }
            (false, true) => {
                let end = self.runs[index].end();
                self.runs[index] = Run::from_bounds(value, end, floor);
            }
            (false, false) => {
                self.runs
                    .insert(index, Run::from_bounds(value, value, floor));
            }
        }
        true
    }

    /// `value` 是否已观测。
    pub fn contains(&self, value: u64) -> bool {
        if value < self.floor {
            return true;
        }
        let index = self.runs.partition_point(|run| run.end() < value);
        self.runs
            .get(index)
            .is_some_and(|run| run.start(self.floor) <= value)
    }

    /// 已观测区间的标记序列。
    pub fn markers(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.runs.len() * 2);
        for run in &self.runs {
            run.push_markers(&mut out);
        }
        out
    }

    /// 内部区间视图。
    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    /// 已观测的最大序号。
    pub fn highest(&self) -> Option<u64> {
        self.runs.last().map(Run::end)
    }

    /// 从起点开始连续观测到的最大序号。
    pub fn contiguous_through(&self) -> Option<u64> {
        match self.runs.first() {
            Some(Run::Prefix { end }) => Some(*end),
            _ => None,
        }
    }

    /// 起点到最大已观测序号之间缺失的闭区间，升序排列。
    pub fn missing_ranges(&self) -> Vec<RangeInclusive<u64>> {
        let mut gaps = Vec::new();
        let mut expected = self.floor;
        for run in &self.runs {
            let start = run.start(self.floor);
            if start > expected {
                gaps.push(expected..=start - 1);
            }
            expected = run.end().saturating_add(1);
        }
        gaps
    }

    /// 是否存在缺口。
    pub fn has_gaps(&self) -> bool {
        self.runs
            .first()
            .is_some_and(|run| !matches!(run, Run::Prefix { .. }))
            || self.runs.len() > 1
    }

    /// 清空已观测集合，保留起点。
    pub fn clear(&mut self) {
        self.runs.clear();
    }
}

impl Default for SequencePresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SequencePresenceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequencePresenceTracker")
            .field("floor", &self.floor)
            .field("markers", &self.markers())
            .finish()
    }
}

/// 一次观测的结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
    /// 该序号此前未被观测。
    pub fresh: bool,
    /// 观测后的缺口列表。
    pub missing: Vec<RangeInclusive<u64>>,
    /// 本次观测越过已观测最大值时新出现的缺口。
    pub opened: Option<RangeInclusive<u64>>,
}

/// 多个流的追踪器注册表，每个流一把互斥锁。
///
/// 不同流之间的观测互不阻塞；同一流上的插入被串行化，因为区间合并的中间状态依赖插入顺序。
#[derive(Debug)]
pub struct SequenceLedger {
    floor: u64,
    streams: DashMap<String, Arc<Mutex<SequencePresenceTracker>>>,
}

impl SequenceLedger {
    pub fn new() -> Self {
        Self::with_floor(DEFAULT_FLOOR)
    }

    pub fn with_floor(floor: u64) -> Self {
        Self {
            floor,
            streams: DashMap::new(),
        }
    }

    fn tracker(&self, stream: &str) -> Arc<Mutex<SequencePresenceTracker>> {
        if let Some(existing) = self.streams.get(stream) {
            return Arc::clone(existing.value());
        }
        let floor = self.floor;
        Arc::clone(
            self.streams
                .entry(stream.to_owned())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(SequencePresenceTracker::with_floor(floor)))
                })
                .value(),
        )
    }

    /// 记录 `stream` 上的序号并返回最新缺口。
    pub fn observe(&self, stream: &str, sequence: u64) -> Observation {
        let tracker = self.tracker(stream);
        let mut guard = tracker.lock();
        let expected = guard
            .highest()
            .map_or(guard.floor(), |highest| highest.saturating_add(1));
        let fresh = guard.add(sequence);
        let opened = (fresh && sequence > expected).then(|| expected..=sequence - 1);
        Observation {
            fresh,
            missing: guard.missing_ranges(),
            opened,
        }
    }

    /// `stream` 当前的缺口；未知流返回空。
    pub fn missing(&self, stream: &str) -> Vec<RangeInclusive<u64>> {
        self.streams
            .get(stream)
            .map(|entry| Arc::clone(entry.value()))
            .map(|tracker| tracker.lock().missing_ranges())
            .unwrap_or_default()
    }

    /// `stream` 已观测的最大序号。
    pub fn highest(&self, stream: &str) -> Option<u64> {
        self.streams
            .get(stream)
            .map(|entry| Arc::clone(entry.value()))
            .and_then(|tracker| tracker.lock().highest())
    }

    /// 清空 `stream` 的全部记录，例如服务端声明序号重置时；流本身保持登记。
    ///
    /// 在流自己的锁内原地清空，已取得追踪器句柄的并发观测不会写入被丢弃的副本。
    pub fn reset(&self, stream: &str) -> bool {
        self.streams
            .get(stream)
            .map(|entry| Arc::clone(entry.value()))
            .map(|tracker| tracker.lock().clear())
            .is_some()
    }

    /// 已登记的流数量。
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl Default for SequenceLedger {
    fn default() -> Self {
        Self::new()
    }
}
