//! 入站处理：字节 → 帧 → 命令，有序命令更新序号账本并上报新出现的缺口。
//!
//! # 设计背景（Why）
//! - 传输层只负责搬运字节，分帧、协议错误隔离与缺口检测属于可靠性层；
//! - 缺口需要交给补发逻辑（backfill），但同一缺口只应上报一次：后续乱序到达的序号
//!   只会缩小已有缺口，不会产生新的上报。
//!
//! # 契约说明（What）
//! - [`InboundPipeline::push_bytes`] 中单帧错误只记录告警并丢弃该帧，其余帧照常返回；
//! - [`InboundPipeline::track`] 是账本的唯一写入口，传输适配器只需把解码出的命令
//!   投递到连接的入站事件上，由客户端统一调用。

use std::ops::RangeInclusive;

use parking_lot::Mutex;
use tether_codec_frame::{Command, DecodedFrame, FrameCodec, FrameDecoder};
use tether_core::sequence::SequenceLedger;
use tether_core::signal::Signal;

/// 新出现的序号缺口。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GapReport {
    /// 流（频道）名。
    pub stream: String,
    /// 触发上报的序号。
    pub sequence: u64,
    /// 本次新出现的缺口。
    pub opened: RangeInclusive<u64>,
    /// 该流当前全部缺口。
    pub missing: Vec<RangeInclusive<u64>>,
}

/// [`InboundPipeline::track`] 对单条命令的判定。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// 首次到达的有序命令。
    Fresh,
    /// 已观测过的序号，通常来自补发或服务端重放。
    Duplicate,
    /// 不属于任何有序流。
    Unsequenced,
}

/// 单连接的入站流水线。
#[derive(Debug)]
pub struct InboundPipeline {
    decoder: Mutex<FrameDecoder>,
    ledger: SequenceLedger,
    gaps: Signal<GapReport>,
}

impl InboundPipeline {
    pub fn new(codec: FrameCodec, floor: u64) -> Self {
        Self {
            decoder: Mutex::new(FrameDecoder::new(codec)),
            ledger: SequenceLedger::with_floor(floor),
            gaps: Signal::new(),
        }
    }

    /// 追加入站字节，返回所有已完整到达的帧。
    pub fn push_bytes(&self, bytes: &[u8]) -> Vec<DecodedFrame> {
        let results = {
            let mut decoder = self.decoder.lock();
            decoder.extend(bytes);
            decoder.drain()
        };
        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(frame) => Some(frame),
                Err(err) => {
                    tracing::warn!(code = err.code(), error = %err, "dropping inbound frame");
                    None
                }
            })
            .collect()
    }

    /// 登记一条入站命令；有序命令打开新缺口时分发 [`GapReport`]。
    pub fn track(&self, command: &Command) -> Delivery {
        let Some((stream, sequence)) = command.stream_position() else {
            return Delivery::Unsequenced;
        };
        let observation = self.ledger.observe(stream, sequence);
        if !observation.fresh {
            tracing::debug!(stream, sequence, "duplicate sequenced command");
            return Delivery::Duplicate;
        }
        if let Some(opened) = observation.opened {
            tracing::info!(
                stream,
                sequence,
                gap_start = *opened.start(),
                gap_end = *opened.end(),
                "sequence gap detected"
            );
            self.gaps.emit(&GapReport {
                stream: stream.to_owned(),
                sequence,
                opened,
                missing: observation.missing,
            });
        }
        Delivery::Fresh
    }

    /// 重连后丢弃半帧；账本保留，以便跨连接检测缺口。
    pub fn reset_framing(&self) {
        self.decoder.lock().reset();
    }

    pub fn ledger(&self) -> &SequenceLedger {
        &self.ledger
    }

    /// 缺口上报事件。
    pub fn gaps(&self) -> &Signal<GapReport> {
        &self.gaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn message(channel: &str, sequence: u64) -> Command {
        Command::new("message")
            .with_channel(channel)
            .with_sequence(sequence)
    }

    #[test]
    fn each_gap_is_reported_once() {
        let pipeline = InboundPipeline::new(FrameCodec::new(), 1);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let _registration = pipeline
            .gaps()
            .subscribe(move |report: &GapReport| sink.lock().push(report.clone()));

        for sequence in [1, 2, 5, 4, 7] {
            assert_eq!(pipeline.track(&message("/news", sequence)), Delivery::Fresh);
        }
        assert_eq!(pipeline.track(&message("/news", 4)), Delivery::Duplicate);
        assert_eq!(pipeline.track(&Command::new("ping")), Delivery::Unsequenced);

        let reports = reports.lock();
        let opened: Vec<_> = reports.iter().map(|report| report.opened.clone()).collect();
        assert_eq!(opened, vec![3..=4, 6..=6]);
        assert_eq!(reports[1].missing, vec![3..=3, 6..=6]);
        assert_eq!(pipeline.ledger().missing("/news"), vec![3..=3, 6..=6]);
    }

    #[test]
    fn first_message_above_floor_opens_a_gap() {
        let pipeline = InboundPipeline::new(FrameCodec::new(), 10);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let _registration = pipeline
            .gaps()
            .subscribe(move |report: &GapReport| sink.lock().push(report.opened.clone()));

        pipeline.track(&message("/a", 3));
        pipeline.track(&message("/a", 12));
        assert_eq!(*reports.lock(), vec![10..=11]);
    }

    #[test]
    #[traced_test]
    fn bad_frames_are_logged_and_skipped() {
        let pipeline = InboundPipeline::new(FrameCodec::with_max_frame_size(64), 1);
        let frames = pipeline.push_bytes(b"9:1::x\n4:1::{\"type\":\"ok\"}\n3:2::par");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command().map(Command::kind), Some("ok"));
        assert!(logs_contain("dropping inbound frame"));

        pipeline.reset_framing();
        let frames = pipeline.push_bytes(b"tial\n2:::\n");
        assert_eq!(frames.len(), 1, "the half frame was discarded with the old connection");
    }
}
