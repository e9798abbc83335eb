//! Bi-queue fan-in for one streaming request.
//!
//! The orchestrator runs on a spawned worker task; its callbacks push into
//! two bounded queues (thoughts, answer tokens) plus a done signal with an
//! error slot. This task drains both queues into an ordered frame stream:
//! every `thinking_chunk` precedes `thinking_end`, `thinking_end` (when
//! emitted) precedes `answer_start`, every `answer` lies between
//! `answer_start` and the terminal, and exactly one terminal frame carries
//! `is_last`. Bounded queues block the producer when full, carrying the
//! consumer's back-pressure all the way to the LLM stream.

use async_trait::async_trait;
use axum::extract::ws::WebSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use stream_frame::{AgentResponse, MessageRequest, StreamFrame};
use wayfarer::{ProcessMode, RunResult, StreamHandler};

use super::app::AppState;
use super::connection::{reply, SendError};

pub(crate) const QUEUE_CAPACITY: usize = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Pacing between answer frames; a tuning constant, not a contract.
const ANSWER_PACING: Duration = Duration::from_millis(20);

/// Completion flag plus the error slot filled by a failed run or a worker
/// fault.
#[derive(Default)]
pub(crate) struct DoneSignal {
    done: AtomicBool,
    error: Mutex<Option<String>>,
}

impl DoneSignal {
    pub(crate) fn set_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        let mut slot = self.error.lock().expect("error slot lock");
        if slot.is_none() {
            *slot = Some(message.into());
        }
    }

    pub(crate) fn take_error(&self) -> Option<String> {
        self.error.lock().expect("error slot lock").take()
    }
}

/// Orchestrator callbacks backed by the two queues. Sends block when a queue
/// is full; a closed queue (consumer gone) is ignored so an abandoned run
/// can finish quietly.
pub(crate) struct QueueSink {
    thinking_tx: mpsc::Sender<(String, f64)>,
    answer_tx: mpsc::Sender<String>,
    done: Arc<DoneSignal>,
}

#[async_trait]
impl StreamHandler for QueueSink {
    async fn on_thinking(&self, content: &str, elapsed_secs: f64) {
        let _ = self.thinking_tx.send((content.to_string(), elapsed_secs)).await;
    }

    async fn on_answer_token(&self, token: &str) {
        let _ = self.answer_tx.send(token.to_string()).await;
    }

    async fn on_done(&self, result: &RunResult) {
        if !result.success {
            self.done.set_error(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "未知错误".to_string()),
            );
        }
        self.done.set_done();
    }
}

/// Frame transport; the WebSocket in production, a recorder in tests.
#[async_trait]
pub(crate) trait FrameSender: Send {
    async fn send(&mut self, frame: StreamFrame) -> Result<(), SendError>;
}

pub(crate) struct WsFrameSender<'a>(pub(crate) &'a mut WebSocket);

#[async_trait]
impl FrameSender for WsFrameSender<'_> {
    async fn send(&mut self, frame: StreamFrame) -> Result<(), SendError> {
        reply(self.0, &AgentResponse::Frame(frame)).await
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PumpStats {
    pub(crate) thinking_sent: bool,
    pub(crate) answer_started: bool,
    pub(crate) answer_chunks: usize,
}

/// Empties queued thoughts right before the answer boundary.
async fn flush_thinking<S: FrameSender>(
    thinking_rx: &mut mpsc::Receiver<(String, f64)>,
    sender: &mut S,
    stats: &mut PumpStats,
) -> Result<(), SendError> {
    if stats.answer_started {
        return Ok(());
    }
    while let Ok((content, _elapsed)) = thinking_rx.try_recv() {
        sender.send(StreamFrame::thinking_chunk(content)).await?;
        stats.thinking_sent = true;
    }
    Ok(())
}

async fn start_answer_if_needed<S: FrameSender>(
    sender: &mut S,
    stats: &mut PumpStats,
) -> Result<(), SendError> {
    if !stats.answer_started {
        if stats.thinking_sent {
            sender.send(StreamFrame::thinking_end()).await?;
        }
        sender.send(StreamFrame::answer_start()).await?;
        stats.answer_started = true;
    }
    Ok(())
}

/// Drains both queues into ordered frames until the done signal, then emits
/// the single terminal frame. The caller emits `thinking_start` beforehand.
///
/// Thoughts queued when the first answer token arrives are flushed before
/// `thinking_end`; once the answer has started the thought queue is no
/// longer read, so no thinking frame can cross the boundary.
pub(crate) async fn run_stream_pump<S: FrameSender>(
    mut thinking_rx: mpsc::Receiver<(String, f64)>,
    mut answer_rx: mpsc::Receiver<String>,
    done: Arc<DoneSignal>,
    sender: &mut S,
) -> Result<PumpStats, SendError> {
    let mut stats = PumpStats::default();

    loop {
        let mut both_closed = true;

        if !stats.answer_started {
            match tokio::time::timeout(POLL_INTERVAL, thinking_rx.recv()).await {
                Ok(Some((content, _elapsed))) => {
                    sender.send(StreamFrame::thinking_chunk(content)).await?;
                    stats.thinking_sent = true;
                    both_closed = false;
                }
                Ok(None) => {}
                Err(_) => both_closed = false,
            }
        }

        match tokio::time::timeout(POLL_INTERVAL, answer_rx.recv()).await {
            Ok(Some(token)) => {
                flush_thinking(&mut thinking_rx, sender, &mut stats).await?;
                start_answer_if_needed(sender, &mut stats).await?;
                sender.send(StreamFrame::answer(token)).await?;
                stats.answer_chunks += 1;
                tokio::time::sleep(ANSWER_PACING).await;
                both_closed = false;
            }
            Ok(None) => {}
            Err(_) => both_closed = false,
        }

        if done.is_done() {
            // Drain whatever the worker managed to queue before finishing.
            while let Ok(token) = answer_rx.try_recv() {
                flush_thinking(&mut thinking_rx, sender, &mut stats).await?;
                start_answer_if_needed(sender, &mut stats).await?;
                sender.send(StreamFrame::answer(token)).await?;
                stats.answer_chunks += 1;
                tokio::time::sleep(ANSWER_PACING).await;
            }
            break;
        }

        // Both queues closed but no done signal yet (worker fault being
        // recorded): yield instead of spinning.
        if both_closed {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    if let Some(error) = done.take_error() {
        if !stats.answer_started {
            sender.send(StreamFrame::thinking_end()).await?;
        }
        sender.send(StreamFrame::error(error)).await?;
    } else {
        sender.send(StreamFrame::done()).await?;
    }

    Ok(stats)
}

/// One streaming request: frame 1 is `thinking_start`, then the pump runs
/// against a worker task driving the orchestrator, and the worker is joined
/// before this returns.
pub(crate) async fn handle_stream(
    req: MessageRequest,
    socket: &mut WebSocket,
    state: &Arc<AppState>,
) -> Result<(), SendError> {
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    tracing::info!(
        request_id = %request_id,
        input = %truncate(&req.user_input, 50),
        "开始处理流式请求"
    );

    let mut sender = WsFrameSender(socket);
    sender.send(StreamFrame::thinking_start()).await?;

    let (_entry, mut guard) = match state.sessions.checkout(&req.session_id, &req.model_id).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "会话检出失败");
            sender.send(StreamFrame::thinking_end()).await?;
            sender.send(StreamFrame::error(e.to_string())).await?;
            return Ok(());
        }
    };

    let (thinking_tx, thinking_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (answer_tx, answer_rx) = mpsc::channel(QUEUE_CAPACITY);
    let done = Arc::new(DoneSignal::default());
    let sink = Arc::new(QueueSink {
        thinking_tx,
        answer_tx,
        done: Arc::clone(&done),
    });

    let user_input = req.user_input.clone();
    let worker = tokio::spawn(async move {
        let orchestrator = guard.as_mut().expect("orchestrator built at checkout");
        orchestrator
            .process_stream(&user_input, ProcessMode::React, sink)
            .await;
    });

    // A panicked worker never signals done; the monitor stores the fault in
    // the error slot and releases the pump.
    let monitor_done = Arc::clone(&done);
    let monitor = tokio::spawn(async move {
        if let Err(join_err) = worker.await {
            monitor_done.set_error(format!("处理异常: {join_err}"));
            monitor_done.set_done();
        }
    });

    let stats = run_stream_pump(thinking_rx, answer_rx, done, &mut sender).await?;

    let _ = monitor.await;
    tracing::info!(
        request_id = %request_id,
        chunks = stats.answer_chunks,
        "流式响应完成"
    );
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_frame::FrameKind;

    struct RecordingSender {
        frames: Vec<StreamFrame>,
        /// Per-frame artificial delay; models a slow consumer.
        delay: Option<Duration>,
    }

    impl RecordingSender {
        fn new() -> Self {
            Self {
                frames: Vec::new(),
                delay: None,
            }
        }

        fn kinds(&self) -> Vec<FrameKind> {
            self.frames.iter().map(|f| f.chunk_type).collect()
        }
    }

    #[async_trait]
    impl FrameSender for RecordingSender {
        async fn send(&mut self, frame: StreamFrame) -> Result<(), SendError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.frames.push(frame);
            Ok(())
        }
    }

    fn channels() -> (
        mpsc::Sender<(String, f64)>,
        mpsc::Receiver<(String, f64)>,
        mpsc::Sender<String>,
        mpsc::Receiver<String>,
    ) {
        let (ttx, trx) = mpsc::channel(QUEUE_CAPACITY);
        let (atx, arx) = mpsc::channel(QUEUE_CAPACITY);
        (ttx, trx, atx, arx)
    }

    fn assert_frame_order(kinds: &[FrameKind]) {
        // thinking_chunk* thinking_end? answer_start? answer* (done|error),
        // with thinking_start prepended by the caller.
        let terminal_count = kinds.iter().filter(|k| k.is_terminal()).count();
        assert_eq!(terminal_count, 1, "exactly one terminal: {kinds:?}");
        assert!(kinds.last().unwrap().is_terminal(), "terminal last: {kinds:?}");

        let pos = |kind: FrameKind| kinds.iter().position(|k| *k == kind);
        if let Some(end) = pos(FrameKind::ThinkingEnd) {
            for (i, k) in kinds.iter().enumerate() {
                if *k == FrameKind::ThinkingChunk {
                    assert!(i < end, "thinking_chunk after thinking_end: {kinds:?}");
                }
            }
            if let Some(start) = pos(FrameKind::AnswerStart) {
                assert!(end < start, "thinking_end after answer_start: {kinds:?}");
            }
        }
        if let Some(start) = pos(FrameKind::AnswerStart) {
            for (i, k) in kinds.iter().enumerate() {
                if *k == FrameKind::Answer {
                    assert!(i > start, "answer before answer_start: {kinds:?}");
                }
            }
        } else {
            assert!(!kinds.contains(&FrameKind::Answer));
        }
    }

    #[tokio::test]
    async fn full_stream_orders_frames() {
        let (ttx, trx, atx, arx) = channels();
        let done = Arc::new(DoneSignal::default());

        let producer_done = Arc::clone(&done);
        tokio::spawn(async move {
            ttx.send(("步骤1".into(), 0.1)).await.unwrap();
            ttx.send(("步骤2".into(), 0.2)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(120)).await;
            for token in ["北", "京", "好"] {
                atx.send(token.into()).await.unwrap();
            }
            producer_done.set_done();
        });

        let mut sender = RecordingSender::new();
        let stats = run_stream_pump(trx, arx, done, &mut sender).await.unwrap();

        assert!(stats.thinking_sent);
        assert!(stats.answer_started);
        assert_eq!(stats.answer_chunks, 3);
        assert_frame_order(&sender.kinds());
        assert!(sender.kinds().contains(&FrameKind::ThinkingEnd));
        assert_eq!(*sender.kinds().last().unwrap(), FrameKind::Done);
        let is_last: Vec<bool> = sender.frames.iter().map(|f| f.is_last).collect();
        assert_eq!(is_last.iter().filter(|b| **b).count(), 1);
        assert!(is_last.last().unwrap());
    }

    #[tokio::test]
    async fn stream_without_thinking_skips_thinking_end() {
        let (_ttx, trx, atx, arx) = channels();
        let done = Arc::new(DoneSignal::default());

        let producer_done = Arc::clone(&done);
        tokio::spawn(async move {
            atx.send("好".into()).await.unwrap();
            producer_done.set_done();
        });

        let mut sender = RecordingSender::new();
        let stats = run_stream_pump(trx, arx, done, &mut sender).await.unwrap();

        assert!(!stats.thinking_sent);
        assert!(!sender.kinds().contains(&FrameKind::ThinkingEnd));
        assert_frame_order(&sender.kinds());
    }

    #[tokio::test]
    async fn error_before_answer_emits_thinking_end_then_error() {
        let (ttx, trx, _atx, arx) = channels();
        let done = Arc::new(DoneSignal::default());

        let producer_done = Arc::clone(&done);
        tokio::spawn(async move {
            ttx.send(("分析中".into(), 0.1)).await.unwrap();
            producer_done.set_error("处理失败: LLM不可用");
            producer_done.set_done();
        });

        let mut sender = RecordingSender::new();
        run_stream_pump(trx, arx, done, &mut sender).await.unwrap();

        let kinds = sender.kinds();
        assert_frame_order(&kinds);
        assert_eq!(kinds.last(), Some(&FrameKind::Error));
        assert!(kinds.contains(&FrameKind::ThinkingEnd));
        assert!(!kinds.contains(&FrameKind::AnswerStart));
        let error = sender.frames.last().unwrap();
        assert!(error.is_last);
        assert!(error.content.contains("LLM不可用"));
    }

    #[tokio::test]
    async fn answers_queued_at_done_are_drained() {
        let (_ttx, trx, atx, arx) = channels();
        let done = Arc::new(DoneSignal::default());

        // Queue everything before the pump ever polls.
        for token in ["a", "b", "c", "d"] {
            atx.send(token.into()).await.unwrap();
        }
        done.set_done();

        let mut sender = RecordingSender::new();
        let stats = run_stream_pump(trx, arx, done, &mut sender).await.unwrap();

        assert_eq!(stats.answer_chunks, 4);
        let contents: Vec<&str> = sender
            .frames
            .iter()
            .filter(|f| f.chunk_type == FrameKind::Answer)
            .map(|f| f.content.as_str())
            .collect();
        assert_eq!(contents, vec!["a", "b", "c", "d"]);
        assert_frame_order(&sender.kinds());
    }

    #[tokio::test]
    async fn bounded_queue_blocks_producer_until_consumer_drains() {
        // Capacity-2 answer queue with a slow consumer: the producer's 6
        // sends can only complete as the pump drains, and every token still
        // arrives in order.
        let (_ttx, trx) = mpsc::channel::<(String, f64)>(2);
        let (atx, arx) = mpsc::channel::<String>(2);
        let done = Arc::new(DoneSignal::default());

        let producer_done = Arc::clone(&done);
        let producer = tokio::spawn(async move {
            for i in 0..6 {
                // Blocks whenever the queue is full.
                atx.send(format!("t{i}")).await.unwrap();
            }
            producer_done.set_done();
        });

        let mut sender = RecordingSender::new();
        sender.delay = Some(Duration::from_millis(10));
        let stats = run_stream_pump(trx, arx, done, &mut sender).await.unwrap();

        producer.await.unwrap();
        assert_eq!(stats.answer_chunks, 6);
        let contents: Vec<&str> = sender
            .frames
            .iter()
            .filter(|f| f.chunk_type == FrameKind::Answer)
            .map(|f| f.content.as_str())
            .collect();
        assert_eq!(contents, vec!["t0", "t1", "t2", "t3", "t4", "t5"]);
    }

    #[tokio::test]
    async fn thoughts_queued_with_answers_stay_before_the_boundary() {
        // Both queues are populated before the pump runs a single poll; the
        // queued thoughts must still all precede thinking_end.
        let (ttx, trx, atx, arx) = channels();
        let done = Arc::new(DoneSignal::default());
        for thought in ["t1", "t2", "t3"] {
            ttx.send((thought.into(), 0.0)).await.unwrap();
        }
        for token in ["a1", "a2"] {
            atx.send(token.into()).await.unwrap();
        }
        done.set_done();

        let mut sender = RecordingSender::new();
        run_stream_pump(trx, arx, done, &mut sender).await.unwrap();

        let kinds = sender.kinds();
        assert_frame_order(&kinds);
        assert_eq!(
            kinds
                .iter()
                .filter(|k| **k == FrameKind::ThinkingChunk)
                .count(),
            3
        );
        assert_eq!(
            kinds.iter().filter(|k| **k == FrameKind::Answer).count(),
            2
        );
    }

    #[tokio::test]
    async fn worker_fault_with_closed_queues_still_terminates() {
        let (ttx, trx, atx, arx) = channels();
        let done = Arc::new(DoneSignal::default());

        let producer_done = Arc::clone(&done);
        tokio::spawn(async move {
            drop(ttx);
            drop(atx);
            tokio::time::sleep(Duration::from_millis(60)).await;
            producer_done.set_error("处理异常: worker panicked");
            producer_done.set_done();
        });

        let mut sender = RecordingSender::new();
        run_stream_pump(trx, arx, done, &mut sender).await.unwrap();
        let kinds = sender.kinds();
        assert_eq!(kinds.last(), Some(&FrameKind::Error));
        assert_frame_order(&kinds);
    }

    #[test]
    fn error_slot_keeps_first_error() {
        let done = DoneSignal::default();
        done.set_error("第一");
        done.set_error("第二");
        assert_eq!(done.take_error().as_deref(), Some("第一"));
        assert_eq!(done.take_error(), None);
    }
}
