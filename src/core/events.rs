//! 任务事件与广播日志
//!
//! 每个任务持有一份只追加、有容量上限的事件日志；每个订阅者有独立的读游标，
//! 因此多个订阅者看到完全相同的事件序列（广播而非抢占）。容量超出时丢弃最旧的事件，
//! 终止事件总是最后一条，且不会被丢弃。任务结束后才订阅的只会收到终止事件。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::Notify;

use crate::agent::RunResult;

/// 研究任务的过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// 阶段切换（planning / iterating / synthesizing …）
    Phase { name: String },
    /// 一次工具调用完成
    Progress {
        iteration: usize,
        tool: String,
        args: serde_json::Value,
        summary: String,
    },
    /// 终止：成功
    Done { result: RunResult },
    /// 终止：失败或取消
    Error { message: String },
}

impl TaskEvent {
    pub fn phase(name: impl Into<String>) -> Self {
        Self::Phase { name: name.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

struct LogState {
    events: VecDeque<TaskEvent>,
    /// events[0] 的全局序号
    offset: usize,
    closed: bool,
}

pub(crate) struct EventLog {
    state: Mutex<LogState>,
    notify: Notify,
    capacity: usize,
}

impl EventLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LogState {
                events: VecDeque::new(),
                offset: 0,
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn append(state: &mut LogState, capacity: usize, event: TaskEvent) {
        state.events.push_back(event);
        while state.events.len() > capacity {
            state.events.pop_front();
            state.offset += 1;
        }
    }

    /// 追加非终止事件；日志关闭后忽略
    pub(crate) fn push(&self, event: TaskEvent) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            Self::append(&mut state, self.capacity, event);
        }
        self.notify.notify_waiters();
    }

    /// 追加终止事件并关闭日志；只有第一次调用生效
    pub(crate) fn close_with(&self, terminal: TaskEvent) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            Self::append(&mut state, self.capacity, terminal);
            state.closed = true;
        }
        self.notify.notify_waiters();
    }

    pub(crate) fn subscribe(self: &Arc<Self>) -> TaskSubscription {
        let state = self.lock();
        let cursor = if state.closed {
            // 已结束：只投递终止事件
            state.offset + state.events.len().saturating_sub(1)
        } else {
            state.offset
        };
        TaskSubscription {
            log: Arc::clone(self),
            cursor,
        }
    }
}

/// 策略向所属任务发送事件的句柄；未挂在任务上时（detached）事件只写日志
#[derive(Clone, Default)]
pub struct EventSink {
    log: Option<Arc<EventLog>>,
}

impl EventSink {
    pub fn detached() -> Self {
        Self::default()
    }

    pub(crate) fn attached(log: Arc<EventLog>) -> Self {
        Self { log: Some(log) }
    }

    pub fn emit(&self, event: TaskEvent) {
        tracing::debug!(?event, "task event");
        if let Some(log) = &self.log {
            log.push(event);
        }
    }
}

/// 一个订阅者的读游标
pub struct TaskSubscription {
    log: Arc<EventLog>,
    cursor: usize,
}

impl TaskSubscription {
    /// 下一条事件；终止事件之后返回 None
    pub async fn next(&mut self) -> Option<TaskEvent> {
        loop {
            // 先登记等待再检查状态，避免错过检查与等待之间的通知
            let notified = self.log.notify.notified();
            {
                let state = self.log.lock();
                if self.cursor < state.offset {
                    // 落后太多，被淘汰的事件直接跳过
                    self.cursor = state.offset;
                }
                let idx = self.cursor - state.offset;
                if let Some(event) = state.events.get(idx) {
                    self.cursor += 1;
                    return Some(event.clone());
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = TaskEvent> + Send {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn progress(i: usize) -> TaskEvent {
        TaskEvent::Progress {
            iteration: i,
            tool: "read_file".into(),
            args: serde_json::json!({}),
            summary: format!("step {i}"),
        }
    }

    fn iteration_of(event: &TaskEvent) -> Option<usize> {
        match event {
            TaskEvent::Progress { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_two_subscribers_see_identical_sequence() {
        let log = Arc::new(EventLog::new(16));
        let a = log.subscribe();
        let b = log.subscribe();

        let writer = {
            let log = log.clone();
            tokio::spawn(async move {
                for i in 1..=5 {
                    log.push(progress(i));
                    tokio::task::yield_now().await;
                }
                log.close_with(TaskEvent::Error { message: "stop".into() });
            })
        };

        let (ea, eb): (Vec<_>, Vec<_>) =
            tokio::join!(a.into_stream().collect(), b.into_stream().collect());
        writer.await.unwrap();

        assert_eq!(ea.len(), 6);
        assert_eq!(
            ea.iter().map(iteration_of).collect::<Vec<_>>(),
            eb.iter().map(iteration_of).collect::<Vec<_>>()
        );
        assert_eq!(
            ea.iter().filter_map(iteration_of).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert!(ea.last().unwrap().is_terminal());
        assert!(eb.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_only_terminal() {
        let log = Arc::new(EventLog::new(16));
        log.push(TaskEvent::phase("iterating"));
        log.push(progress(1));
        log.close_with(TaskEvent::Error { message: "cancelled".into() });

        let mut sub = log.subscribe();
        match sub.next().await {
            Some(TaskEvent::Error { message }) => assert_eq!(message, "cancelled"),
            other => panic!("Expected terminal event, got {:?}", other),
        }
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bounded_log_keeps_terminal() {
        let log = Arc::new(EventLog::new(3));
        let mut slow = log.subscribe();
        for i in 1..=10 {
            log.push(progress(i));
        }
        log.close_with(TaskEvent::Error { message: "done".into() });

        let mut seen = Vec::new();
        while let Some(event) = slow.next().await {
            seen.push(event);
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(iteration_of(&seen[0]), Some(9));
        assert!(seen[2].is_terminal());
    }

    #[tokio::test]
    async fn test_events_after_close_are_dropped() {
        let log = Arc::new(EventLog::new(8));
        log.close_with(TaskEvent::Error { message: "first".into() });
        log.push(progress(1));
        log.close_with(TaskEvent::Error { message: "second".into() });

        let mut sub = log.subscribe();
        match sub.next().await {
            Some(TaskEvent::Error { message }) => assert_eq!(message, "first"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(sub.next().await.is_none());
    }
}
