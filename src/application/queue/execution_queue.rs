//! Execution Queue - 单执行者 FIFO 调度器
//!
//! 同一时刻最多只有队首任务在运行；每个排队任务在入队时、以及前方任务
//! 完成或取消时收到自己的新位置。任务列表的所有修改都在同一把锁内完成，
//! 回调总是在锁外调用，回调内部可以重新进入队列（例如注册后续任务）。

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 互斥的后端资源类别
///
/// 两类任务之间切换需要卸载/加载模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    ImageGeneration,
    TextGeneration,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::ImageGeneration => "image_generation",
            ResourceClass::TextGeneration => "text_generation",
        }
    }
}

/// 队列内任务标识（按注册顺序递增）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 排队任务
///
/// 由 ExecutionQueue 独占持有，直到 `on_run` 结束后出队
#[async_trait]
pub trait QueuedTask: Send + Sync + 'static {
    /// 任务所属的资源类别
    fn resource_class(&self) -> ResourceClass;

    /// 位置变化通知
    ///
    /// 同一任务收到的位置单调不增且不重复；错误与 panic 只记录日志
    async fn on_position_changed(&self, position: usize) -> anyhow::Result<()>;

    /// 到达队首时调用，且只调用一次
    ///
    /// `previous_class` 是上一个运行过的任务的资源类别（在锁内读取）。
    /// 无论成功、失败还是 panic，结束后任务都会出队，下一个任务开始运行
    async fn on_run(&self, previous_class: Option<ResourceClass>) -> anyhow::Result<()>;

    /// 排队期间被取消时调用
    async fn on_cancelled(&self) {}
}

#[derive(Default)]
struct NotifierState {
    last_reported: Option<usize>,
    /// 任务已取消，不再发送位置
    closed: bool,
}

/// 每个任务的位置通知状态
///
/// 锁在回调期间一直持有，同一任务的通知与取消互相串行
struct PositionNotifier {
    state: tokio::sync::Mutex<NotifierState>,
}

impl PositionNotifier {
    fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(NotifierState::default()),
        }
    }

    async fn notify(&self, id: TaskId, task: &dyn QueuedTask, position: usize) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        if matches!(state.last_reported, Some(reported) if reported <= position) {
            return;
        }
        state.last_reported = Some(position);

        match AssertUnwindSafe(task.on_position_changed(position))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(task_id = %id, position, error = %e, "Position callback failed");
            }
            Err(_) => {
                tracing::warn!(task_id = %id, position, "Position callback panicked");
            }
        }
    }

    /// 等待进行中的通知结束，之后的通知全部丢弃
    async fn close(&self) {
        self.state.lock().await.closed = true;
    }
}

#[derive(Clone)]
struct Entry {
    id: TaskId,
    task: Arc<dyn QueuedTask>,
    notifier: Arc<PositionNotifier>,
}

impl Entry {
    async fn notify(&self, position: usize) {
        self.notifier.notify(self.id, self.task.as_ref(), position).await;
    }
}

#[derive(Default)]
struct QueueState {
    /// 队首即正在运行的任务
    entries: VecDeque<Entry>,
    last_active: Option<ResourceClass>,
    next_id: u64,
}

/// 执行队列
///
/// 在入口处显式构造一次，克隆后注入到各个处理器
#[derive(Clone, Default)]
pub struct ExecutionQueue {
    state: Arc<Mutex<QueueState>>,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册任务
    ///
    /// 追加到队尾并通知初始位置 `len - 1`；如果队列原本为空，
    /// 任务立即开始运行（先收到位置 0）
    pub async fn register(&self, task: Arc<dyn QueuedTask>) -> TaskId {
        let (entry, position, previous_class) = {
            let mut state = self.lock();
            let id = TaskId(state.next_id);
            state.next_id += 1;

            let entry = Entry {
                id,
                task,
                notifier: Arc::new(PositionNotifier::new()),
            };
            state.entries.push_back(entry.clone());
            (entry, state.entries.len() - 1, state.last_active)
        };

        let id = entry.id;
        tracing::debug!(
            task_id = %id,
            position,
            resource_class = entry.task.resource_class().as_str(),
            "Task registered"
        );

        if position == 0 {
            self.spawn_run(entry, previous_class);
        } else {
            entry.notify(position).await;
        }

        id
    }

    /// 取消尚未运行的任务
    ///
    /// 队首（正在运行）的任务不能取消；后面的任务会收到新的位置。
    /// 被取消的任务在 `on_cancelled` 之后不会再收到位置通知。
    /// 任务不能在自己的位置回调里取消自己
    pub async fn cancel(&self, id: TaskId) -> bool {
        let (removed, waiting) = {
            let mut state = self.lock();
            let index = match state.entries.iter().position(|e| e.id == id) {
                Some(index) if index > 0 => index,
                _ => return false,
            };
            let removed = state.entries.remove(index);
            let waiting: Vec<(usize, Entry)> = state
                .entries
                .iter()
                .enumerate()
                .skip(index)
                .map(|(position, entry)| (position, entry.clone()))
                .collect();
            (removed, waiting)
        };

        let Some(removed) = removed else {
            return false;
        };

        tracing::debug!(task_id = %id, "Task cancelled");
        removed.notifier.close().await;
        removed.task.on_cancelled().await;
        join_all(waiting.iter().map(|(position, entry)| entry.notify(*position))).await;
        true
    }

    /// 当前队列长度（包含正在运行的任务）
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 最近一次运行完成的任务的资源类别
    pub fn last_active_class(&self) -> Option<ResourceClass> {
        self.lock().last_active
    }

    /// 任务当前位置，不在队列中时返回 None
    pub fn position_of(&self, id: TaskId) -> Option<usize> {
        self.lock().entries.iter().position(|e| e.id == id)
    }

    fn spawn_run(&self, entry: Entry, previous_class: Option<ResourceClass>) {
        let queue = self.clone();
        tokio::spawn(async move {
            entry.notify(0).await;

            tracing::debug!(task_id = %entry.id, "Task started");
            match AssertUnwindSafe(entry.task.on_run(previous_class))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {
                    tracing::debug!(task_id = %entry.id, "Task finished");
                }
                Ok(Err(e)) => {
                    tracing::warn!(task_id = %entry.id, error = %e, "Task failed");
                }
                Err(_) => {
                    tracing::error!(task_id = %entry.id, "Task panicked");
                }
            }

            queue.complete(entry.id).await;
        });
    }

    /// 队首任务结束：出队、记录资源类别、启动下一个任务并并行通知其余任务
    async fn complete(&self, id: TaskId) {
        let (next, waiting) = {
            let mut state = self.lock();
            let head = match state.entries.pop_front() {
                Some(head) => head,
                None => panic!("ExecutionQueue completed task {} on an empty queue", id),
            };
            assert_eq!(
                head.id, id,
                "ExecutionQueue completed task {} but task {} is at the head",
                id, head.id
            );

            state.last_active = Some(head.task.resource_class());
            let next = state
                .entries
                .front()
                .cloned()
                .map(|entry| (entry, state.last_active));
            let waiting: Vec<(usize, Entry)> = state
                .entries
                .iter()
                .enumerate()
                .skip(1)
                .map(|(position, entry)| (position, entry.clone()))
                .collect();
            (next, waiting)
        };

        if let Some((entry, previous_class)) = next {
            self.spawn_run(entry, previous_class);
        }
        join_all(waiting.iter().map(|(position, entry)| entry.notify(*position))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Position(usize),
        Run(Option<ResourceClass>),
        Cancelled,
    }

    enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    struct TestTask {
        name: &'static str,
        class: ResourceClass,
        events: mpsc::UnboundedSender<(&'static str, Event)>,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        behavior: Behavior,
        running: Option<Arc<(AtomicUsize, AtomicUsize)>>,
        follow_up: Mutex<Option<(ExecutionQueue, Arc<dyn QueuedTask>)>>,
        /// 收到指定位置时取消另一个任务
        cancel_on: Mutex<Option<(usize, ExecutionQueue, TaskId)>>,
    }

    impl TestTask {
        fn new(
            name: &'static str,
            events: &mpsc::UnboundedSender<(&'static str, Event)>,
        ) -> Self {
            Self {
                name,
                class: ResourceClass::ImageGeneration,
                events: events.clone(),
                gate: Mutex::new(None),
                behavior: Behavior::Succeed,
                running: None,
                follow_up: Mutex::new(None),
                cancel_on: Mutex::new(None),
            }
        }

        fn gated(mut self) -> (Self, oneshot::Sender<()>) {
            let (tx, rx) = oneshot::channel();
            self.gate = Mutex::new(Some(rx));
            (self, tx)
        }

        fn with_class(mut self, class: ResourceClass) -> Self {
            self.class = class;
            self
        }

        fn with_behavior(mut self, behavior: Behavior) -> Self {
            self.behavior = behavior;
            self
        }
    }

    #[async_trait]
    impl QueuedTask for TestTask {
        fn resource_class(&self) -> ResourceClass {
            self.class
        }

        async fn on_position_changed(&self, position: usize) -> anyhow::Result<()> {
            let _ = self.events.send((self.name, Event::Position(position)));

            let target = {
                let mut cancel_on = self.cancel_on.lock().unwrap();
                match cancel_on.take() {
                    Some((at, queue, id)) if at == position => Some((queue, id)),
                    other => {
                        *cancel_on = other;
                        None
                    }
                }
            };
            if let Some((queue, id)) = target {
                queue.cancel(id).await;
            }
            Ok(())
        }

        async fn on_run(&self, previous_class: Option<ResourceClass>) -> anyhow::Result<()> {
            let _ = self.events.send((self.name, Event::Run(previous_class)));

            if let Some(running) = &self.running {
                let now = running.0.fetch_add(1, Ordering::SeqCst) + 1;
                running.1.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.0.fetch_sub(1, Ordering::SeqCst);
            }

            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }

            let follow_up = self.follow_up.lock().unwrap().take();
            if let Some((queue, task)) = follow_up {
                queue.register(task).await;
            }

            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => anyhow::bail!("backend exploded"),
                Behavior::Panic => panic!("task panicked"),
            }
        }

        async fn on_cancelled(&self) {
            let _ = self.events.send((self.name, Event::Cancelled));
        }
    }

    /// 接收事件直到出现 `target`，返回期间收到的所有事件
    async fn wait_for(
        rx: &mut mpsc::UnboundedReceiver<(&'static str, Event)>,
        log: &mut Vec<(&'static str, Event)>,
        target: (&'static str, Event),
    ) {
        if log.contains(&target) {
            return;
        }
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for queue event")
                .expect("event channel closed");
            let done = event == target;
            log.push(event);
            if done {
                return;
            }
        }
    }

    fn events_of(log: &[(&'static str, Event)], name: &str) -> Vec<Event> {
        log.iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, e)| e.clone())
            .collect()
    }

    async fn wait_until_empty(queue: &ExecutionQueue) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("queue did not drain");
    }

    #[tokio::test]
    async fn test_single_task_runs_without_nudge() {
        let queue = ExecutionQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut log = Vec::new();

        queue.register(Arc::new(TestTask::new("A", &tx))).await;
        wait_for(&mut rx, &mut log, ("A", Event::Run(None))).await;

        assert_eq!(events_of(&log, "A"), vec![Event::Position(0), Event::Run(None)]);
        wait_until_empty(&queue).await;
        assert_eq!(
            queue.last_active_class(),
            Some(ResourceClass::ImageGeneration)
        );
    }

    #[tokio::test]
    async fn test_three_task_positions() {
        let queue = ExecutionQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut log = Vec::new();

        let (a, release_a) = TestTask::new("A", &tx).gated();
        let (b, release_b) = TestTask::new("B", &tx).gated();
        let c = TestTask::new("C", &tx);

        queue.register(Arc::new(a)).await;
        queue.register(Arc::new(b)).await;
        queue.register(Arc::new(c)).await;
        wait_for(&mut rx, &mut log, ("A", Event::Run(None))).await;
        assert_eq!(queue.len(), 3);

        release_a.send(()).unwrap();
        wait_for(
            &mut rx,
            &mut log,
            ("B", Event::Run(Some(ResourceClass::ImageGeneration))),
        )
        .await;
        wait_for(&mut rx, &mut log, ("C", Event::Position(1))).await;

        release_b.send(()).unwrap();
        wait_for(
            &mut rx,
            &mut log,
            ("C", Event::Run(Some(ResourceClass::ImageGeneration))),
        )
        .await;

        assert_eq!(
            events_of(&log, "B"),
            vec![
                Event::Position(1),
                Event::Position(0),
                Event::Run(Some(ResourceClass::ImageGeneration)),
            ]
        );
        assert_eq!(
            events_of(&log, "C"),
            vec![
                Event::Position(2),
                Event::Position(1),
                Event::Position(0),
                Event::Run(Some(ResourceClass::ImageGeneration)),
            ]
        );
        wait_until_empty(&queue).await;
    }

    #[tokio::test]
    async fn test_fifo_order_and_single_runner() {
        let queue = ExecutionQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let running = Arc::new((AtomicUsize::new(0), AtomicUsize::new(0)));
        let names = ["T0", "T1", "T2", "T3", "T4", "T5"];

        let mut handles = Vec::new();
        for (i, name) in names.into_iter().enumerate() {
            let mut task = TestTask::new(name, &tx);
            task.running = Some(running.clone());
            // 注册时间抖动
            tokio::time::sleep(Duration::from_millis((i as u64 % 3) * 2)).await;
            handles.push(queue.register(Arc::new(task)).await);
        }
        wait_until_empty(&queue).await;
        drop(tx);

        let mut order = Vec::new();
        while let Some((name, event)) = rx.recv().await {
            if let Event::Run(_) = event {
                order.push(name);
            }
        }

        assert_eq!(order, names);
        assert_eq!(running.1.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_failing_and_panicking_tasks_do_not_stall() {
        let queue = ExecutionQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut log = Vec::new();

        queue
            .register(Arc::new(TestTask::new("A", &tx).with_behavior(Behavior::Fail)))
            .await;
        queue
            .register(Arc::new(TestTask::new("B", &tx).with_behavior(Behavior::Panic)))
            .await;
        queue.register(Arc::new(TestTask::new("C", &tx))).await;

        wait_for(
            &mut rx,
            &mut log,
            ("C", Event::Run(Some(ResourceClass::ImageGeneration))),
        )
        .await;
        wait_until_empty(&queue).await;
    }

    #[tokio::test]
    async fn test_failing_position_callback_is_swallowed() {
        struct BrokenCallback(mpsc::UnboundedSender<&'static str>);

        #[async_trait]
        impl QueuedTask for BrokenCallback {
            fn resource_class(&self) -> ResourceClass {
                ResourceClass::ImageGeneration
            }

            async fn on_position_changed(&self, _position: usize) -> anyhow::Result<()> {
                anyhow::bail!("message deleted")
            }

            async fn on_run(&self, _previous: Option<ResourceClass>) -> anyhow::Result<()> {
                let _ = self.0.send("ran");
                Ok(())
            }
        }

        let queue = ExecutionQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.register(Arc::new(BrokenCallback(tx.clone()))).await;
        queue.register(Arc::new(BrokenCallback(tx))).await;

        for _ in 0..2 {
            let ran = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
            assert_eq!(ran.unwrap(), Some("ran"));
        }
    }

    #[tokio::test]
    async fn test_reentrant_registration_from_run() {
        let queue = ExecutionQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut log = Vec::new();

        let follow_up: Arc<dyn QueuedTask> = Arc::new(TestTask::new("follow-up", &tx));
        let first = TestTask::new("first", &tx);
        *first.follow_up.lock().unwrap() = Some((queue.clone(), follow_up));

        queue.register(Arc::new(first)).await;
        wait_for(
            &mut rx,
            &mut log,
            ("follow-up", Event::Run(Some(ResourceClass::ImageGeneration))),
        )
        .await;
        assert_eq!(events_of(&log, "follow-up")[0], Event::Position(1));
    }

    #[tokio::test]
    async fn test_previous_class_is_reported() {
        let queue = ExecutionQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut log = Vec::new();

        let (chat, release) = TestTask::new("chat", &tx)
            .with_class(ResourceClass::TextGeneration)
            .gated();
        queue.register(Arc::new(chat)).await;
        queue.register(Arc::new(TestTask::new("image", &tx))).await;
        release.send(()).unwrap();

        wait_for(
            &mut rx,
            &mut log,
            ("image", Event::Run(Some(ResourceClass::TextGeneration))),
        )
        .await;
    }

    #[tokio::test]
    async fn test_cancel_waiting_task() {
        let queue = ExecutionQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut log = Vec::new();

        let (a, release_a) = TestTask::new("A", &tx).gated();
        let a_id = queue.register(Arc::new(a)).await;
        let b_id = queue.register(Arc::new(TestTask::new("B", &tx))).await;
        let c_id = queue.register(Arc::new(TestTask::new("C", &tx))).await;
        wait_for(&mut rx, &mut log, ("A", Event::Run(None))).await;

        assert!(!queue.cancel(a_id).await);
        assert!(queue.cancel(b_id).await);
        assert!(!queue.cancel(b_id).await);
        assert_eq!(queue.position_of(c_id), Some(1));

        wait_for(&mut rx, &mut log, ("C", Event::Position(1))).await;
        release_a.send(()).unwrap();
        wait_for(
            &mut rx,
            &mut log,
            ("C", Event::Run(Some(ResourceClass::ImageGeneration))),
        )
        .await;

        assert_eq!(events_of(&log, "B"), vec![Event::Position(1), Event::Cancelled]);
        wait_until_empty(&queue).await;
    }

    #[tokio::test]
    async fn test_cancelled_task_gets_no_position_after_cancellation() {
        let queue = ExecutionQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut log = Vec::new();

        let (a, release_a) = TestTask::new("A", &tx).gated();
        let c = Arc::new(TestTask::new("C", &tx));
        queue.register(Arc::new(a)).await;
        queue.register(Arc::new(TestTask::new("B", &tx))).await;
        queue.register(c.clone()).await;
        let d_id = queue.register(Arc::new(TestTask::new("D", &tx))).await;
        wait_for(&mut rx, &mut log, ("A", Event::Run(None))).await;

        // C 在前移到位置 1 的回调里取消 D，D 的新位置与该回调同批发出
        *c.cancel_on.lock().unwrap() = Some((1, queue.clone(), d_id));
        release_a.send(()).unwrap();

        wait_for(
            &mut rx,
            &mut log,
            ("C", Event::Run(Some(ResourceClass::ImageGeneration))),
        )
        .await;
        wait_until_empty(&queue).await;
        drop(c);
        drop(tx);
        while let Some(event) = rx.recv().await {
            log.push(event);
        }

        assert_eq!(events_of(&log, "D"), vec![Event::Position(3), Event::Cancelled]);
    }
}
