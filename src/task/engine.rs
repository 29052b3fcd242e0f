use super::kinds::{self, RunContext};
use crate::api::handler::panic_message;
use crate::config::options;
use crate::model::{Course, ScheduledTask, ScheduledTime};
use crate::services::Services;
use anyhow::Context;
use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Suffix of the one-shot catch-up timer id, `taskID::catchup`.
pub const CATCHUP_SUFFIX: &str = "catchup";

/// Delay before a catch-up run.
pub const CATCHUP_DELAY: Duration = Duration::from_millis(5);

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One registered timer.
///
/// The timer thread waits on a channel whose sender lives here. Dropping the
/// sender wakes the thread, which then exits without firing.
#[derive(Debug)]
pub struct TimerInfo {
    id: String,
    task_id: String,
    course_id: String,
    cancel: Mutex<Option<Sender<()>>>,
    run_lock: Mutex<()>,
    stopped: AtomicBool,
}

impl TimerInfo {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        lock(&self.cancel).take();
    }
}

#[derive(Default)]
struct Registry {
    // course id -> timer id -> timer
    timers: BTreeMap<String, BTreeMap<String, Arc<TimerInfo>>>,
    stopped: HashSet<String>,
}

struct EngineInner {
    services: Services,
    registry: Mutex<Registry>,
}

/// Timer registry for scheduled course tasks. Cheap to clone.
///
/// Lock order: a task's logical lock, then a timer's run lock, then the
/// registry. The registry lock is never held while waiting on a run lock.
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
}

impl TaskEngine {
    pub fn new(services: Services) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                services,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Schedule every task of every stored course.
    pub fn schedule_all(&self) -> anyhow::Result<()> {
        let courses = self
            .inner
            .services
            .courses
            .get_courses()
            .context("Failed to list courses for task scheduling")?;

        for course in courses {
            for task in &course.tasks {
                self.schedule(&course, task);
            }
        }
        Ok(())
    }

    /// Register the timers of `task`, replacing timers with the same ids.
    pub fn schedule(&self, course: &Course, task: &ScheduledTask) {
        if task.disable {
            debug!(course_id = %course.id, task = %task.name, "Task is disabled, not scheduling");
            return;
        }

        if options::NO_TASKS.get(&self.inner.services.config) {
            debug!(course_id = %course.id, task = %task.name, "Tasks are disabled, not scheduling");
            return;
        }

        let mut task = task.clone();
        if task.course_id.is_empty() {
            task.bind(&course.id);
        }

        if self.needs_catchup(&task) {
            let timer_id = format!("{}::{CATCHUP_SUFFIX}", task.id);
            info!(course_id = %task.course_id, task_id = %task.id, "Scheduling catch-up run");
            self.register(timer_id, &task, None, CATCHUP_DELAY, None);
        }

        for (i, when) in task.when.iter().enumerate() {
            let timer_id = format!("{}::{i:03}", task.id);
            if let Err(e) = when.validate() {
                warn!(timer_id = %timer_id, error = %e, "Invalid schedule entry, not scheduling");
                continue;
            }
            let delay = when.next_delay_from_now();
            self.register(timer_id, &task, Some(when.clone()), delay, None);
        }

        info!(
            course_id = %task.course_id,
            task_id = %task.id,
            task = %task,
            "Task scheduled"
        );
    }

    /// Stop every timer of `course_id` and wait for in-flight bodies.
    pub fn stop(&self, course_id: &str) {
        self.stop_course(course_id, None);
    }

    /// Like [`stop`](Self::stop), but does not wait on `own_timer_id`. For
    /// task bodies that stop their own course.
    pub fn stop_except_self(&self, course_id: &str, own_timer_id: &str) {
        self.stop_course(course_id, Some(own_timer_id));
    }

    pub fn stop_all(&self) {
        let courses: Vec<String> = lock(&self.inner.registry).timers.keys().cloned().collect();
        for course_id in courses {
            self.stop(&course_id);
        }
    }

    /// Ids of the registered timers of a course, sorted.
    pub fn timer_ids(&self, course_id: &str) -> Vec<String> {
        lock(&self.inner.registry)
            .timers
            .get(course_id)
            .map(|timers| timers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `timer_id` was stopped and not scheduled again since.
    pub fn is_stopped(&self, timer_id: &str) -> bool {
        lock(&self.inner.registry).stopped.contains(timer_id)
    }

    fn stop_course(&self, course_id: &str, own_timer_id: Option<&str>) {
        let timers = {
            let mut registry = lock(&self.inner.registry);
            let Some(timers) = registry.timers.remove(course_id) else {
                return;
            };
            for (id, info) in &timers {
                info.stop();
                registry.stopped.insert(id.clone());
            }
            timers
        };

        for (id, info) in &timers {
            if own_timer_id == Some(id.as_str()) {
                continue;
            }
            drop(lock(&info.run_lock));
        }

        info!(course_id, timers = timers.len(), "Stopped course tasks");
    }

    fn needs_catchup(&self, task: &ScheduledTask) -> bool {
        if !task.has_every() {
            return false;
        }
        let Some(min_period) = task.min_period() else {
            return false;
        };

        let services = &self.inner.services;
        let last = match services.tasks.last_completion(&task.course_id, &task.id) {
            Ok(last) => last,
            Err(e) => {
                warn!(
                    course_id = %task.course_id,
                    task_id = %task.id,
                    error = %format!("{e:#}"),
                    "Failed to get last task completion, skipping catch-up check"
                );
                return false;
            }
        };
        if last.is_zero() {
            return false;
        }

        let min_millis = i64::try_from(min_period.as_millis()).unwrap_or(i64::MAX);
        services.clock.now().millis_since(last) > min_millis
    }

    /// Insert a timer and start its thread. With `expected`, the timer is a
    /// reschedule and is only inserted if `expected` is still the registered
    /// timer for the id and the id has not been stopped.
    fn register(
        &self,
        timer_id: String,
        task: &ScheduledTask,
        when: Option<ScheduledTime>,
        delay: Duration,
        expected: Option<&Arc<TimerInfo>>,
    ) -> bool {
        let (sender, receiver) = mpsc::channel::<()>();
        let info = Arc::new(TimerInfo {
            id: timer_id.clone(),
            task_id: task.id.clone(),
            course_id: task.course_id.clone(),
            cancel: Mutex::new(Some(sender)),
            run_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
        });

        let previous = {
            let mut registry = lock(&self.inner.registry);
            if let Some(expected) = expected {
                let current = registry
                    .timers
                    .get(&task.course_id)
                    .and_then(|timers| timers.get(&timer_id));
                let still_ours = current.is_some_and(|current| Arc::ptr_eq(current, expected));
                if registry.stopped.contains(&timer_id) || !still_ours {
                    debug!(timer_id = %timer_id, "Timer was stopped or replaced, not rescheduling");
                    return false;
                }
            }

            registry.stopped.remove(&timer_id);
            registry
                .timers
                .entry(task.course_id.clone())
                .or_default()
                .insert(timer_id.clone(), Arc::clone(&info))
        };

        if let Some(previous) = previous {
            if expected.is_none() {
                debug!(timer_id = %timer_id, "Replacing existing timer");
            }
            previous.stop();
        }

        let engine = Arc::downgrade(&self.inner);
        let thread_info = Arc::clone(&info);
        let task = task.clone();
        let spawned = thread::Builder::new()
            .name("task-timer".to_string())
            .spawn(move || {
                match receiver.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
                let Some(inner) = engine.upgrade() else {
                    return;
                };
                TaskEngine { inner }.fire(&thread_info, &task, when);
            });

        if let Err(e) = spawned {
            error!(timer_id = %timer_id, error = %e, "Failed to spawn task timer thread");
            info.stop();
            return false;
        }

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        debug!(timer_id = %timer_id, delay_ms, "Timer registered");
        true
    }

    fn is_current(&self, info: &Arc<TimerInfo>) -> bool {
        if info.is_stopped() {
            return false;
        }
        lock(&self.inner.registry)
            .timers
            .get(&info.course_id)
            .and_then(|timers| timers.get(&info.id))
            .is_some_and(|current| Arc::ptr_eq(current, info))
    }

    fn fire(&self, info: &Arc<TimerInfo>, task: &ScheduledTask, when: Option<ScheduledTime>) {
        let task_lock = task.lock();
        let reschedule = {
            let _task_guard = lock(&task_lock);
            if !self.is_current(info) {
                debug!(timer_id = %info.id, "Timer no longer registered, not firing");
                return;
            }

            let _run_guard = lock(&info.run_lock);
            if info.is_stopped() {
                return;
            }

            self.run_once(info, task)
        };

        if let (true, Some(when)) = (reschedule, when) {
            let delay = when.next_delay_from_now();
            self.register(info.id.clone(), task, Some(when), delay, Some(info));
        }
    }

    /// Run the body once. Returns whether the timer should fire again.
    fn run_once(&self, info: &TimerInfo, task: &ScheduledTask) -> bool {
        let services = &self.inner.services;
        let now = services.clock.now();

        let min_rest_secs = options::TASK_MIN_REST_SECS.get(&services.config);
        match services.tasks.last_completion(&task.course_id, &task.id) {
            Ok(last) => {
                let rested = now.millis_since(last);
                if min_rest_secs >= 0 && !last.is_zero() && rested < min_rest_secs.saturating_mul(1000) {
                    info!(
                        course_id = %task.course_id,
                        task_id = %task.id,
                        rested_ms = rested,
                        min_rest_secs,
                        "Skipping task run, minimum rest not reached"
                    );
                    return true;
                }
            }
            Err(e) => {
                error!(
                    course_id = %task.course_id,
                    task_id = %task.id,
                    error = %format!("{e:#}"),
                    "Failed to get last task completion"
                );
                return true;
            }
        }

        let course = match services.courses.get_course(&task.course_id) {
            Ok(Some(course)) => course,
            Ok(None) => {
                warn!(course_id = %task.course_id, task_id = %task.id, "Course not found for task");
                return true;
            }
            Err(e) => {
                error!(
                    course_id = %task.course_id,
                    task_id = %task.id,
                    error = %format!("{e:#}"),
                    "Failed to get course for task"
                );
                return true;
            }
        };

        debug!(
            course_id = %task.course_id,
            task_id = %task.id,
            timer_id = %info.id,
            kind = task.kind.name(),
            "Task started"
        );

        let ctx = RunContext {
            engine: self,
            services,
            timer_id: &info.id,
        };
        let result = catch_unwind(AssertUnwindSafe(|| kinds::run(&ctx, &course, task)));

        match result {
            Ok(Ok(reschedule)) => {
                if let Err(e) = services.tasks.log_completion(&task.course_id, &task.id, now) {
                    error!(
                        course_id = %task.course_id,
                        task_id = %task.id,
                        error = %format!("{e:#}"),
                        "Failed to log task completion"
                    );
                }
                info!(
                    course_id = %task.course_id,
                    task_id = %task.id,
                    timer_id = %info.id,
                    "Task finished"
                );
                reschedule
            }
            Ok(Err(e)) => {
                error!(
                    course_id = %task.course_id,
                    task_id = %task.id,
                    timer_id = %info.id,
                    error = %format!("{e:#}"),
                    "Task failed"
                );
                true
            }
            Err(panic) => {
                error!(
                    course_id = %task.course_id,
                    task_id = %task.id,
                    timer_id = %info.id,
                    panic_message = %panic_message(panic.as_ref()),
                    "Task panicked"
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{DurationSpec, TaskKind, TestTask};
    use crate::services::memory::{FixedClock, MemoryCourseStore};
    use crate::timestamp::Timestamp;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn counting_task(name: &str, every_ms: u64, counter: &Arc<AtomicUsize>) -> ScheduledTask {
        let test = TestTask::new(Arc::clone(counter) as _, |payload| {
            if let Some(counter) = payload.downcast_ref::<AtomicUsize>() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
        ScheduledTask::new(
            name,
            TaskKind::Test(test),
            vec![ScheduledTime::every(DurationSpec::from_millis(every_ms))],
        )
    }

    fn engine_with(course: Course, min_rest_secs: i64) -> (TaskEngine, Services) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_testing(dir.path());
        config.set("tasks.minrest", min_rest_secs);
        config.set("tasks.disable", false);
        let services = Services::in_memory(config)
            .with_courses(Arc::new(MemoryCourseStore::default()))
            .with_clock(Arc::new(FixedClock::new(Timestamp::from_secs(10_000))));
        services.courses.save_course(course).unwrap();
        (TaskEngine::new(services.clone()), services)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_repeating_timer_fires_until_stopped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task("tick", 10, &counter);
        let course = Course::new("course101", "Course 101").with_task(task);
        let (engine, services) = engine_with(course, -1);

        let course = services.courses.get_course("course101").unwrap().unwrap();
        engine.schedule(&course, &course.tasks[0]);
        assert_eq!(engine.timer_ids("course101"), vec!["course101::tick::000"]);

        assert!(wait_for(|| counter.load(Ordering::SeqCst) >= 3));
        assert!(!services
            .tasks
            .last_completion("course101", "course101::tick")
            .unwrap()
            .is_zero());

        engine.stop("course101");
        assert!(engine.timer_ids("course101").is_empty());
        assert!(engine.is_stopped("course101::tick::000"));

        let after_stop = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_tasks_disabled_by_config() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task("tick", 10, &counter);
        let course = Course::new("course101", "Course 101").with_task(task);

        let dir = tempfile::tempdir().unwrap();
        let services = Services::in_memory(Config::for_testing(dir.path()));
        services.courses.save_course(course).unwrap();
        let engine = TaskEngine::new(services.clone());

        engine.schedule_all().unwrap();
        assert!(engine.timer_ids("course101").is_empty());
    }

    #[test]
    fn test_disabled_tasks_are_not_scheduled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut task = counting_task("off", 10, &counter);
        task.disable = true;
        let course = Course::new("course101", "Course 101").with_task(task);
        let (engine, services) = engine_with(course, -1);

        let course = services.courses.get_course("course101").unwrap().unwrap();
        engine.schedule(&course, &course.tasks[0]);
        assert!(engine.timer_ids("course101").is_empty());
    }

    #[test]
    fn test_min_rest_skips_but_keeps_timer() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task("rest", 10, &counter);
        let course = Course::new("course101", "Course 101").with_task(task);
        let (engine, services) = engine_with(course, 3600);
        services
            .tasks
            .log_completion("course101", "course101::rest", Timestamp::from_secs(9_999))
            .unwrap();

        let course = services.courses.get_course("course101").unwrap().unwrap();
        engine.schedule(&course, &course.tasks[0]);
        thread::sleep(Duration::from_millis(60));

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(engine.timer_ids("course101").len(), 1);
        engine.stop_all();
    }

    #[test]
    fn test_panicking_body_keeps_timer() {
        let counter = Arc::new(AtomicUsize::new(0));
        let test = TestTask::new(Arc::clone(&counter) as _, |payload| {
            if let Some(counter) = payload.downcast_ref::<AtomicUsize>() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            panic!("task body exploded");
        });
        let task = ScheduledTask::new(
            "boom",
            TaskKind::Test(test),
            vec![ScheduledTime::every(DurationSpec::from_millis(10))],
        );
        let course = Course::new("course101", "Course 101").with_task(task);
        let (engine, services) = engine_with(course, -1);

        let course = services.courses.get_course("course101").unwrap().unwrap();
        engine.schedule(&course, &course.tasks[0]);
        assert!(wait_for(|| counter.load(Ordering::SeqCst) >= 2));
        assert!(services
            .tasks
            .last_completion("course101", "course101::boom")
            .unwrap()
            .is_zero());
        engine.stop_all();
    }
}
