use super::{Clock, CourseStore, Email, Emailer, Grader, Lms, LogStore, TaskStore, UserStore};
use crate::model::{Course, LogQuery, LogRecord, User};
use crate::timestamp::Timestamp;
use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `course-id -> email -> user`.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, BTreeMap<String, User>>>,
}

impl UserStore for MemoryUserStore {
    fn get_user(&self, course_id: &str, email: &str) -> Result<Option<User>> {
        Ok(read(&self.users)
            .get(course_id)
            .and_then(|users| users.get(email))
            .cloned())
    }

    fn get_users(&self, course_id: &str) -> Result<BTreeMap<String, User>> {
        Ok(read(&self.users)
            .get(course_id)
            .cloned()
            .unwrap_or_default())
    }

    fn upsert_user(&self, course_id: &str, user: User) -> Result<()> {
        let mut users = write(&self.users);
        let course = users.entry(course_id.to_string()).or_default();
        match course.get_mut(&user.email) {
            Some(existing) => {
                existing.merge(&user);
            }
            None => {
                course.insert(user.email.clone(), user);
            }
        }
        Ok(())
    }

    fn remove_user(&self, course_id: &str, email: &str) -> Result<bool> {
        Ok(write(&self.users)
            .get_mut(course_id)
            .map(|users| users.remove(email).is_some())
            .unwrap_or(false))
    }
}

/// Courses plus optional "source" versions returned by `update_from_source`.
#[derive(Default)]
pub struct MemoryCourseStore {
    courses: RwLock<BTreeMap<String, Arc<Course>>>,
    sources: RwLock<HashMap<String, Course>>,
    updates: AtomicUsize,
}

impl MemoryCourseStore {
    /// Register the course that `update_from_source` will load for its id.
    pub fn set_source(&self, course: Course) {
        write(&self.sources).insert(course.id.clone(), course);
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl CourseStore for MemoryCourseStore {
    fn get_course(&self, course_id: &str) -> Result<Option<Arc<Course>>> {
        Ok(read(&self.courses).get(course_id).cloned())
    }

    fn get_courses(&self) -> Result<Vec<Arc<Course>>> {
        Ok(read(&self.courses).values().cloned().collect())
    }

    fn save_course(&self, mut course: Course) -> Result<()> {
        course.validate()?;
        write(&self.courses).insert(course.id.clone(), Arc::new(course));
        Ok(())
    }

    fn dump_course(&self, course_id: &str, dir: &Path) -> Result<()> {
        let course = self
            .get_course(course_id)?
            .ok_or_else(|| anyhow!("unknown course '{course_id}'"))?;
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join("course.json");
        let json = serde_json::to_vec_pretty(course.as_ref()).context("Failed to encode course")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn update_from_source(&self, course_id: &str) -> Result<Arc<Course>> {
        self.updates.fetch_add(1, Ordering::SeqCst);

        let source = read(&self.sources).get(course_id).cloned();
        match source {
            Some(course) => {
                self.save_course(course)?;
                self.get_course(course_id)?
                    .ok_or_else(|| anyhow!("course '{course_id}' vanished after update"))
            }
            None => self
                .get_course(course_id)?
                .ok_or_else(|| anyhow!("unknown course '{course_id}'")),
        }
    }
}

#[derive(Default)]
pub struct MemoryTaskStore {
    completions: Mutex<HashMap<(String, String), Timestamp>>,
}

impl TaskStore for MemoryTaskStore {
    fn last_completion(&self, course_id: &str, task_id: &str) -> Result<Timestamp> {
        Ok(lock(&self.completions)
            .get(&(course_id.to_string(), task_id.to_string()))
            .copied()
            .unwrap_or(Timestamp::ZERO))
    }

    fn log_completion(&self, course_id: &str, task_id: &str, when: Timestamp) -> Result<()> {
        lock(&self.completions).insert((course_id.to_string(), task_id.to_string()), when);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLogStore {
    records: RwLock<Vec<LogRecord>>,
}

impl MemoryLogStore {
    pub fn len(&self) -> usize {
        read(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogStore for MemoryLogStore {
    fn record(&self, record: LogRecord) -> Result<()> {
        write(&self.records).push(record);
        Ok(())
    }

    fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>> {
        Ok(read(&self.records)
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect())
    }
}

/// Scores keyed by `(course, assignment)`; counts image builds.
#[derive(Default)]
pub struct MemoryGrader {
    scores: RwLock<HashMap<(String, String), BTreeMap<String, f64>>>,
    builds: AtomicUsize,
}

impl MemoryGrader {
    pub fn set_score(&self, course_id: &str, assignment_id: &str, email: &str, score: f64) {
        write(&self.scores)
            .entry((course_id.to_string(), assignment_id.to_string()))
            .or_default()
            .insert(email.to_string(), score);
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl Grader for MemoryGrader {
    fn build_images(&self, _course: &Course) -> Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn assignment_scores(
        &self,
        course: &Course,
        assignment_id: &str,
    ) -> Result<BTreeMap<String, f64>> {
        Ok(read(&self.scores)
            .get(&(course.id.clone(), assignment_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// Records syncs and uploads.
#[derive(Default)]
pub struct MemoryLms {
    syncs: AtomicUsize,
    uploads: Mutex<Vec<(String, String, Vec<(String, f64)>)>>,
}

impl MemoryLms {
    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    /// `(course, assignment lms id, scores)` per upload.
    pub fn uploads(&self) -> Vec<(String, String, Vec<(String, f64)>)> {
        lock(&self.uploads).clone()
    }
}

impl Lms for MemoryLms {
    fn sync_users(&self, _course: &Course) -> Result<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn upload_scores(
        &self,
        course: &Course,
        assignment_lms_id: &str,
        scores: &[(String, f64)],
    ) -> Result<()> {
        lock(&self.uploads).push((
            course.id.clone(),
            assignment_lms_id.to_string(),
            scores.to_vec(),
        ));
        Ok(())
    }
}

/// Keeps every sent email.
#[derive(Default)]
pub struct MemoryEmailer {
    sent: Mutex<Vec<Email>>,
}

impl MemoryEmailer {
    pub fn sent(&self) -> Vec<Email> {
        lock(&self.sent).clone()
    }
}

impl Emailer for MemoryEmailer {
    fn send(&self, email: &Email) -> Result<()> {
        lock(&self.sent).push(email.clone());
        Ok(())
    }
}

/// A settable clock.
#[derive(Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(now.as_millis()),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now.as_millis(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogLevel, Role};

    #[test]
    fn test_user_store_upsert_merges() {
        let store = MemoryUserStore::default();
        store
            .upsert_user("c", User::new("a@test.com", "A", Role::Student))
            .unwrap();
        store
            .upsert_user("c", User::new("a@test.com", "", Role::Grader))
            .unwrap();

        let user = store.get_user("c", "a@test.com").unwrap().unwrap();
        assert_eq!(user.display_name, "A");
        assert_eq!(user.role, Role::Grader);
        assert!(store.get_user("c", "A@test.com").unwrap().is_none());
        assert!(store.get_user("other", "a@test.com").unwrap().is_none());

        assert!(store.remove_user("c", "a@test.com").unwrap());
        assert!(!store.remove_user("c", "a@test.com").unwrap());
    }

    #[test]
    fn test_course_store_update_from_source() {
        let store = MemoryCourseStore::default();
        store.save_course(Course::new("course101", "Old")).unwrap();
        assert_eq!(
            store.update_from_source("course101").unwrap().name,
            "Old"
        );

        store.set_source(Course::new("course101", "New"));
        assert_eq!(
            store.update_from_source("course101").unwrap().name,
            "New"
        );
        assert_eq!(store.update_count(), 2);
        assert!(store.update_from_source("zzz").is_err());
    }

    #[test]
    fn test_course_store_dump() {
        let store = MemoryCourseStore::default();
        store.save_course(Course::new("course101", "C")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        store.dump_course("course101", dir.path()).unwrap();
        let text = fs::read_to_string(dir.path().join("course.json")).unwrap();
        assert!(text.contains("course101"));
    }

    #[test]
    fn test_task_store_defaults_to_zero() {
        let store = MemoryTaskStore::default();
        assert!(store.last_completion("c", "c::t").unwrap().is_zero());
        store.log_completion("c", "c::t", Timestamp(5)).unwrap();
        assert_eq!(store.last_completion("c", "c::t").unwrap(), Timestamp(5));
    }

    #[test]
    fn test_log_store_query() {
        let store = MemoryLogStore::default();
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Error] {
            store
                .record(LogRecord {
                    level,
                    message: level.to_string(),
                    timestamp: Timestamp(10),
                    ..Default::default()
                })
                .unwrap();
        }
        let found = store
            .query(&LogQuery {
                level: LogLevel::Info,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(store.len(), 3);
    }
}
