//! Testing utilities for the hostgate workspace
//!
//! In-memory drivers that record what they were asked to do, and a
//! [`Fixture`] that wires them to a temporary managed root.

#![allow(missing_docs)]

use async_trait::async_trait;
use hostgate_guard::PathGuard;
use hostgate_release::{
    AppLocks, ContainerOrchestrator, DatabaseDriver, DriverError, Drivers, MigrationReport,
    MigrationRunner, PipelineSettings, ReleasePipeline, SourceControl,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Revision every fake checkout reports
pub const FAKE_REVISION: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Origin of checkouts created by [`Fixture::seed_source`]
pub const SEED_ORIGIN: &str = "https://github.com/org/repo";

fn git_config(origin: &str) -> String {
    format!("[remote \"origin\"]\n\turl = {origin}\n")
}

fn failed(program: &str, stderr: &str) -> DriverError {
    DriverError::Failed {
        program: program.to_string(),
        status: 1,
        stderr: stderr.to_string(),
    }
}

/// Version control that materializes a tiny project on clone
#[derive(Debug, Default)]
pub struct FakeGit {
    calls: Mutex<Vec<String>>,
    fail_clone: AtomicBool,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn fail_next_clone(&self) {
        self.fail_clone.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceControl for FakeGit {
    async fn is_work_tree(&self, dir: &Path) -> bool {
        dir.join(".git").is_dir()
    }

    async fn clone_at(&self, url: &str, reference: &str, dir: &Path) -> Result<(), DriverError> {
        self.calls.lock().push(format!("clone {url} {reference}"));
        if self.fail_clone.swap(false, Ordering::SeqCst) {
            return Err(failed("git", "fatal: repository not found"));
        }
        let io = |e: std::io::Error| failed("git", &e.to_string());
        std::fs::create_dir_all(dir.join(".git")).map_err(io)?;
        std::fs::write(dir.join(".git/config"), git_config(url)).map_err(io)?;
        std::fs::create_dir_all(dir.join("supabase/migrations")).map_err(io)?;
        std::fs::write(dir.join("index.html"), "<h1>demo</h1>\n").map_err(io)?;
        std::fs::write(dir.join("supabase/migrations/20240101000000_init.sql"), "create table items ();\n")
            .map_err(io)?;
        Ok(())
    }

    async fn fast_forward(&self, dir: &Path, reference: &str) -> Result<(), DriverError> {
        self.calls.lock().push(format!("fast-forward {reference}"));
        if dir.join(".git").is_dir() {
            Ok(())
        } else {
            Err(failed("git", "fatal: not a git repository"))
        }
    }

    async fn head_revision(&self, dir: &Path) -> Result<String, DriverError> {
        if dir.join(".git").is_dir() {
            Ok(FAKE_REVISION.to_string())
        } else {
            Err(failed("git", "fatal: not a git repository"))
        }
    }

    async fn origin_url(&self, dir: &Path) -> Result<String, DriverError> {
        let config = std::fs::read_to_string(dir.join(".git/config"))
            .map_err(|_| failed("git", "fatal: not a git repository"))?;
        config
            .lines()
            .find_map(|line| line.trim().strip_prefix("url = "))
            .map(ToString::to_string)
            .ok_or_else(|| failed("git", "error: No such remote 'origin'"))
    }
}

/// Orchestrator that tracks which stacks and services are "running"
#[derive(Debug, Default)]
pub struct FakeCompose {
    running: Mutex<BTreeSet<(PathBuf, Option<String>)>>,
    ups: AtomicUsize,
    restarts: AtomicUsize,
    stops: AtomicUsize,
    downs: AtomicUsize,
    fail_up: AtomicBool,
}

impl FakeCompose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn up_count(&self) -> usize {
        self.ups.load(Ordering::SeqCst)
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn down_count(&self) -> usize {
        self.downs.load(Ordering::SeqCst)
    }

    pub fn fail_next_up(&self) {
        self.fail_up.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContainerOrchestrator for FakeCompose {
    async fn is_running(&self, compose_file: &Path, service: Option<&str>) -> Result<bool, DriverError> {
        let running = self.running.lock();
        Ok(match service {
            Some(s) => running.contains(&(compose_file.to_path_buf(), Some(s.to_string()))),
            None => running.iter().any(|(file, _)| file == compose_file),
        })
    }

    async fn up(&self, compose_file: &Path, service: Option<&str>) -> Result<(), DriverError> {
        self.ups.fetch_add(1, Ordering::SeqCst);
        if self.fail_up.swap(false, Ordering::SeqCst) {
            return Err(failed("docker", "container exited with code 1"));
        }
        self.running
            .lock()
            .insert((compose_file.to_path_buf(), service.map(ToString::to_string)));
        Ok(())
    }

    async fn stop(&self, compose_file: &Path) -> Result<(), DriverError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.lock().retain(|(file, _)| file != compose_file);
        Ok(())
    }

    async fn restart(&self, _compose_file: &Path, _service: Option<&str>) -> Result<(), DriverError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn down(&self, compose_file: &Path) -> Result<(), DriverError> {
        self.downs.fetch_add(1, Ordering::SeqCst);
        self.running.lock().retain(|(file, _)| file != compose_file);
        Ok(())
    }
}

/// Database server holding table names only
#[derive(Debug, Default)]
pub struct FakeDatabase {
    databases: Mutex<BTreeMap<String, BTreeSet<String>>>,
    statements: Mutex<Vec<(String, String)>>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn databases(&self) -> Vec<String> {
        self.databases.lock().keys().cloned().collect()
    }

    /// `(database, sql)` pairs in execution order
    pub fn statements(&self) -> Vec<(String, String)> {
        self.statements.lock().clone()
    }
}

#[async_trait]
impl DatabaseDriver for FakeDatabase {
    async fn create_database(&self, name: &str) -> Result<(), DriverError> {
        let mut dbs = self.databases.lock();
        if dbs.contains_key(name) {
            return Err(failed("psql", &format!("database \"{name}\" already exists")));
        }
        dbs.insert(name.to_string(), BTreeSet::new());
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), DriverError> {
        self.databases.lock().remove(name);
        Ok(())
    }

    async fn execute(&self, database: &str, sql: &str) -> Result<String, DriverError> {
        let mut dbs = self.databases.lock();
        let tables = dbs
            .get_mut(database)
            .ok_or_else(|| failed("psql", &format!("database \"{database}\" does not exist")))?;
        self.statements
            .lock()
            .push((database.to_string(), sql.to_string()));

        let lower = sql.trim().to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("create table ") {
            let name: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            tables.insert(name);
            return Ok("CREATE TABLE".to_string());
        }
        Ok("OK".to_string())
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>, DriverError> {
        self.databases
            .lock()
            .get(database)
            .map(|t| t.iter().cloned().collect())
            .ok_or_else(|| failed("psql", &format!("database \"{database}\" does not exist")))
    }

    async fn dump(&self, database: &str, destination: &Path) -> Result<u64, DriverError> {
        let body = {
            let dbs = self.databases.lock();
            let tables = dbs
                .get(database)
                .ok_or_else(|| failed("pg_dump", &format!("database \"{database}\" does not exist")))?;
            format!("-- dump of {database}\n-- tables: {}\n", tables.iter().cloned().collect::<Vec<_>>().join(","))
        };
        std::fs::write(destination, &body).map_err(|e| failed("pg_dump", &e.to_string()))?;
        Ok(body.len() as u64)
    }
}

/// Migration runner reporting the `.sql` files under `supabase/migrations`
#[derive(Debug, Default)]
pub struct FakeMigrator {
    runs: Mutex<Vec<PathBuf>>,
}

impl FakeMigrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project dirs `apply` was called with
    pub fn runs(&self) -> Vec<PathBuf> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl MigrationRunner for FakeMigrator {
    async fn apply(&self, project_dir: &Path, functions: &[String]) -> Result<MigrationReport, DriverError> {
        self.runs.lock().push(project_dir.to_path_buf());
        let mut applied: Vec<String> = std::fs::read_dir(project_dir.join("supabase/migrations"))
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|n| n.ends_with(".sql"))
                    .collect()
            })
            .unwrap_or_default();
        applied.sort();
        Ok(MigrationReport {
            output: applied
                .iter()
                .map(|m| format!("Applying migration {m}..."))
                .collect::<Vec<_>>()
                .join("\n"),
            applied,
            functions: functions.to_vec(),
        })
    }
}

/// Temporary managed root with fake drivers
pub struct Fixture {
    pub root: TempDir,
    pub guard: PathGuard,
    pub git: Arc<FakeGit>,
    pub compose: Arc<FakeCompose>,
    pub database: Arc<FakeDatabase>,
    pub migrator: Arc<FakeMigrator>,
    pub locks: AppLocks,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().canonicalize().unwrap();
        Self {
            guard: PathGuard::new(path).unwrap(),
            root,
            git: Arc::new(FakeGit::new()),
            compose: Arc::new(FakeCompose::new()),
            database: Arc::new(FakeDatabase::new()),
            migrator: Arc::new(FakeMigrator::new()),
            locks: AppLocks::new(),
        }
    }

    pub fn root_path(&self) -> &Path {
        self.guard.root()
    }

    pub fn app_dir(&self, slug: &str) -> PathBuf {
        self.guard.root().join(slug)
    }

    pub fn drivers(&self) -> Drivers {
        Drivers {
            source: self.git.clone(),
            containers: self.compose.clone(),
            database: self.database.clone(),
            migrations: self.migrator.clone(),
        }
    }

    pub fn pipeline(&self) -> ReleasePipeline {
        ReleasePipeline::new(
            self.guard.clone(),
            self.drivers(),
            self.locks.clone(),
            PipelineSettings {
                public_host: "apps.test".to_string(),
            },
        )
    }

    /// Write `<app>/<relative>`, creating parents
    pub fn write(&self, slug: &str, relative: &str, contents: &str) -> PathBuf {
        let path = self.app_dir(slug).join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// A checked-out source tree as `repo.clone` would leave it
    pub fn seed_source(&self, slug: &str) -> PathBuf {
        self.write(slug, "src/.git/HEAD", "ref: refs/heads/main\n");
        self.write(slug, "src/.git/config", &git_config(SEED_ORIGIN));
        self.write(slug, "src/index.html", "<h1>demo</h1>\n");
        self.app_dir(slug).join("src")
    }

    /// Minimal application service definition
    pub fn seed_compose(&self, slug: &str) -> PathBuf {
        self.write(
            slug,
            "docker-compose.yml",
            "services:\n  web:\n    image: nginx:alpine\n    volumes:\n      - ./current:/usr/share/nginx/html:ro\n",
        )
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Every path under `dir`, relative and sorted
pub fn tree(dir: &Path) -> Vec<String> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if let Ok(rel) = path.strip_prefix(base) {
                out.push(rel.display().to_string());
            }
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                walk(base, &path, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}
