//! Backup and restore (`backup` binary)
//!
//! A backup is staged in `backups/backup-<ts>/`:
//!
//! ```text
//! database.sql          pg_dump output
//! uploads/...           copy of the uploads directory
//! config/...            copy of the config directory
//! backup-report.json    metadata + SHA-256 per file
//! ```
//!
//! The staging directory is packed into `backup-<ts>.tar.gz` and removed.
//! A failed backup leaves nothing behind. Only the newest archives (by
//! modification time) are kept.

use crate::files::{copy_dir_recursive, walk_files};
use crate::render::timestamp_suffix;
use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use medesk_common::{config::AppConfig, config::DatabaseConfig, metrics, AppError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tracing::{error, info, warn};

pub const REPORT_FILE: &str = "backup-report.json";
pub const DUMP_FILE: &str = "database.sql";
pub const ARCHIVE_PREFIX: &str = "backup-";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Produces and loads the SQL dump
#[async_trait::async_trait]
pub trait DatabaseDumper: Send + Sync {
    async fn dump(&self, target: &Path) -> Result<()>;

    async fn load(&self, source: &Path) -> Result<()>;
}

/// `pg_dump` / `psql` through child processes; the password goes through
/// `PGPASSWORD`, never the command line
pub struct PgTools {
    pub pg_dump_bin: String,
    pub psql_bin: String,
    pub database: DatabaseConfig,
}

impl PgTools {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            pg_dump_bin: config.admin.pg_dump_bin.clone(),
            psql_bin: config.admin.psql_bin.clone(),
            database: config.database.clone(),
        }
    }

    fn command(&self, program: &str) -> Command {
        let db = &self.database;
        let mut cmd = Command::new(program);

        match db.url {
            Some(ref url) => {
                cmd.arg("--dbname").arg(url);
            }
            None => {
                cmd.arg("-h")
                    .arg(&db.host)
                    .arg("-p")
                    .arg(db.port.to_string())
                    .arg("-U")
                    .arg(&db.user)
                    .arg("-d")
                    .arg(&db.name);
                if !db.password.is_empty() {
                    cmd.env("PGPASSWORD", &db.password);
                }
            }
        }

        cmd.kill_on_drop(true);
        cmd
    }
}

async fn run_command(program: &str, mut cmd: Command) -> Result<()> {
    let output = cmd.output().await.map_err(|e| AppError::Process {
        program: program.to_string(),
        status: "spawn failure".to_string(),
        stderr: e.to_string(),
    })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(AppError::Process {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait::async_trait]
impl DatabaseDumper for PgTools {
    async fn dump(&self, target: &Path) -> Result<()> {
        let mut cmd = self.command(&self.pg_dump_bin);
        cmd.arg("--clean").arg("--if-exists").arg("--no-owner").arg("-f").arg(target);

        info!(target = %target.display(), "Dumping database");
        run_command(&self.pg_dump_bin, cmd).await
    }

    async fn load(&self, source: &Path) -> Result<()> {
        let mut cmd = self.command(&self.psql_bin);
        cmd.arg("-v").arg("ON_ERROR_STOP=1").arg("-q").arg("-f").arg(source);

        info!(source = %source.display(), "Loading database dump");
        run_command(&self.psql_bin, cmd).await
    }
}

/// Contents of `backup-report.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupReport {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub database: String,
    pub components: Vec<String>,
    pub file_count: u64,
    pub total_bytes: u64,
    /// Relative path (with `/` separators) to lowercase hex SHA-256
    pub checksums: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct BackupOutcome {
    pub archive: PathBuf,
    pub archive_bytes: u64,
    pub report: BackupReport,
    /// Archives deleted by retention
    pub removed: Vec<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub modified: DateTime<Utc>,
}

/// Clears the running flag when dropped
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct BackupManager {
    backups_dir: PathBuf,
    uploads_dir: PathBuf,
    config_dir: PathBuf,
    database_name: String,
    retention: usize,
    dumper: Box<dyn DatabaseDumper>,
    running: AtomicBool,
}

impl BackupManager {
    pub fn new(config: &AppConfig, dumper: Box<dyn DatabaseDumper>) -> Self {
        Self {
            backups_dir: config.admin.backups_dir.clone(),
            uploads_dir: config.storage.uploads_dir.clone(),
            config_dir: config.storage.config_dir.clone(),
            database_name: config.database.name.clone(),
            retention: config.admin.backup_retention.max(1),
            dumper,
            running: AtomicBool::new(false),
        }
    }

    /// Manager that shells out to `pg_dump`/`psql`
    pub fn with_pg_tools(config: &AppConfig) -> Self {
        Self::new(config, Box::new(PgTools::from_config(config)))
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    fn acquire(&self) -> Result<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| RunningGuard(&self.running))
            .map_err(|_| AppError::BackupInProgress)
    }

    // ========================================================================
    // Create
    // ========================================================================

    pub async fn create_backup(&self, now: DateTime<Utc>) -> Result<BackupOutcome> {
        let _guard = self.acquire()?;

        let name = format!("{}{}", ARCHIVE_PREFIX, timestamp_suffix(now));
        let staging = self.backups_dir.join(&name);
        let archive = self.backups_dir.join(format!("{}{}", name, ARCHIVE_SUFFIX));

        info!(backup = %name, "Starting backup");

        match self.build_archive(&name, &staging, &archive, now).await {
            Ok(report) => {
                let archive_bytes = tokio::fs::metadata(&archive).await?.len();
                let removed = self.apply_retention().await?;

                metrics::record_backup("create", true, Some(archive_bytes));
                info!(
                    archive = %archive.display(),
                    bytes = archive_bytes,
                    files = report.file_count,
                    removed = removed.len(),
                    "Backup complete"
                );

                Ok(BackupOutcome {
                    archive,
                    archive_bytes,
                    report,
                    removed,
                })
            }
            Err(e) => {
                error!(backup = %name, error = %e, "Backup failed, removing partial output");
                discard(&staging, &archive).await;
                metrics::record_backup("create", false, None);
                Err(e)
            }
        }
    }

    async fn build_archive(
        &self,
        name: &str,
        staging: &Path,
        archive: &Path,
        now: DateTime<Utc>,
    ) -> Result<BackupReport> {
        tokio::fs::create_dir_all(staging).await?;

        self.dumper.dump(&staging.join(DUMP_FILE)).await?;

        let (uploads_src, config_src) = (self.uploads_dir.clone(), self.config_dir.clone());
        let stage = staging.to_path_buf();
        let (uploads, configs) = blocking(move || {
            Ok((
                copy_dir_recursive(&uploads_src, &stage.join("uploads"))?,
                copy_dir_recursive(&config_src, &stage.join("config"))?,
            ))
        })
        .await?;

        let mut components = vec![DUMP_FILE.to_string()];
        if uploads > 0 {
            components.push("uploads".to_string());
        }
        if configs > 0 {
            components.push("config".to_string());
        }

        let stage = staging.to_path_buf();
        let (checksums, total_bytes) = blocking(move || {
            let sums = compute_checksums(&stage)?;
            let mut bytes = 0;
            for rel in sums.keys() {
                bytes += fs::metadata(stage.join(rel))?.len();
            }
            Ok((sums, bytes))
        })
        .await?;

        let report = BackupReport {
            name: name.to_string(),
            created_at: now,
            database: self.database_name.clone(),
            components,
            file_count: checksums.len() as u64,
            total_bytes,
            checksums,
        };
        tokio::fs::write(staging.join(REPORT_FILE), serde_json::to_vec_pretty(&report)?).await?;

        let (stage, target, root) = (staging.to_path_buf(), archive.to_path_buf(), name.to_string());
        blocking(move || pack_archive(&stage, &target, &root)).await?;

        tokio::fs::remove_dir_all(staging).await?;

        Ok(report)
    }

    // ========================================================================
    // Verify / Restore
    // ========================================================================

    /// Extract into a temp dir and check every checksum against the report
    pub async fn verify_backup(&self, archive: &Path) -> Result<BackupReport> {
        let extracted = extract_and_verify(archive).await?;
        info!(archive = %archive.display(), files = extracted.report.file_count, "Backup verified");
        Ok(extracted.report)
    }

    pub async fn restore_backup(&self, archive: &Path) -> Result<BackupReport> {
        let _guard = self.acquire()?;
        info!(archive = %archive.display(), "Starting restore");

        let result = self.restore_inner(archive).await;
        metrics::record_backup("restore", result.is_ok(), None);
        result
    }

    async fn restore_inner(&self, archive: &Path) -> Result<BackupReport> {
        let extracted = extract_and_verify(archive).await?;
        let root = extracted.root.clone();

        let dump = root.join(DUMP_FILE);
        if tokio::fs::try_exists(&dump).await? {
            self.dumper.load(&dump).await?;
        } else {
            warn!("Backup has no database dump, skipping database restore");
        }

        let (uploads_dst, config_dst) = (self.uploads_dir.clone(), self.config_dir.clone());
        let (uploads, configs) = blocking(move || {
            Ok((
                copy_dir_recursive(&root.join("uploads"), &uploads_dst)?,
                copy_dir_recursive(&root.join("config"), &config_dst)?,
            ))
        })
        .await?;

        info!(uploads, configs, "Restore complete");
        Ok(extracted.report)
    }

    // ========================================================================
    // Listing and retention
    // ========================================================================

    /// Archives in the backups directory, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupEntry>> {
        let dir = self.backups_dir.clone();
        blocking(move || list_archives(&dir)).await
    }

    /// Delete the oldest archives beyond the retention count
    pub async fn apply_retention(&self) -> Result<Vec<PathBuf>> {
        let entries = self.list_backups().await?;
        let mut removed = Vec::new();

        for entry in entries.into_iter().skip(self.retention) {
            tokio::fs::remove_file(&entry.path).await?;
            info!(archive = %entry.path.display(), "Removed old backup");
            removed.push(entry.path);
        }

        Ok(removed)
    }
}

/// Extracted archive kept alive by its temp dir
struct Extracted {
    _dir: tempfile::TempDir,
    root: PathBuf,
    report: BackupReport,
}

async fn extract_and_verify(archive: &Path) -> Result<Extracted> {
    let archive = archive.to_path_buf();

    blocking(move || {
        if !archive.is_file() {
            return Err(AppError::Archive {
                message: format!("{} does not exist", archive.display()),
            });
        }

        let dir = tempfile::tempdir()?;
        unpack_archive(&archive, dir.path())?;
        let root = locate_backup_root(dir.path())?;

        let report: BackupReport = serde_json::from_slice(&fs::read(root.join(REPORT_FILE))?)?;
        verify_checksums(&report.checksums, &compute_checksums(&root)?)?;

        Ok(Extracted { _dir: dir, root, report })
    })
    .await
}

async fn discard(staging: &Path, archive: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(staging).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %staging.display(), error = %e, "Could not remove staging directory");
        }
    }
    if let Err(e) = tokio::fs::remove_file(archive).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %archive.display(), error = %e, "Could not remove partial archive");
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal {
            message: format!("blocking task failed: {}", e),
        })?
}

// ============================================================================
// Checksums
// ============================================================================

/// SHA-256 of every file under `root` except the report itself
pub fn compute_checksums(root: &Path) -> Result<BTreeMap<String, String>> {
    let mut sums = BTreeMap::new();

    for rel in walk_files(root)? {
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key == REPORT_FILE {
            continue;
        }

        let mut hasher = Sha256::new();
        let mut file = File::open(root.join(&rel))?;
        io::copy(&mut file, &mut hasher)?;
        sums.insert(key, hex::encode(hasher.finalize()));
    }

    Ok(sums)
}

/// Expected and actual must list the same files with the same digests
pub fn verify_checksums(
    expected: &BTreeMap<String, String>,
    actual: &BTreeMap<String, String>,
) -> Result<()> {
    for (path, digest) in expected {
        match actual.get(path) {
            Some(found) if found == digest => {}
            _ => return Err(AppError::ChecksumMismatch { path: path.clone() }),
        }
    }

    if let Some(extra) = actual.keys().find(|k| !expected.contains_key(*k)) {
        return Err(AppError::ChecksumMismatch { path: extra.clone() });
    }

    Ok(())
}

// ============================================================================
// Archives
// ============================================================================

fn pack_archive(staging: &Path, archive: &Path, root_name: &str) -> Result<()> {
    let file = File::create(archive)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder.append_dir_all(root_name, staging)?;

    let encoder = builder.into_inner()?;
    encoder.finish()?.sync_all()?;
    Ok(())
}

fn unpack_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.unpack(dest).map_err(|e| AppError::Archive {
        message: format!("cannot extract {}: {}", archive.display(), e),
    })
}

/// The report sits at the top level or inside a single root directory
fn locate_backup_root(dir: &Path) -> Result<PathBuf> {
    if dir.join(REPORT_FILE).is_file() {
        return Ok(dir.to_path_buf());
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && path.join(REPORT_FILE).is_file() {
            return Ok(path);
        }
    }

    Err(AppError::Archive {
        message: format!("{} not found in archive", REPORT_FILE),
    })
}

fn is_archive_name(name: &str) -> bool {
    name.starts_with(ARCHIVE_PREFIX) && name.ends_with(ARCHIVE_SUFFIX)
}

fn list_archives(dir: &Path) -> Result<Vec<BackupEntry>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_archive_name(&name) || !entry.file_type()?.is_file() {
            continue;
        }

        let meta = entry.metadata()?;
        entries.push(BackupEntry {
            name,
            path: entry.path(),
            bytes: meta.len(),
            modified: DateTime::<Utc>::from(meta.modified()?),
        });
    }

    // Newest first; name breaks ties so ordering is stable
    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::fixed_now;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    /// Writes a fixed dump and records loads
    #[derive(Default)]
    struct FakeDumper {
        fail_dump: bool,
        loaded: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DatabaseDumper for FakeDumper {
        async fn dump(&self, target: &Path) -> Result<()> {
            if self.fail_dump {
                return Err(AppError::Process {
                    program: "pg_dump".into(),
                    status: "exit status: 1".into(),
                    stderr: "connection refused".into(),
                });
            }
            tokio::fs::write(target, "CREATE TABLE patients ();\n").await?;
            Ok(())
        }

        async fn load(&self, source: &Path) -> Result<()> {
            let sql = tokio::fs::read_to_string(source).await?;
            self.loaded.lock().unwrap().push(sql);
            Ok(())
        }
    }

    struct Sandbox {
        _tmp: tempfile::TempDir,
        config: AppConfig,
    }

    fn sandbox() -> Sandbox {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.admin.backups_dir = tmp.path().join("backups");
        config.storage.uploads_dir = tmp.path().join("uploads");
        config.storage.config_dir = tmp.path().join("config");

        fs::create_dir_all(config.storage.uploads_dir.join("2024")).unwrap();
        fs::write(config.storage.uploads_dir.join("2024/exam.pdf"), b"%PDF-1.4 exam").unwrap();
        fs::create_dir_all(&config.storage.config_dir).unwrap();
        fs::write(config.storage.config_dir.join("default.toml"), b"[server]\nport = 5000\n").unwrap();

        Sandbox { _tmp: tmp, config }
    }

    fn set_mtime(path: &Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_checksums_are_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("uploads")).unwrap();
        fs::write(tmp.path().join("database.sql"), b"select 1;").unwrap();
        fs::write(tmp.path().join("uploads/a.txt"), b"a").unwrap();

        let first = compute_checksums(tmp.path()).unwrap();
        let second = compute_checksums(tmp.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first["uploads/a.txt"],
            "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb"
        );
    }

    #[test]
    fn test_modifying_one_file_changes_only_its_entry() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("one.txt"), b"one").unwrap();
        fs::write(tmp.path().join("two.txt"), b"two").unwrap();
        let before = compute_checksums(tmp.path()).unwrap();

        fs::write(tmp.path().join("two.txt"), b"two, edited").unwrap();
        let after = compute_checksums(tmp.path()).unwrap();

        assert_eq!(before["one.txt"], after["one.txt"]);
        assert_ne!(before["two.txt"], after["two.txt"]);
        assert!(matches!(
            verify_checksums(&before, &after),
            Err(AppError::ChecksumMismatch { path }) if path == "two.txt"
        ));
    }

    #[test]
    fn test_report_file_is_not_hashed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(REPORT_FILE), b"{}").unwrap();
        fs::write(tmp.path().join(DUMP_FILE), b"--").unwrap();

        let sums = compute_checksums(tmp.path()).unwrap();
        assert_eq!(sums.keys().collect::<Vec<_>>(), vec![DUMP_FILE]);
    }

    #[test]
    fn test_extra_file_fails_verification() {
        let expected = BTreeMap::from([("a".to_string(), "1".to_string())]);
        let actual = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        assert!(verify_checksums(&expected, &actual).is_err());
        assert!(verify_checksums(&expected, &expected).is_ok());
    }

    #[tokio::test]
    async fn test_create_backup_produces_archive() {
        let sb = sandbox();
        let manager = BackupManager::new(&sb.config, Box::new(FakeDumper::default()));

        let outcome = manager.create_backup(fixed_now()).await.unwrap();

        assert_eq!(
            outcome.archive.file_name().unwrap(),
            "backup-2024-06-15T12-00-00-000Z.tar.gz"
        );
        assert!(outcome.archive.is_file());
        assert!(!sb.config.admin.backups_dir.join("backup-2024-06-15T12-00-00-000Z").exists());
        assert_eq!(outcome.report.file_count, 3);
        assert!(outcome.report.checksums.contains_key("uploads/2024/exam.pdf"));
        assert!(outcome.report.checksums.contains_key("config/default.toml"));
        assert_eq!(outcome.report.components, vec!["database.sql", "uploads", "config"]);

        let verified = manager.verify_backup(&outcome.archive).await.unwrap();
        assert_eq!(verified, outcome.report);
    }

    #[tokio::test]
    async fn test_failed_dump_leaves_nothing_behind() {
        let sb = sandbox();
        let dumper = FakeDumper { fail_dump: true, ..Default::default() };
        let manager = BackupManager::new(&sb.config, Box::new(dumper));

        assert!(manager.create_backup(fixed_now()).await.is_err());

        let leftovers: Vec<_> = fs::read_dir(&sb.config.admin.backups_dir).unwrap().collect();
        assert!(leftovers.is_empty());
        assert!(!manager.running.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_retention_removes_oldest_after_eighth() {
        let sb = sandbox();
        let dir = &sb.config.admin.backups_dir;
        fs::create_dir_all(dir).unwrap();

        // Seven older archives, the first being the oldest
        for day in 1..=7u64 {
            let path = dir.join(format!("backup-2024-06-0{}T00-00-00-000Z.tar.gz", day));
            fs::write(&path, b"old").unwrap();
            set_mtime(&path, Duration::from_secs((8 - day) * 86_400));
        }

        let manager = BackupManager::new(&sb.config, Box::new(FakeDumper::default()));
        let outcome = manager.create_backup(fixed_now()).await.unwrap();

        let remaining = manager.list_backups().await.unwrap();
        assert_eq!(remaining.len(), 7);
        assert_eq!(outcome.removed.len(), 1);
        assert!(outcome.removed[0].ends_with("backup-2024-06-01T00-00-00-000Z.tar.gz"));
        assert_eq!(remaining[0].path, outcome.archive);
    }

    #[tokio::test]
    async fn test_tampered_archive_fails_verification() {
        let sb = sandbox();
        let manager = BackupManager::new(&sb.config, Box::new(FakeDumper::default()));
        let outcome = manager.create_backup(fixed_now()).await.unwrap();

        // Rebuild the archive with one file altered
        let work = tempfile::tempdir().unwrap();
        unpack_archive(&outcome.archive, work.path()).unwrap();
        let root = locate_backup_root(work.path()).unwrap();
        fs::write(root.join("uploads/2024/exam.pdf"), b"tampered").unwrap();
        pack_archive(&root, &outcome.archive, &outcome.report.name).unwrap();

        let err = manager.verify_backup(&outcome.archive).await.unwrap_err();
        assert!(matches!(err, AppError::ChecksumMismatch { ref path } if path == "uploads/2024/exam.pdf"));
    }

    #[tokio::test]
    async fn test_restore_loads_dump_and_copies_files() {
        let sb = sandbox();
        let dumper = std::sync::Arc::new(FakeDumper::default());

        struct Shared(std::sync::Arc<FakeDumper>);

        #[async_trait::async_trait]
        impl DatabaseDumper for Shared {
            async fn dump(&self, target: &Path) -> Result<()> {
                self.0.dump(target).await
            }

            async fn load(&self, source: &Path) -> Result<()> {
                self.0.load(source).await
            }
        }

        let manager = BackupManager::new(&sb.config, Box::new(Shared(dumper.clone())));
        let outcome = manager.create_backup(fixed_now()).await.unwrap();

        fs::remove_dir_all(&sb.config.storage.uploads_dir).unwrap();
        manager.restore_backup(&outcome.archive).await.unwrap();

        assert_eq!(
            fs::read(sb.config.storage.uploads_dir.join("2024/exam.pdf")).unwrap(),
            b"%PDF-1.4 exam"
        );
        assert_eq!(dumper.loaded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_is_rejected_while_running() {
        let sb = sandbox();
        let manager = BackupManager::new(&sb.config, Box::new(FakeDumper::default()));

        let guard = manager.acquire().unwrap();
        assert!(matches!(
            manager.create_backup(fixed_now()).await,
            Err(AppError::BackupInProgress)
        ));
        drop(guard);

        assert!(manager.create_backup(fixed_now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_archive() {
        let sb = sandbox();
        let manager = BackupManager::new(&sb.config, Box::new(FakeDumper::default()));

        let err = manager.verify_backup(Path::new("/nonexistent/backup-x.tar.gz")).await.unwrap_err();
        assert!(matches!(err, AppError::Archive { .. }));
    }
}
