//! notes-daemon: headless native binary exercising the durable note
//! persistence core end to end: startup recovery, projection catch-up,
//! then the watcher/save/scheduler loop until shutdown.

mod native_fs;
mod recovery;
mod save_coordinator;
mod scheduler;
mod status;
mod watcher;

use anyhow::{Context, Result};
use clap::Parser;
use native_fs::NativeFs;
use notes_core::config::NotesConfig;
use notes_core::fs::FileSystem;
use notes_core::wal::WriteAheadLog;
use notes_search::index_manager::{EligibilityConfig, FileEventKind as IndexEventKind, IndexManager};
use notes_search::preview::{PreviewCache, DEFAULT_MAX_PREVIEW_LEN};
use notes_search::repository::{FtsRepository, NoteDocument};
use notes_store::event_store::EventStore;
use notes_store::projection::{Projection, ProjectionOrchestrator};
use notes_store::projections::tag::TagProjection;
use notes_store::projections::tree::{TreeProjection, TreeRow};
use recovery::StartupRecovery;
use save_coordinator::SaveCoordinator;
use scheduler::{CentralScheduler, SaveAllTask, WalFlushTask};
use sqlx::sqlite::SqlitePoolOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use watcher::FileWatcher;

#[derive(Parser, Debug)]
#[command(name = "notes-daemon")]
#[command(about = "Headless persistence core for a local-first notes vault")]
struct Args {
    /// Notes root directory; overrides `notes_root_path` from the config file.
    #[arg(long)]
    vault: Option<PathBuf>,

    /// Path to the TOML config file.
    #[arg(long, default_value = "notes.toml")]
    config: PathBuf,

    /// Clears and rebuilds the full-text index from the current projections
    /// before entering the main loop.
    #[arg(long)]
    rebuild_index: bool,

    /// Enable verbose logging.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = NotesConfig::load_from(&args.config).context("loading config")?;
    if let Some(vault) = args.vault {
        config.notes_root_path = vault;
    }
    info!("notes root: {}", config.notes_root_path.display());

    let fs = Arc::new(NativeFs::new());
    fs.create_dir(&config.notes_root_path.join(".notes")).await.ok();

    info!("running startup recovery");
    let recovery = StartupRecovery::new(Arc::clone(&fs), config.notes_root_path.clone());
    let summary = recovery.run().await;
    info!(
        "recovery complete: {} recovered, {} backups, {} temps cleaned, {} emergency dumps, {} failures",
        summary.recovered.len(),
        summary.backups_created.len(),
        summary.temps_cleaned.len(),
        summary.emergency_dumps.len(),
        summary.failed.len()
    );
    for (path, err) in &summary.failed {
        warn!("recovery failure for {}: {err}", path.display());
    }
    for dump in &summary.emergency_dumps {
        warn!("emergency recovery dump pending user review: {}", dump.display());
    }

    let db_path = config.notes_root_path.join(".notes").join("events.db");
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await
        .context("opening event store database")?;

    let store = Arc::new(EventStore::new(pool.clone()));
    store.init_schema().await.context("initializing event store schema")?;

    let tree = Arc::new(TreeProjection::new(pool.clone()));
    tree.init_schema().await.context("initializing tree projection schema")?;
    let tag = Arc::new(TagProjection::new(pool.clone()));
    tag.init_schema().await.context("initializing tag projection schema")?;

    let projections: Vec<Arc<dyn Projection>> = vec![tree.clone(), tag.clone()];
    let orchestrator = Arc::new(ProjectionOrchestrator::new(Arc::clone(&store), projections));

    info!("catching up projections from the event log");
    orchestrator.catch_up_all().await;

    let index_dir = config.notes_root_path.join(".notes").join("search_index");
    fs.create_dir(&index_dir).await.ok();
    let repository = Arc::new(
        FtsRepository::open_or_create(&index_dir).context("opening full-text search index")?,
    );
    let eligibility = EligibilityConfig {
        indexed_extensions: config.indexed_extensions.clone(),
        max_indexed_file_size: config.max_indexed_file_size,
        excluded_directories: config.excluded_directories.clone(),
        skip_hidden: true,
    };
    let index_manager = Arc::new(IndexManager::new(Arc::clone(&repository), eligibility));
    let preview_cache = Arc::new(PreviewCache::new(config.preview_cache_capacity));

    if args.rebuild_index {
        info!("rebuilding full-text index");
        let rows = tree.list_all_notes().await.unwrap_or_default();
        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            match build_note_document(fs.as_ref(), &config.notes_root_path, &row, &preview_cache).await {
                Ok(Some(doc)) => candidates.push(doc),
                Ok(None) => {}
                Err(e) => warn!("rebuild skipped {}: {e}", row.display_path),
            }
        }
        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
        let progress_task = tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                info!(
                    "index rebuild: {}/{} ({:?})",
                    progress.processed, progress.total, progress.stage
                );
            }
        });
        index_manager.rebuild_all(candidates, true, Some(progress_tx)).await;
        let _ = progress_task.await;
    }

    let wal = Arc::new(WriteAheadLog::new(
        Arc::clone(&fs),
        config.notes_root_path.join(".notes").join("wal.log"),
    ));
    reconcile_wal(&wal, &fs).await;

    let watcher = Arc::new(FileWatcher::new(config.notes_root_path.clone()).context("starting file watcher")?);

    let coordinator = Arc::new(
        SaveCoordinator::new(Arc::clone(&fs), Some(Arc::clone(&watcher))).with_wal(Arc::clone(&wal)),
    );

    let scheduler_coordinator = Arc::clone(&coordinator);
    let save_all: SaveAllTask = Box::new(move || {
        let coordinator = Arc::clone(&scheduler_coordinator);
        Box::pin(async move {
            let stats = coordinator.get_stats().await;
            info!("scheduled save cycle (lifetime attempts so far: {})", stats.attempts);
        })
    });

    let wal_flush_task = Arc::clone(&wal);
    let wal_flush_fs = Arc::clone(&fs);
    let wal_flush: WalFlushTask = Box::new(move || {
        let wal = Arc::clone(&wal_flush_task);
        let fs = Arc::clone(&wal_flush_fs);
        Box::pin(async move { reconcile_wal(&wal, &fs).await })
    });

    let scheduler = Arc::new(
        CentralScheduler::new(save_all, wal_flush)
            .with_intervals(config.auto_save_interval(), config.wal_flush_interval()),
    );

    let cancellation = CancellationToken::new();

    let scheduler_handle = {
        let scheduler = Arc::clone(&scheduler);
        let cancellation = cancellation.clone();
        tokio::spawn(async move { scheduler.run(cancellation).await })
    };

    let projection_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancellation = cancellation.clone();
        let interval = config.projection_poll_interval();
        tokio::spawn(async move { orchestrator.start_continuous_with_interval(cancellation, interval).await })
    };

    info!("notes-daemon running; press ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            Some(event) = watcher.recv() => {
                handle_watch_event(
                    &fs,
                    &config.notes_root_path,
                    &tree,
                    &index_manager,
                    &preview_cache,
                    event.path,
                )
                .await;
            }
        }
    }

    cancellation.cancel();
    let _ = tokio::join!(scheduler_handle, projection_handle);

    scheduler.save_all_async().await;
    coordinator.dispose().await;
    store.checkpoint_on_shutdown().await;

    info!("notes-daemon stopped cleanly");
    Ok(())
}

/// Classifies a raw watcher event (the notify-debouncer-mini backend can't
/// distinguish create/modify/delete/rename on its own) against current disk
/// and projection state, builds the eligible `NoteDocument` if one applies,
/// and schedules the resulting indexing action.
async fn handle_watch_event<F: FileSystem>(
    fs: &Arc<F>,
    vault_root: &Path,
    tree: &TreeProjection,
    index_manager: &IndexManager,
    preview_cache: &PreviewCache,
    path: PathBuf,
) {
    let exists = fs.exists(&path).await.unwrap_or(false);

    if !exists {
        index_manager
            .handle_file_event(path, IndexEventKind::Deleted, None, false, None)
            .await;
        return;
    }

    let Some(key) = canonical_key(vault_root, &path) else {
        return;
    };
    let row = tree.find_by_canonical_path(&key).await.ok().flatten();
    let kind = if row.is_some() {
        IndexEventKind::Modified
    } else {
        IndexEventKind::Created
    };

    let size_bytes = fs.get_size(&path).await.ok();
    let note = match row {
        Some(row) => build_note_document(fs.as_ref(), vault_root, &row, preview_cache)
            .await
            .unwrap_or(None),
        None => None,
    };

    index_manager.handle_file_event(path, kind, size_bytes, true, note).await;
}

/// Resolves `row`'s content from disk and assembles the indexable document.
/// Returns `Ok(None)` for non-note rows or files that vanished between the
/// tree lookup and the read (a benign race, not a failure).
async fn build_note_document<F: FileSystem>(
    fs: &F,
    vault_root: &Path,
    row: &TreeRow,
    preview_cache: &PreviewCache,
) -> Result<Option<NoteDocument>, String> {
    if row.node_type != "note" {
        return Ok(None);
    }

    let path = vault_root.join(&row.display_path);
    let bytes = match fs.read_bytes(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!("note file unreadable for indexing, skipping: {} ({e})", path.display());
            return Ok(None);
        }
    };
    let extension = row.file_extension.as_deref().unwrap_or("");
    let content = notes_search::plaintext_from_bytes(extension, &bytes);

    let mtime = fs.get_mtime(&path).await.map_err(|e| e.to_string())?;
    let last_modified = mtime
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let file_size = bytes.len() as u64;

    let preview = preview_cache.get_or_compute(&row.id, None, None, Some(&content), &row.name, DEFAULT_MAX_PREVIEW_LEN);

    Ok(Some(NoteDocument {
        note_id: row.id.clone(),
        title: row.name.clone(),
        content,
        content_preview: preview,
        category_id: row.parent_id.clone().unwrap_or_default(),
        file_path: path.to_string_lossy().into_owned(),
        last_modified,
        file_size,
        created_date: last_modified,
        usage_count: 0,
        last_accessed: last_modified,
    }))
}

/// Maps an absolute watched path to the lowercased, forward-slash-separated
/// key the tree projection stores as `canonical_path` (itself derived from
/// a `/`-joined `display_path`, never an OS-specific separator).
fn canonical_key(vault_root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(vault_root).ok()?;
    let normalized = relative.to_string_lossy().replace('\\', "/");
    Some(normalized.to_lowercase())
}

async fn reconcile_wal<F: FileSystem>(wal: &WriteAheadLog<F>, fs: &Arc<F>) {
    match wal.replay().await {
        Ok(records) if records.is_empty() => {}
        Ok(records) => {
            warn!("{} pending WAL record(s) found; re-applying", records.len());
            for record in records {
                if let Err(e) = fs.write_bytes(&record.path, &record.content).await {
                    error!("failed to reconcile WAL record for {}: {e}", record.path.display());
                    continue;
                }
                if let Err(e) = wal.remove(record.document_id).await {
                    error!("failed to obsolete reconciled WAL entry for {}: {e}", record.path.display());
                }
            }
        }
        Err(e) => error!("WAL replay failed: {e}"),
    }
}
