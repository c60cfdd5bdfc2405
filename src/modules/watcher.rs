//! Module directory watcher.
//!
//! Every directory under the root gets its own non-recursive watch, added
//! as directories appear. Raw notify events are classified into a small
//! set of actions; writes and late creations go through the debouncer so a
//! half-copied library is never loaded.

use super::debounce::{DEBOUNCE_DELAY, Debouncer};
use super::manager::SharedManager;
use super::module::{clean_path, is_module_file};
use crate::error::RuntimeResult;
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// What a filesystem event means for the module tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    /// Contents changed; reload once things settle.
    Changed(PathBuf),
    /// Something appeared; file or directory is decided by stat.
    Appeared(PathBuf),
    DirCreated(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    /// Rename with no direction; gone or appeared is decided by stat.
    RenamedUnknown(PathBuf),
}

/// Map a notify event onto watch actions.
pub fn classify(event: &Event) -> Vec<WatchAction> {
    let each = |f: fn(PathBuf) -> WatchAction| -> Vec<WatchAction> {
        event.paths.iter().cloned().map(f).collect()
    };

    match event.kind {
        EventKind::Create(CreateKind::Folder) => each(WatchAction::DirCreated),
        EventKind::Create(_) => each(WatchAction::Appeared),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => each(WatchAction::Changed),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![WatchAction::Renamed {
                from: from.clone(),
                to: to.clone(),
            }],
            _ => each(WatchAction::RenamedUnknown),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(WatchAction::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(WatchAction::Appeared),
        EventKind::Modify(ModifyKind::Name(_)) => each(WatchAction::RenamedUnknown),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Metadata(_) | ModifyKind::Any) => {
            each(WatchAction::Changed)
        }
        EventKind::Remove(_) => each(WatchAction::Removed),
        _ => Vec::new(),
    }
}

/// Hand a raw notify result to the watch loop. Returns false once the loop is gone.
fn forward(tx: &mpsc::UnboundedSender<notify::Result<Event>>, res: notify::Result<Event>) -> bool {
    match tx.send(res) {
        Ok(()) => true,
        Err(mpsc::error::SendError(res)) => {
            trace!(event = ?res, "Watch loop closed, dropping event");
            false
        }
    }
}

pub struct ModuleWatcher {
    manager: SharedManager,
    watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    watched: HashSet<PathBuf>,
    debouncer: Debouncer,
}

impl ModuleWatcher {
    /// Must be called from inside a tokio runtime.
    pub fn new(manager: SharedManager) -> RuntimeResult<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                forward(&tx, res);
            },
            Config::default(),
        )?;

        let reload_manager = manager.clone();
        let debouncer = Debouncer::new(Handle::current(), DEBOUNCE_DELAY, move |path: PathBuf| {
            let manager = reload_manager.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = manager.reload(&path) {
                    error!(path = %path.display(), error = %e, "Module reload failed");
                }
            });
        });

        Ok(Self {
            manager,
            watcher,
            events,
            watched: HashSet::new(),
            debouncer,
        })
    }

    /// Watch every directory under the root and create every module found.
    pub async fn initial_scan(&mut self) -> usize {
        let root = self.manager.root().to_path_buf();
        let found = self.watch_tree(&root);
        let count = found.len();

        for path in found {
            let manager = self.manager.clone();
            let result = tokio::task::spawn_blocking(move || manager.create(&path).map_err(|e| (path, e))).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err((path, e))) => error!(path = %path.display(), error = %e, "Module creation failed"),
                Err(e) => error!(error = %e, "Module creation task failed"),
            }
        }

        info!(
            root = %root.display(),
            directories = self.watched.len(),
            modules = count,
            "Initial module scan complete"
        );
        count
    }

    /// Process events until cancelled or the event stream closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Module watcher cancelled");
                    break;
                }
                event = self.events.recv() => {
                    match event {
                        Some(Ok(event)) => {
                            trace!(?event, "Filesystem event");
                            for action in classify(&event) {
                                self.handle(action);
                            }
                        }
                        Some(Err(e)) => error!(error = %e, "Watch error"),
                        None => {
                            warn!("Watch event stream closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle(&mut self, action: WatchAction) {
        match action {
            WatchAction::Changed(path) => self.changed(path),
            WatchAction::Appeared(path) => self.appeared(path),
            WatchAction::DirCreated(path) => self.dir_created(path),
            WatchAction::Removed(path) => self.removed(path),
            WatchAction::Renamed { from, to } => {
                self.removed(from);
                self.appeared(to);
            }
            WatchAction::RenamedUnknown(path) => {
                if path.exists() {
                    self.appeared(path);
                } else {
                    self.removed(path);
                }
            }
        }
    }

    fn ignored(&self, path: &Path) -> bool {
        self.manager.is_mirrored(path)
    }

    fn changed(&mut self, path: PathBuf) {
        if self.ignored(&path) || !is_module_file(&path) {
            return;
        }
        self.debouncer.reset(clean_path(&path));
    }

    fn appeared(&mut self, path: PathBuf) {
        if self.ignored(&path) {
            return;
        }
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => self.dir_created(path),
            Ok(_) => self.changed(path),
            Err(e) => debug!(path = %path.display(), error = %e, "Appeared path is gone"),
        }
    }

    fn dir_created(&mut self, path: PathBuf) {
        if self.ignored(&path) {
            return;
        }
        for module in self.watch_tree(&path) {
            self.debouncer.reset(module);
        }
    }

    fn removed(&mut self, path: PathBuf) {
        if self.ignored(&path) {
            return;
        }
        let path = clean_path(&path);

        let dirs: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|dir| dir.starts_with(&path))
            .cloned()
            .collect();
        for dir in &dirs {
            self.watched.remove(dir);
            // The kernel usually drops the watch on its own.
            if let Err(e) = self.watcher.unwatch(dir) {
                trace!(path = %dir.display(), error = %e, "Unwatch failed");
            }
        }

        let mut gone = self.manager.tracked_under(&path);
        if is_module_file(&path) && !gone.contains(&path) {
            gone.push(path);
        }
        for module in gone {
            let manager = self.manager.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = manager.remove(&module) {
                    error!(path = %module.display(), error = %e, "Module removal failed");
                }
            });
        }
    }

    /// Watch `dir` and every directory below it. Returns module files found.
    fn watch_tree(&mut self, dir: &Path) -> Vec<PathBuf> {
        let mut modules = Vec::new();
        let mut pending = vec![clean_path(dir)];

        while let Some(dir) = pending.pop() {
            if self.ignored(&dir) {
                continue;
            }
            if self.watched.insert(dir.clone()) {
                if let Err(e) = self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                    error!(path = %dir.display(), error = %e, "Failed to watch directory");
                    self.watched.remove(&dir);
                    continue;
                }
                debug!(path = %dir.display(), "Watching directory");
            }

            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Failed to read directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                match entry.file_type() {
                    Ok(kind) if kind.is_dir() => pending.push(path),
                    Ok(_) if is_module_file(&path) => modules.push(path),
                    _ => {}
                }
            }
        }

        modules.sort();
        modules
    }
}

/// Scan the root, then watch it on a background task until `cancel` fires.
pub async fn spawn_watcher(manager: SharedManager, cancel: CancellationToken) -> RuntimeResult<JoinHandle<()>> {
    let mut watcher = ModuleWatcher::new(manager)?;
    watcher.initial_scan().await;
    Ok(tokio::spawn(watcher.run(cancel)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |ev, p| ev.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_forward_after_loop_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let created = event(EventKind::Create(CreateKind::File), &["/m/a.so"]);
        assert!(forward(&tx, Ok(created.clone())));
        assert_eq!(rx.try_recv().unwrap().unwrap(), created);

        drop(rx);
        assert!(!forward(&tx, Ok(created)));
    }

    #[test]
    fn test_classify_writes_and_creates() {
        let write = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/m/a.so"]);
        assert_eq!(classify(&write), vec![WatchAction::Changed("/m/a.so".into())]);

        let close = event(EventKind::Access(AccessKind::Close(AccessMode::Write)), &["/m/a.so"]);
        assert_eq!(classify(&close), vec![WatchAction::Changed("/m/a.so".into())]);

        let create = event(EventKind::Create(CreateKind::File), &["/m/a.so"]);
        assert_eq!(classify(&create), vec![WatchAction::Appeared("/m/a.so".into())]);

        let dir = event(EventKind::Create(CreateKind::Folder), &["/m/sub"]);
        assert_eq!(classify(&dir), vec![WatchAction::DirCreated("/m/sub".into())]);
    }

    #[test]
    fn test_classify_renames() {
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/m/a.so", "/m/b.so"],
        );
        assert_eq!(
            classify(&both),
            vec![WatchAction::Renamed {
                from: "/m/a.so".into(),
                to: "/m/b.so".into()
            }]
        );

        let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/m/a.so"]);
        assert_eq!(classify(&from), vec![WatchAction::Removed("/m/a.so".into())]);

        let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/m/a.so"]);
        assert_eq!(classify(&to), vec![WatchAction::Appeared("/m/a.so".into())]);

        let any = event(EventKind::Modify(ModifyKind::Name(RenameMode::Any)), &["/m/a.so"]);
        assert_eq!(classify(&any), vec![WatchAction::RenamedUnknown("/m/a.so".into())]);
    }

    #[test]
    fn test_classify_remove_and_ignored() {
        let remove = event(EventKind::Remove(RemoveKind::File), &["/m/a.so"]);
        assert_eq!(classify(&remove), vec![WatchAction::Removed("/m/a.so".into())]);

        let open = event(EventKind::Access(AccessKind::Open(AccessMode::Read)), &["/m/a.so"]);
        assert!(classify(&open).is_empty());
    }
}
