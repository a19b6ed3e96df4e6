// Shader hot reload
//
// Watches the directory holding the compiled SPIR-V. The app polls
// `take_changed()` once per frame and rebuilds its pipelines when it
// returns true.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, TryRecvError};

pub struct ShaderWatcher {
    // Kept alive so events keep flowing
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
}

impl ShaderWatcher {
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref();
        let (sender, events) = channel();

        let mut watcher = notify::recommended_watcher(move |event| {
            // The receiver only disappears on shutdown
            let _ = sender.send(event);
        })
        .context("Failed to create shader watcher")?;

        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", directory))?;

        log::info!("Watching {:?} for shader changes", directory);
        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// True if any SPIR-V file changed since the last call.
    pub fn take_changed(&self) -> bool {
        let mut changed = false;
        loop {
            match self.events.try_recv() {
                Ok(Ok(event)) => changed |= is_shader_change(&event),
                Ok(Err(e)) => log::warn!("Shader watcher error: {}", e),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        changed
    }
}

fn is_shader_change(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|path| path.extension().is_some_and(|ext| ext == "spv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};
    use std::path::PathBuf;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_spirv_write_is_a_change() {
        let kind = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert!(is_shader_change(&event(kind, "shaders/shader.frag.spv")));
        let kind = EventKind::Create(CreateKind::File);
        assert!(is_shader_change(&event(kind, "shaders/shader.vert.spv")));
    }

    #[test]
    fn test_source_and_other_files_are_ignored() {
        let kind = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert!(!is_shader_change(&event(kind, "shaders/shader.frag")));
        assert!(!is_shader_change(&event(kind, "shaders/notes.txt")));
    }

    #[test]
    fn test_reads_and_removals_are_ignored() {
        let kind = EventKind::Access(AccessKind::Any);
        assert!(!is_shader_change(&event(kind, "shaders/shader.frag.spv")));
        let kind = EventKind::Remove(RemoveKind::File);
        assert!(!is_shader_change(&event(kind, "shaders/shader.frag.spv")));
    }
}
