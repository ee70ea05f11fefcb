//! Observers that get told what happens to an archive.
//!
//! Extensions can't change the archive while they're being notified
//! (they only get a shared reference), but each hook can hand back an
//! [`ExtensionAction`] to run once notification is over.
//! Actions run in the order they were returned, after the outermost
//! notification finishes, even if they set off notifications of their own.

use std::collections::VecDeque;
use std::fmt;
use std::mem;

use log::*;

use crate::archive::ZipArchive;
use crate::entry::ArchiveEntry;
use crate::result::*;

/// Work an extension wants done to the archive after a notification.
pub type ExtensionAction = Box<dyn FnOnce(&mut ZipArchive) -> ZipResult<()>>;

/// What a hook returns: maybe an action to run later.
pub type HookResult = ZipResult<Option<ExtensionAction>>;

/// Hooks into an archive's lifecycle. Every hook does nothing by default.
pub trait ArchiveExtension {
    /// The archive's file was opened (or reopened) for writing.
    fn open(&mut self, _archive: &ZipArchive) -> HookResult {
        Ok(None)
    }

    /// An update is about to start.
    /// Entries added or deleted by the returned action are part of it.
    fn before_update(&mut self, _archive: &ZipArchive) -> HookResult {
        Ok(None)
    }

    /// All entries were written, and the central directory is about to be.
    fn entries_written(&mut self, _archive: &ZipArchive) -> HookResult {
        Ok(None)
    }

    /// The update finished.
    fn updated(&mut self, _archive: &ZipArchive) -> HookResult {
        Ok(None)
    }

    /// The archive was closed.
    fn closed(&mut self, _archive: &ZipArchive) {}

    /// `entry` was added, replacing `replaced` if it had the same name.
    fn added(
        &mut self,
        _archive: &ZipArchive,
        _entry: &ArchiveEntry,
        _replaced: Option<&ArchiveEntry>,
    ) -> HookResult {
        Ok(None)
    }

    /// `entry` was deleted.
    fn removed(&mut self, _archive: &ZipArchive, _entry: &ArchiveEntry) -> HookResult {
        Ok(None)
    }
}

/// Identifies an extension added to an archive, so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionId(u64);

/// Which hook to call.
///
/// Added entries are named rather than borrowed, since they live in the
/// archive and we look them up once it's handed to the hooks.
pub(crate) enum Event<'a> {
    Open,
    BeforeUpdate,
    EntriesWritten,
    Updated,
    Closed,
    Added {
        name: &'a str,
        replaced: Option<&'a ArchiveEntry>,
    },
    Removed(&'a ArchiveEntry),
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Open => f.write_str("open"),
            Event::BeforeUpdate => f.write_str("before update"),
            Event::EntriesWritten => f.write_str("entries written"),
            Event::Updated => f.write_str("updated"),
            Event::Closed => f.write_str("closed"),
            Event::Added { name, .. } => write!(f, "added {}", name),
            Event::Removed(e) => write!(f, "removed {}", e.name()),
        }
    }
}

type Registered = Vec<(ExtensionId, Box<dyn ArchiveExtension>)>;

/// Owns an archive's extensions and the actions they've queued up.
#[derive(Default)]
pub(crate) struct ExtensionDispatcher {
    extensions: Registered,
    next_id: u64,
    dispatching: bool,
    queue: VecDeque<ExtensionAction>,
}

impl fmt::Debug for ExtensionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDispatcher")
            .field("extensions", &self.extensions.len())
            .field("dispatching", &self.dispatching)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl ExtensionDispatcher {
    pub fn add(&mut self, extension: Box<dyn ArchiveExtension>) -> ExtensionId {
        let id = ExtensionId(self.next_id);
        self.next_id += 1;
        self.extensions.push((id, extension));
        id
    }

    pub fn remove(&mut self, id: ExtensionId) -> bool {
        let before = self.extensions.len();
        self.extensions.retain(|(i, _)| *i != id);
        before != self.extensions.len()
    }

    /// Takes the extensions out so they can be called with the archive
    /// borrowed. Extensions added in the meantime are kept.
    pub fn take(&mut self) -> Registered {
        mem::take(&mut self.extensions)
    }

    pub fn restore(&mut self, mut taken: Registered) {
        taken.append(&mut self.extensions);
        self.extensions = taken;
    }

    /// Calls `event`'s hook on each of `extensions`, queueing whatever they return.
    pub fn call(
        extensions: &mut Registered,
        archive: &ZipArchive,
        event: &Event<'_>,
        queue: &mut Vec<ExtensionAction>,
    ) -> ZipResult<()> {
        trace!("Notifying {} extension(s): {:?}", extensions.len(), event);
        for (_, ext) in extensions.iter_mut() {
            let action = match event {
                Event::Open => ext.open(archive)?,
                Event::BeforeUpdate => ext.before_update(archive)?,
                Event::EntriesWritten => ext.entries_written(archive)?,
                Event::Updated => ext.updated(archive)?,
                Event::Closed => {
                    ext.closed(archive);
                    None
                }
                Event::Added { name, replaced } => match archive.get(name) {
                    Some(entry) => ext.added(archive, entry, *replaced)?,
                    None => None,
                },
                Event::Removed(entry) => ext.removed(archive, entry)?,
            };
            queue.extend(action);
        }
        Ok(())
    }

    pub fn enqueue(&mut self, actions: Vec<ExtensionAction>) {
        self.queue.extend(actions);
    }

    /// Starts running queued actions, unless somebody up the stack already is.
    /// Returns false if they are.
    pub fn begin_dispatch(&mut self) -> bool {
        if self.dispatching {
            return false;
        }
        self.dispatching = true;
        true
    }

    pub fn next_action(&mut self) -> Option<ExtensionAction> {
        self.queue.pop_front()
    }

    pub fn end_dispatch(&mut self) {
        self.dispatching = false;
    }

    /// Drops queued actions after one of them failed.
    pub fn abort_dispatch(&mut self) {
        if !self.queue.is_empty() {
            debug!("Dropping {} queued extension action(s)", self.queue.len());
        }
        self.queue.clear();
        self.dispatching = false;
    }
}
