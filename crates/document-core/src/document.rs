//! The document facade.
//!
//! [`TextDocument`] ties the text buffer, the line index, the anchor tree, the line trackers, the
//! version history and the undo stack together. Every edit goes through [`TextDocument::replace`]
//! (or one of its wrappers) and runs the same pipeline:
//!
//! 1. validate the request; nothing is touched if it is invalid
//! 2. open an update and notify `changing` subscribers
//! 3. record the change in the undo stack
//! 4. mutate the buffer and let the line manager fix the line index (trackers follow)
//! 5. append the change to the version history and publish the new snapshot state
//! 6. move anchors, then raise deferred anchor deletions
//! 7. notify `changed` subscribers and close the update
//!
//! # Ownership
//!
//! A document belongs to one thread, by default the one that created it. Mutations and
//! position queries check the caller and fail with [`DocumentError::WrongThread`] otherwise.
//! Ownership can be handed over with [`TextDocument::set_owner_thread`]. The only operation meant
//! for other threads is taking snapshots through a [`SnapshotProvider`].
//!
//! # Example
//!
//! ```rust
//! use document_core::{AnchorMovementType, TextDocument};
//!
//! let mut doc = TextDocument::new("hello world");
//! let anchor = doc.create_anchor(6).unwrap();
//! anchor.set_movement_type(AnchorMovementType::AfterInsertion);
//!
//! doc.insert(6, "big ").unwrap();
//! assert_eq!(doc.anchor_offset(&anchor).unwrap(), 10);
//!
//! doc.undo().unwrap();
//! assert_eq!(&*doc.text().unwrap(), "hello world");
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use ropey::Rope;
use tracing::{debug, trace};

use crate::anchor::{AnchorTree, TextAnchor};
use crate::change::DocumentChange;
use crate::error::{DocumentError, Result};
use crate::height_tree::HeightTree;
use crate::line_manager::{LineManager, LineTracker, LineTrackerToken, LineTrackers};
use crate::line_tree::{DocumentLine, LineId, LineTree, TextLocation};
use crate::offset_map::{AnchorMovementType, OffsetChangeMap, OffsetChangeMappingType};
use crate::text::{TextBuffer, TextSnapshot, TextSource, check_offset, check_range, materialize};
use crate::undo::UndoStack;
use crate::version::{Version, VersionProvider};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Construction options of a [`TextDocument`].
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOptions {
    /// Maximum number of undo groups; `None` keeps the whole history.
    pub undo_size_limit: Option<usize>,
    /// Line height used by [`TextDocument::add_height_tree_with_default`].
    pub default_line_height: f64,
    /// Whether changes are appended to a version history.
    pub track_versions: bool,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            undo_size_limit: None,
            default_line_height: 16.0,
            track_versions: true,
        }
    }
}

impl DocumentOptions {
    /// Limit the undo history to `limit` groups.
    pub fn with_undo_size_limit(mut self, limit: usize) -> Self {
        self.undo_size_limit = Some(limit);
        self
    }

    /// Set the default line height for height trees.
    pub fn with_default_line_height(mut self, height: f64) -> Self {
        self.default_line_height = height;
        self
    }

    /// Enable or disable the version history.
    pub fn with_track_versions(mut self, track_versions: bool) -> Self {
        self.track_versions = track_versions;
        self
    }
}

/// Handle returned by the `subscribe_*` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Handler for `changing` and `changed`.
pub type ChangeHandler = Box<dyn FnMut(&mut TextDocument, &DocumentChange) + Send>;

/// Handler for `text_changed`, `update_started` and `update_finished`.
pub type DocumentHandler = Box<dyn FnMut(&mut TextDocument) + Send>;

#[derive(Debug, Clone, Copy)]
enum ChangeEvent {
    Changing,
    Changed,
}

#[derive(Debug, Clone, Copy)]
enum DocumentEvent {
    TextChanged,
    UpdateStarted,
    UpdateFinished,
}

type Subscribers<H> = Vec<(SubscriptionToken, H)>;

#[derive(Default)]
struct DocumentEvents {
    changing: Subscribers<ChangeHandler>,
    changed: Subscribers<ChangeHandler>,
    text_changed: Subscribers<DocumentHandler>,
    update_started: Subscribers<DocumentHandler>,
    update_finished: Subscribers<DocumentHandler>,
    next_token: u64,
    dispatch_depth: usize,
    /// Tokens unsubscribed while their handler was taken out for dispatch.
    pending_removals: Vec<SubscriptionToken>,
}

impl DocumentEvents {
    fn change_list(&mut self, event: ChangeEvent) -> &mut Subscribers<ChangeHandler> {
        match event {
            ChangeEvent::Changing => &mut self.changing,
            ChangeEvent::Changed => &mut self.changed,
        }
    }

    fn document_list(&mut self, event: DocumentEvent) -> &mut Subscribers<DocumentHandler> {
        match event {
            DocumentEvent::TextChanged => &mut self.text_changed,
            DocumentEvent::UpdateStarted => &mut self.update_started,
            DocumentEvent::UpdateFinished => &mut self.update_finished,
        }
    }

    fn next_token(&mut self) -> SubscriptionToken {
        self.next_token += 1;
        SubscriptionToken(self.next_token)
    }

    fn remove(&mut self, token: SubscriptionToken) -> bool {
        fn remove_from<H>(list: &mut Subscribers<H>, token: SubscriptionToken) -> bool {
            let before = list.len();
            list.retain(|(t, _)| *t != token);
            list.len() != before
        }
        remove_from(&mut self.changing, token)
            || remove_from(&mut self.changed, token)
            || remove_from(&mut self.text_changed, token)
            || remove_from(&mut self.update_started, token)
            || remove_from(&mut self.update_finished, token)
    }

    fn finish_dispatch(&mut self) {
        self.dispatch_depth -= 1;
        if self.dispatch_depth == 0 {
            self.pending_removals.clear();
        }
    }
}

/// Put dispatched handlers back in front of the ones subscribed meanwhile, dropping the ones
/// unsubscribed meanwhile.
fn restore_handlers<H>(
    list: &mut Subscribers<H>,
    mut dispatched: Subscribers<H>,
    pending_removals: &mut Vec<SubscriptionToken>,
) {
    if !pending_removals.is_empty() {
        dispatched.retain(|(token, _)| {
            let removed = pending_removals.contains(token);
            if removed {
                pending_removals.retain(|t| t != token);
            }
            !removed
        });
    }
    dispatched.append(list);
    *list = dispatched;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeState {
    Idle,
    /// A change is being applied; nested mutations are rejected.
    Changing,
}

/// State shared with [`SnapshotProvider`]s on other threads.
#[derive(Debug)]
struct PublishedState {
    rope: Rope,
    version: Option<Version>,
    owner: Option<ThreadId>,
}

/// Thread-safe handle for taking snapshots of a document from any thread.
#[derive(Debug, Clone)]
pub struct SnapshotProvider {
    published: Arc<Mutex<PublishedState>>,
}

impl SnapshotProvider {
    /// The text as of the last completed change.
    pub fn create_snapshot(&self) -> TextSnapshot {
        let published = self.published.lock();
        TextSnapshot::new(published.rope.clone(), published.version.clone())
    }

    /// The version of the last completed change, if versions are tracked.
    pub fn version(&self) -> Option<Version> {
        self.published.lock().version.clone()
    }

    /// The thread currently owning the document.
    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.published.lock().owner
    }
}

/// A text document with line index, anchors, versions and undo history.
pub struct TextDocument {
    id: u64,
    options: DocumentOptions,
    buffer: TextBuffer,
    lines: LineTree,
    trackers: LineTrackers,
    anchors: AnchorTree,
    versions: Option<VersionProvider>,
    undo_stack: UndoStack,
    owner: Option<ThreadId>,
    published: Arc<Mutex<PublishedState>>,
    update_depth: usize,
    state: ChangeState,
    fire_text_changed: bool,
    events: DocumentEvents,
}

impl Default for TextDocument {
    fn default() -> Self {
        Self::new("")
    }
}

impl fmt::Debug for TextDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextDocument")
            .field("id", &self.id)
            .field("text_length", &self.buffer.text_length())
            .field("line_count", &self.lines.line_count())
            .field("update_depth", &self.update_depth)
            .field("trackers", &self.trackers)
            .finish()
    }
}

impl TextDocument {
    /// Create a document holding `text`, owned by the current thread.
    pub fn new(text: &str) -> Self {
        Self::with_options(text, DocumentOptions::default())
    }

    /// Create a document with explicit options.
    pub fn with_options(text: &str, options: DocumentOptions) -> Self {
        let id = NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed);
        let buffer = TextBuffer::new(text);
        let mut lines = LineTree::new();
        let mut trackers = LineTrackers::default();
        LineManager::new(&mut lines, buffer.rope(), &mut trackers).rebuild();
        let versions = options.track_versions.then(VersionProvider::new);
        let undo_stack = match options.undo_size_limit {
            Some(limit) => UndoStack::with_size_limit(limit),
            None => UndoStack::new(),
        };
        let owner = Some(thread::current().id());
        let published = Arc::new(Mutex::new(PublishedState {
            rope: buffer.rope().clone(),
            version: versions.as_ref().map(|v| v.current_version().clone()),
            owner,
        }));
        debug!(
            document = id,
            length = buffer.text_length(),
            lines = lines.line_count(),
            "document created"
        );
        Self {
            id,
            options,
            buffer,
            lines,
            trackers,
            anchors: AnchorTree::new(id),
            versions,
            undo_stack,
            owner,
            published,
            update_depth: 0,
            state: ChangeState::Idle,
            fire_text_changed: false,
            events: DocumentEvents::default(),
        }
    }

    /// The options the document was created with.
    pub fn options(&self) -> &DocumentOptions {
        &self.options
    }

    /// The thread allowed to use the document; `None` if any thread may.
    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Hand the document over to `owner`. Only the current owner may do this, unless the
    /// document is unowned.
    pub fn set_owner_thread(&mut self, owner: Option<ThreadId>) -> Result<()> {
        self.verify_access()?;
        self.published.lock().owner = owner;
        self.owner = owner;
        debug!(document = self.id, ?owner, "document ownership transferred");
        Ok(())
    }

    /// Fail with [`DocumentError::WrongThread`] unless called from the owning thread.
    pub fn verify_access(&self) -> Result<()> {
        if self.check_access() {
            Ok(())
        } else {
            Err(DocumentError::WrongThread)
        }
    }

    /// `true` if the current thread may use the document.
    pub fn check_access(&self) -> bool {
        self.owner.is_none_or(|owner| owner == thread::current().id())
    }

    /// The whole text.
    pub fn text(&self) -> Result<Arc<str>> {
        self.verify_access()?;
        self.buffer.text()
    }

    /// Replace the whole text.
    pub fn set_text(&mut self, text: &str) -> Result<()> {
        let length = self.buffer.text_length();
        self.replace(0, length, text)
    }

    /// Length in characters.
    pub fn text_length(&self) -> usize {
        debug_assert!(self.check_access(), "document accessed from a foreign thread");
        self.buffer.text_length()
    }

    /// Number of lines; always at least 1.
    pub fn line_count(&self) -> usize {
        debug_assert!(self.check_access(), "document accessed from a foreign thread");
        self.lines.line_count()
    }

    /// Character at `offset`.
    pub fn char_at(&self, offset: usize) -> Result<char> {
        self.verify_access()?;
        TextSource::char_at(&self.buffer, offset)
    }

    /// Copy `length` characters starting at `offset`.
    pub fn get_text(&self, offset: usize, length: usize) -> Result<String> {
        self.verify_access()?;
        self.buffer.text_range(offset, length)
    }

    /// The latest version, if versions are tracked.
    pub fn version(&self) -> Option<Version> {
        self.versions
            .as_ref()
            .map(|versions| versions.current_version().clone())
    }

    /// Immutable copy of the current text.
    pub fn create_snapshot(&self) -> Result<TextSnapshot> {
        self.verify_access()?;
        Ok(self.buffer.snapshot(self.version()))
    }

    /// A handle other threads can take snapshots through.
    pub fn snapshot_provider(&self) -> SnapshotProvider {
        SnapshotProvider {
            published: Arc::clone(&self.published),
        }
    }

    /// The line index.
    pub fn line_tree(&self) -> &LineTree {
        &self.lines
    }

    /// Line by 1-based number.
    pub fn get_line_by_number(&self, number: usize) -> Result<DocumentLine<'_>> {
        self.verify_access()?;
        self.lines.get_by_number(number)
    }

    /// Line containing `offset`; the document end belongs to the last line.
    pub fn get_line_by_offset(&self, offset: usize) -> Result<DocumentLine<'_>> {
        self.verify_access()?;
        self.lines.get_by_offset(offset)
    }

    /// View of a line by id, `None` if it was deleted.
    pub fn line(&self, id: LineId) -> Option<DocumentLine<'_>> {
        self.lines.line(id)
    }

    /// All lines in document order.
    pub fn lines(&self) -> impl Iterator<Item = DocumentLine<'_>> + '_ {
        self.lines.lines()
    }

    /// Offset of the 1-based `(line, column)`, with the column clamped to the line.
    pub fn get_offset(&self, line: usize, column: usize) -> Result<usize> {
        self.verify_access()?;
        self.lines.get_offset(line, column)
    }

    /// Offset of a [`TextLocation`].
    pub fn get_offset_of(&self, location: TextLocation) -> Result<usize> {
        self.get_offset(location.line, location.column)
    }

    /// 1-based `(line, column)` of `offset`.
    pub fn get_location(&self, offset: usize) -> Result<TextLocation> {
        self.verify_access()?;
        self.lines.get_location(offset)
    }

    /// Register a line tracker. It is immediately brought in sync through
    /// [`LineTracker::rebuild_document`].
    pub fn add_line_tracker(&mut self, mut tracker: Box<dyn LineTracker>) -> Result<LineTrackerToken> {
        self.verify_access()?;
        self.ensure_idle()?;
        tracker.rebuild_document(&self.lines);
        Ok(self.trackers.add(tracker))
    }

    /// Unregister a line tracker and hand it back.
    pub fn remove_line_tracker(
        &mut self,
        token: LineTrackerToken,
    ) -> Result<Option<Box<dyn LineTracker>>> {
        self.verify_access()?;
        self.ensure_idle()?;
        Ok(self.trackers.remove(token))
    }

    /// First registered tracker of type `T`.
    pub fn line_tracker<T: LineTracker>(&self) -> Option<&T> {
        self.trackers.get::<T>()
    }

    /// First registered tracker of type `T`, mutably.
    pub fn line_tracker_mut<T: LineTracker>(&mut self) -> Option<&mut T> {
        self.trackers.get_mut::<T>()
    }

    /// Tracker registered under `token`, if it has type `T`.
    pub fn line_tracker_by_token<T: LineTracker>(&self, token: LineTrackerToken) -> Option<&T> {
        self.trackers.get_by_token::<T>(token)
    }

    /// Tracker registered under `token`, mutably, if it has type `T`.
    pub fn line_tracker_by_token_mut<T: LineTracker>(
        &mut self,
        token: LineTrackerToken,
    ) -> Option<&mut T> {
        self.trackers.get_by_token_mut::<T>(token)
    }

    /// Register a [`HeightTree`] kept in sync with the lines of this document.
    pub fn add_height_tree(&mut self, default_line_height: f64) -> Result<LineTrackerToken> {
        let tree = HeightTree::new(self.lines.line_count(), default_line_height);
        self.add_line_tracker(Box::new(tree))
    }

    /// [`add_height_tree`](Self::add_height_tree) with the configured default line height.
    pub fn add_height_tree_with_default(&mut self) -> Result<LineTrackerToken> {
        self.add_height_tree(self.options.default_line_height)
    }

    /// The first registered height tree.
    pub fn height_tree(&self) -> Option<&HeightTree> {
        self.line_tracker::<HeightTree>()
    }

    /// The first registered height tree, mutably.
    pub fn height_tree_mut(&mut self) -> Option<&mut HeightTree> {
        self.line_tracker_mut::<HeightTree>()
    }

    /// Create an anchor at `offset` (`0..=text_length`).
    pub fn create_anchor(&mut self, offset: usize) -> Result<TextAnchor> {
        self.verify_access()?;
        check_offset(offset, self.buffer.text_length())?;
        Ok(self.anchors.create_anchor(offset))
    }

    /// Current offset of `anchor`.
    pub fn anchor_offset(&self, anchor: &TextAnchor) -> Result<usize> {
        self.verify_access()?;
        if anchor.document_id() != self.id {
            return Err(DocumentError::ForeignAnchor);
        }
        self.anchors
            .offset_of(anchor)
            .ok_or(DocumentError::AnchorDeleted)
    }

    /// Current location of `anchor`.
    pub fn anchor_location(&self, anchor: &TextAnchor) -> Result<TextLocation> {
        let offset = self.anchor_offset(anchor)?;
        self.lines.get_location(offset)
    }

    /// Line `anchor` is on.
    pub fn anchor_line(&self, anchor: &TextAnchor) -> Result<LineId> {
        let offset = self.anchor_offset(anchor)?;
        Ok(self.lines.get_by_offset(offset)?.id())
    }

    /// Number of anchor tree nodes, including dropped anchors that were not purged yet.
    pub fn anchor_node_count(&self) -> usize {
        self.anchors.node_count()
    }

    /// Called before each change is applied.
    pub fn subscribe_changing<F>(&mut self, handler: F) -> SubscriptionToken
    where
        F: FnMut(&mut TextDocument, &DocumentChange) + Send + 'static,
    {
        let token = self.events.next_token();
        self.events.changing.push((token, Box::new(handler)));
        token
    }

    /// Called after each change, when every structure is consistent.
    pub fn subscribe_changed<F>(&mut self, handler: F) -> SubscriptionToken
    where
        F: FnMut(&mut TextDocument, &DocumentChange) + Send + 'static,
    {
        let token = self.events.next_token();
        self.events.changed.push((token, Box::new(handler)));
        token
    }

    /// Called once at the end of an outermost update that changed the text.
    pub fn subscribe_text_changed<F>(&mut self, handler: F) -> SubscriptionToken
    where
        F: FnMut(&mut TextDocument) + Send + 'static,
    {
        let token = self.events.next_token();
        self.events.text_changed.push((token, Box::new(handler)));
        token
    }

    /// Called when an outermost update begins.
    pub fn subscribe_update_started<F>(&mut self, handler: F) -> SubscriptionToken
    where
        F: FnMut(&mut TextDocument) + Send + 'static,
    {
        let token = self.events.next_token();
        self.events.update_started.push((token, Box::new(handler)));
        token
    }

    /// Called when an outermost update ends.
    pub fn subscribe_update_finished<F>(&mut self, handler: F) -> SubscriptionToken
    where
        F: FnMut(&mut TextDocument) + Send + 'static,
    {
        let token = self.events.next_token();
        self.events.update_finished.push((token, Box::new(handler)));
        token
    }

    /// Remove a handler. Returns `false` if the token is unknown.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        if self.events.remove(token) {
            return true;
        }
        if self.events.dispatch_depth > 0 && token.0 <= self.events.next_token {
            self.events.pending_removals.push(token);
            return true;
        }
        false
    }

    fn fire_change_event(&mut self, event: ChangeEvent, change: &DocumentChange) {
        let mut handlers = std::mem::take(self.events.change_list(event));
        if handlers.is_empty() {
            return;
        }
        self.events.dispatch_depth += 1;
        for (_, handler) in handlers.iter_mut() {
            handler(self, change);
        }
        let events = &mut self.events;
        let list = match event {
            ChangeEvent::Changing => &mut events.changing,
            ChangeEvent::Changed => &mut events.changed,
        };
        restore_handlers(list, handlers, &mut events.pending_removals);
        events.finish_dispatch();
    }

    fn fire_document_event(&mut self, event: DocumentEvent) {
        let mut handlers = std::mem::take(self.events.document_list(event));
        if handlers.is_empty() {
            return;
        }
        self.events.dispatch_depth += 1;
        for (_, handler) in handlers.iter_mut() {
            handler(self);
        }
        let events = &mut self.events;
        let list = match event {
            DocumentEvent::TextChanged => &mut events.text_changed,
            DocumentEvent::UpdateStarted => &mut events.update_started,
            DocumentEvent::UpdateFinished => &mut events.update_finished,
        };
        restore_handlers(list, handlers, &mut events.pending_removals);
        events.finish_dispatch();
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state {
            ChangeState::Idle => Ok(()),
            ChangeState::Changing => Err(DocumentError::ReentrantChange),
        }
    }

    /// `true` between an outermost [`begin_update`](Self::begin_update) and its
    /// [`end_update`](Self::end_update).
    pub fn is_in_update(&self) -> bool {
        self.update_depth > 0
    }

    /// Open an update. Updates nest; the outermost one forms one undo group and fires
    /// `text_changed` at most once.
    pub fn begin_update(&mut self) -> Result<()> {
        self.verify_access()?;
        self.ensure_idle()?;
        self.update_depth += 1;
        if self.update_depth == 1 {
            self.undo_stack.start_undo_group();
            trace!(document = self.id, "update started");
            self.fire_document_event(DocumentEvent::UpdateStarted);
        }
        Ok(())
    }

    /// Close the innermost update.
    pub fn end_update(&mut self) -> Result<()> {
        self.verify_access()?;
        if self.state == ChangeState::Changing {
            return Err(DocumentError::EndUpdateDuringChange);
        }
        match self.update_depth {
            0 => Err(DocumentError::NoActiveUpdate),
            1 => {
                // Handlers may edit again; keep firing until the text settles.
                while self.fire_text_changed {
                    self.fire_text_changed = false;
                    self.fire_document_event(DocumentEvent::TextChanged);
                }
                // Every outermost update opened a group.
                let closed = self.undo_stack.end_undo_group();
                self.update_depth = 0;
                trace!(document = self.id, "update finished");
                self.fire_document_event(DocumentEvent::UpdateFinished);
                closed
            }
            _ => {
                self.update_depth -= 1;
                Ok(())
            }
        }
    }

    /// Run `f` inside an update.
    pub fn run_update<R>(&mut self, f: impl FnOnce(&mut TextDocument) -> R) -> Result<R> {
        self.begin_update()?;
        let value = f(self);
        self.end_update()?;
        Ok(value)
    }

    /// Insert `text` at `offset`.
    pub fn insert(&mut self, offset: usize, text: &str) -> Result<()> {
        self.replace(offset, 0, text)
    }

    /// Insert `text` at `offset`, moving anchors at `offset` according to `movement` unless they
    /// have their own movement type.
    pub fn insert_with_movement(
        &mut self,
        offset: usize,
        text: &str,
        movement: AnchorMovementType,
    ) -> Result<()> {
        let mapping = match movement {
            AnchorMovementType::BeforeInsertion => OffsetChangeMappingType::KeepAnchorBeforeInsertion,
            AnchorMovementType::Default | AnchorMovementType::AfterInsertion => {
                OffsetChangeMappingType::Normal
            }
        };
        self.replace_with_mapping(offset, 0, text, mapping)
    }

    /// Remove `length` characters at `offset`.
    pub fn remove(&mut self, offset: usize, length: usize) -> Result<()> {
        self.replace(offset, length, "")
    }

    /// Replace `length` characters at `offset` with `text`.
    pub fn replace(&mut self, offset: usize, length: usize, text: &str) -> Result<()> {
        self.replace_with_map(offset, length, text, None)
    }

    /// Replace using a predefined offset mapping.
    pub fn replace_with_mapping(
        &mut self,
        offset: usize,
        length: usize,
        text: &str,
        mapping: OffsetChangeMappingType,
    ) -> Result<()> {
        self.verify_access()?;
        check_range(offset, length, self.buffer.text_length())?;
        let map = match mapping {
            OffsetChangeMappingType::Normal => None,
            mapping => Some(OffsetChangeMap::for_mapping_type(
                mapping,
                offset,
                length,
                text.chars().count(),
            )),
        };
        self.replace_with_map(offset, length, text, map)
    }

    /// Replace with an explicit offset map, which must describe exactly this change.
    pub fn replace_with_map(
        &mut self,
        offset: usize,
        length: usize,
        text: &str,
        map: Option<OffsetChangeMap>,
    ) -> Result<()> {
        self.verify_access()?;
        self.ensure_idle()?;
        check_range(offset, length, self.buffer.text_length())?;
        if let Some(map) = &map {
            map.validate(offset, length, text.chars().count())?;
        }

        self.begin_update()?;
        self.state = ChangeState::Changing;
        let applied = self.do_replace(offset, length, text, map);
        self.state = ChangeState::Idle;
        let ended = self.end_update();
        applied.and(ended)
    }

    fn do_replace(
        &mut self,
        offset: usize,
        length: usize,
        text: &str,
        map: Option<OffsetChangeMap>,
    ) -> Result<()> {
        let insertion_length = text.chars().count();
        if length == 0 && insertion_length == 0 {
            return Ok(());
        }
        // Replacing a single character keeps every anchor in place.
        let map = match map {
            None if length == 1 && insertion_length == 1 => Some(OffsetChangeMap::new()),
            map => map,
        };
        let removed = Rope::from(self.buffer.rope().slice(offset..offset + length));
        let change = Arc::new(DocumentChange::new(
            offset,
            removed,
            Rope::from_str(text),
            map,
        )?);

        self.fire_change_event(ChangeEvent::Changing, &change);
        self.undo_stack.push(Arc::clone(&change));
        self.fire_text_changed = true;
        trace!(document = self.id, offset, length, insertion_length, "replace");

        self.lines.reclaim_deleted();
        if offset == 0 && length == self.buffer.text_length() {
            self.buffer.set_text(text);
            LineManager::new(&mut self.lines, self.buffer.rope(), &mut self.trackers).rebuild();
            debug!(
                document = self.id,
                lines = self.lines.line_count(),
                "line index rebuilt"
            );
        } else {
            self.buffer.remove_unchecked(offset, length);
            LineManager::new(&mut self.lines, self.buffer.rope(), &mut self.trackers)
                .remove(offset, length);
            self.buffer.insert_unchecked(offset, text);
            LineManager::new(&mut self.lines, self.buffer.rope(), &mut self.trackers)
                .insert(offset, text);
        }
        #[cfg(debug_assertions)]
        self.lines.check_invariants();
        debug_assert_eq!(self.lines.text_length(), self.buffer.text_length());

        if let Some(versions) = &mut self.versions {
            versions.append_change(Arc::clone(&change));
        }
        self.publish();

        let mut deleted_anchors = Vec::new();
        match change.offset_change_map() {
            Some(map) => {
                for entry in map.entries() {
                    self.anchors.handle_text_change(entry, &mut deleted_anchors);
                }
            }
            None => self
                .anchors
                .handle_text_change(&change.single_entry(), &mut deleted_anchors),
        }
        self.trackers.change_complete(&change);

        for anchor in &deleted_anchors {
            anchor.raise_deleted();
        }
        self.fire_change_event(ChangeEvent::Changed, &change);
        Ok(())
    }

    fn publish(&self) {
        let mut published = self.published.lock();
        published.rope = self.buffer.rope().clone();
        published.version = self.version();
    }

    /// The undo history.
    pub fn undo_stack(&self) -> &UndoStack {
        &self.undo_stack
    }

    /// The undo history, mutably (for grouping and the original-file marker).
    pub fn undo_stack_mut(&mut self) -> &mut UndoStack {
        &mut self.undo_stack
    }

    /// `true` if there is a group to undo.
    pub fn can_undo(&self) -> bool {
        self.undo_stack.can_undo()
    }

    /// `true` if there is a group to redo.
    pub fn can_redo(&self) -> bool {
        self.undo_stack.can_redo()
    }

    /// Revert the newest undo group.
    pub fn undo(&mut self) -> Result<()> {
        self.verify_access()?;
        self.ensure_idle()?;
        let group = self.undo_stack.begin_undo()?;
        if let Err(err) = self.begin_update() {
            self.undo_stack.finish_undo(group);
            return Err(err);
        }
        let mut applied = Ok(());
        for change in group.changes().iter().rev() {
            applied = self.apply_change(&change.invert());
            if applied.is_err() {
                break;
            }
        }
        self.undo_stack.finish_undo(group);
        let ended = self.end_update();
        applied.and(ended)
    }

    /// Reapply the newest undone group.
    pub fn redo(&mut self) -> Result<()> {
        self.verify_access()?;
        self.ensure_idle()?;
        let group = self.undo_stack.begin_redo()?;
        if let Err(err) = self.begin_update() {
            self.undo_stack.finish_redo(group);
            return Err(err);
        }
        let mut applied = Ok(());
        for change in group.changes() {
            applied = self.apply_change(change);
            if applied.is_err() {
                break;
            }
        }
        self.undo_stack.finish_redo(group);
        let ended = self.end_update();
        applied.and(ended)
    }

    fn apply_change(&mut self, change: &DocumentChange) -> Result<()> {
        let text = materialize(change.inserted_text().slice(..))?;
        self.replace_with_map(
            change.offset(),
            change.removal_length(),
            &text,
            change.offset_change_map().cloned(),
        )
    }
}

impl TextSource for TextDocument {
    fn rope(&self) -> &Rope {
        self.buffer.rope()
    }

    fn text(&self) -> Result<Arc<str>> {
        TextDocument::text(self)
    }
}
