use serde_json::Value;

use crate::message::{ApiMessage, Message, Role};
use crate::response::Response;

/// Typed index into a chat's entry arena.
///
/// Ids stay valid until the next `Chat::clear()`, which resets the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

/// One prompt/response pair in the conversation tree.
///
/// Structural links (parent, position among siblings) are fixed at creation;
/// only the response and the prompt's role/content mutate afterwards.
#[derive(Debug, Clone)]
pub struct ChatEntry {
    prompt: Message,
    response: Response,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
}

impl ChatEntry {
    fn new(prompt: Message, response: Response, parent: Option<EntryId>) -> Self {
        Self {
            prompt,
            response,
            parent,
            children: Vec::new(),
        }
    }

    pub fn prompt(&self) -> &Message {
        &self.prompt
    }

    /// Edits the prompt text prior to submission.
    pub fn set_prompt_content(&mut self, content: impl Into<String>) {
        self.prompt.content = content.into();
    }

    pub fn set_prompt_role(&mut self, role: Role) {
        self.prompt.role = role;
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Attaches the API result once the submission completes.
    pub fn set_response(&mut self, response: Response) {
        self.response = response;
    }

    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True when both prompt and response still hold their sentinels.
    pub fn is_default_content(&self) -> bool {
        self.prompt.is_default() && self.response.is_default()
    }
}

/// A branching conversation history.
///
/// Entries live in an arena indexed by [`EntryId`]; the parent owns its
/// children through strong indices and the child-to-parent link is a plain
/// index lookup, so no ownership cycle exists. A hidden root sentinel holds
/// the top-level entries and is never displayed.
///
/// Two positions are tracked: `current` is the most recently appended entry
/// (the append/edit target) and `cursor` is the entry shown to the user,
/// which lags behind `current` while browsing history. The cached paths and
/// sibling index are derived state, refreshed after every structural or
/// cursor change; the parent/children graph plus the two references are the
/// only source of truth.
#[derive(Debug, Clone)]
pub struct Chat {
    entries: Vec<ChatEntry>,
    root: EntryId,
    current: EntryId,
    cursor: EntryId,
    previous: Option<EntryId>,
    path: Vec<EntryId>,
    cursor_path: Vec<EntryId>,
    cursor_sibling_index: usize,
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

impl Chat {
    pub fn new() -> Self {
        let root = EntryId(0);
        let mut chat = Self {
            entries: vec![ChatEntry::new(Message::default(), Response::default(), None)],
            root,
            current: root,
            cursor: root,
            previous: None,
            path: Vec::new(),
            cursor_path: Vec::new(),
            cursor_sibling_index: 0,
        };
        chat.clear();
        chat
    }

    /// Resets the history to a single fresh editable entry under the root.
    pub fn clear(&mut self) {
        self.entries.truncate(1);
        self.entries[self.root.0].children.clear();
        let seeded = self.alloc(Message::default(), Response::default(), Some(self.root));
        self.current = seeded;
        self.cursor = seeded;
        self.previous = None;
        self.refresh_paths();
    }

    pub fn root(&self) -> EntryId {
        self.root
    }

    /// The most recently appended entry; the append/edit target.
    pub fn current(&self) -> EntryId {
        self.current
    }

    /// The entry currently displayed to the user.
    pub fn cursor(&self) -> EntryId {
        self.cursor
    }

    /// The entry that was `current` before the last mutation.
    pub fn previous(&self) -> Option<EntryId> {
        self.previous
    }

    pub fn entry(&self, id: EntryId) -> &ChatEntry {
        &self.entries[id.0]
    }

    pub fn entry_mut(&mut self, id: EntryId) -> &mut ChatEntry {
        &mut self.entries[id.0]
    }

    pub fn current_entry(&self) -> &ChatEntry {
        self.entry(self.current)
    }

    pub fn cursor_entry(&self) -> &ChatEntry {
        self.entry(self.cursor)
    }

    /// Cached root-to-current path (root sentinel excluded).
    pub fn path(&self) -> &[EntryId] {
        &self.path
    }

    /// Cached root-to-cursor path (root sentinel excluded).
    pub fn cursor_path(&self) -> &[EntryId] {
        &self.cursor_path
    }

    pub fn cursor_sibling_index(&self) -> usize {
        self.cursor_sibling_index
    }

    /// Position among the parent's children; 0 for the root.
    pub fn index_of(&self, id: EntryId) -> usize {
        let Some(parent) = self.entry(id).parent else {
            return 0;
        };
        self.entry(parent)
            .children
            .iter()
            .position(|&child| child == id)
            .unwrap_or(0)
    }

    /// Ordered path from the first real entry down to `id`, inclusive.
    pub fn path_of(&self, id: EntryId) -> Vec<EntryId> {
        let mut path = Vec::new();
        let mut walk = Some(id);
        while let Some(step) = walk {
            if step != self.root {
                path.push(step);
            }
            walk = self.entry(step).parent;
        }
        path.reverse();
        path
    }

    /// Linearizes the path to `id` into alternating prompt/response messages.
    ///
    /// A default-content first entry (the pristine placeholder) contributes
    /// nothing; each remaining entry contributes its prompt and, when a
    /// response has arrived, the first choice collapsed to a plain message.
    pub fn messages_of(&self, id: EntryId) -> Vec<Message> {
        let mut messages = Vec::new();
        for (position, entry_id) in self.path_of(id).into_iter().enumerate() {
            let entry = self.entry(entry_id);
            if position == 0 && entry.is_default_content() {
                continue;
            }
            messages.push(entry.prompt.clone());
            if let Some(choice) = entry.response.choices.first() {
                messages.push(choice.to_message());
            }
        }
        messages
    }

    pub fn api_messages_of(&self, id: EntryId) -> Vec<ApiMessage> {
        self.messages_of(id)
            .iter()
            .map(Message::to_api_message)
            .collect()
    }

    pub fn responses_of(&self, id: EntryId) -> Vec<Response> {
        self.path_of(id)
            .into_iter()
            .map(|entry_id| self.entry(entry_id).response.clone())
            .collect()
    }

    pub fn api_responses_of(&self, id: EntryId) -> Vec<Value> {
        self.path_of(id)
            .into_iter()
            .map(|entry_id| self.entry(entry_id).response.to_api_response())
            .collect()
    }

    /// True for the "fresh, nothing typed yet" state: exactly one real entry
    /// and it still holds the sentinels.
    pub fn is_default(&self) -> bool {
        let current = self.entry(self.current);
        current.parent == Some(self.root)
            && current.children.is_empty()
            && self.entry(self.root).children.len() == 1
            && current.is_default_content()
    }

    /// Editing controls apply only while viewing the newest entry; edits made
    /// while browsing history fork on submit instead.
    pub fn is_editable(&self) -> bool {
        self.cursor == self.current
    }

    /// Forks: creates a new entry alongside `cursor` (same parent) and makes
    /// it the new `current` and `cursor`.
    ///
    /// The superseded in-progress entry is emptied, not deleted; it stays in
    /// the tree as an abandoned leaf.
    pub fn add_sibling(&mut self, prompt: Message, response: Response) {
        self.previous = Some(self.current);
        let superseded = &mut self.entries[self.current.0];
        superseded.prompt.content.clear();
        superseded.response.choices.clear();
        // cursor is never the root, so it always has a parent
        let parent = self.entry(self.cursor).parent.unwrap_or(self.root);
        let id = self.alloc(prompt, response, Some(parent));
        self.current = id;
        self.cursor = id;
        self.refresh_paths();
    }

    /// Appends the next turn as a child of `cursor` and makes it the new
    /// `current` and `cursor`.
    ///
    /// On a pristine default chat the seeded placeholder is filled in place
    /// instead of gaining a child, so the first real turn sits at the top
    /// level.
    pub fn add_descendant(&mut self, prompt: Message, response: Response) {
        self.previous = Some(self.current);
        if self.is_default() {
            let seeded = &mut self.entries[self.current.0];
            seeded.prompt = prompt;
            seeded.response = response;
            self.cursor = self.current;
            self.refresh_paths();
            return;
        }
        let id = self.alloc(prompt, response, Some(self.cursor));
        self.current = id;
        self.cursor = id;
        self.refresh_paths();
    }

    pub fn can_move_up(&self) -> bool {
        match self.entry(self.cursor).parent {
            Some(parent) => parent != self.root,
            None => false,
        }
    }

    pub fn can_move_down(&self) -> bool {
        !self.entry(self.cursor).children.is_empty()
    }

    pub fn can_move_left(&self) -> bool {
        self.cursor_sibling_index != 0
    }

    pub fn can_move_right(&self) -> bool {
        let Some(parent) = self.entry(self.cursor).parent else {
            return false;
        };
        self.cursor_sibling_index + 1 < self.entry(parent).children.len()
    }

    /// Moves the cursor one level toward the root; refuses to cross above
    /// the first real level. No-op at the boundary.
    pub fn up(&mut self) {
        if !self.can_move_up() {
            return;
        }
        if let Some(parent) = self.entry(self.cursor).parent {
            self.cursor = parent;
            self.refresh_cursor_attrs();
        }
    }

    /// Moves the cursor one level toward the leaves.
    ///
    /// When the cursor sits on the cached path to `current` and has more
    /// than one child, the child continuing that path is preferred, so
    /// repeated `down()` retraces the route back to the live conversation.
    /// Otherwise the last (most recent) child is taken.
    pub fn down(&mut self) {
        let children = &self.entry(self.cursor).children;
        let Some(&last_child) = children.last() else {
            return;
        };
        let mut next = last_child;
        if children.len() > 1
            && let Some(position) = self.path.iter().position(|&id| id == self.cursor)
            && let Some(&successor) = self.path.get(position + 1)
        {
            next = successor;
        }
        self.cursor = next;
        self.refresh_cursor_attrs();
    }

    /// Moves the cursor to the previous sibling. No-op at index 0.
    pub fn left(&mut self) {
        if self.cursor_sibling_index == 0 {
            return;
        }
        let Some(parent) = self.entry(self.cursor).parent else {
            return;
        };
        self.cursor = self.entry(parent).children[self.cursor_sibling_index - 1];
        self.refresh_cursor_attrs();
    }

    /// Moves the cursor to the next sibling. No-op at the last sibling.
    pub fn right(&mut self) {
        let Some(parent) = self.entry(self.cursor).parent else {
            return;
        };
        let siblings = &self.entry(parent).children;
        if self.cursor_sibling_index + 1 >= siblings.len() {
            return;
        }
        self.cursor = siblings[self.cursor_sibling_index + 1];
        self.refresh_cursor_attrs();
    }

    /// Jumps the cursor to the first real entry on the path to `current`.
    pub fn top(&mut self) {
        if !self.can_move_up() {
            return;
        }
        let Some(&first) = self.path.first() else {
            return;
        };
        self.cursor = first;
        self.refresh_cursor_attrs();
    }

    /// Jumps the cursor back down to `current`. No-op when already at a leaf.
    pub fn bottom(&mut self) {
        if self.entry(self.cursor).children.is_empty() {
            return;
        }
        self.cursor = self.current;
        self.refresh_cursor_attrs();
    }

    /// Snaps the view back to the newest turn without altering structure.
    pub fn return_to_current(&mut self) {
        self.cursor = self.current;
        self.refresh_cursor_attrs();
    }

    fn alloc(&mut self, prompt: Message, response: Response, parent: Option<EntryId>) -> EntryId {
        let id = EntryId(self.entries.len());
        self.entries.push(ChatEntry::new(prompt, response, parent));
        if let Some(parent) = parent {
            self.entries[parent.0].children.push(id);
        }
        id
    }

    fn refresh_paths(&mut self) {
        self.path = self.path_of(self.current);
        self.refresh_cursor_attrs();
    }

    fn refresh_cursor_attrs(&mut self) {
        self.cursor_path = self.path_of(self.cursor);
        self.cursor_sibling_index = self.index_of(self.cursor);
    }
}
