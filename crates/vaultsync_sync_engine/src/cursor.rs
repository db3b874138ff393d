//! Continuation state for paginated backfill.

use vaultsync_sync_protocol::PageRequest;

/// Saved cursor position, used to undo a failed page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSnapshot {
    token: Option<String>,
    has_more: bool,
    epoch: u64,
}

/// Tracks where the next page starts for one session and identity.
///
/// Initializing never touches local data: the local store may hold more
/// history than any single fetch returns.
#[derive(Debug, Clone)]
pub struct PaginationCursor {
    page_size: u32,
    token: Option<String>,
    has_more: bool,
    loading: bool,
    auth_context: Option<String>,
    epoch: u64,
}

impl PaginationCursor {
    /// Creates a cursor positioned before the first page.
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            token: None,
            has_more: true,
            loading: false,
            auth_context: None,
            epoch: 0,
        }
    }

    /// Resets to before the first page.
    pub fn initialize(&mut self) {
        self.token = None;
        self.has_more = true;
        self.loading = false;
        self.epoch += 1;
    }

    /// Current position, for [`rollback`](Self::rollback).
    pub fn snapshot(&self) -> CursorSnapshot {
        CursorSnapshot {
            token: self.token.clone(),
            has_more: self.has_more,
            epoch: self.epoch,
        }
    }

    /// Starts loading the next page.
    ///
    /// Returns `None` when every page has been loaded or a load is already
    /// in flight.
    pub fn begin(&mut self) -> Option<PageRequest> {
        if self.loading || !self.has_more {
            return None;
        }
        self.loading = true;
        Some(PageRequest {
            limit: self.page_size,
            continuation_token: self.token.clone(),
        })
    }

    /// Moves past a loaded page.
    ///
    /// Ignored, returning false, if the cursor was reset since `from` was
    /// taken.
    pub fn advance(&mut self, from: &CursorSnapshot, next_token: Option<String>) -> bool {
        if from.epoch != self.epoch {
            return false;
        }
        self.has_more = next_token.is_some();
        self.token = next_token;
        self.loading = false;
        true
    }

    /// Restores `snapshot` after a failed load so a retry starts clean.
    pub fn rollback(&mut self, snapshot: CursorSnapshot) {
        if snapshot.epoch != self.epoch {
            return;
        }
        self.token = snapshot.token;
        self.has_more = snapshot.has_more;
        self.loading = false;
    }

    /// Resets the cursor if `auth_context` differs from the one it was
    /// built for. Returns true if it was reset.
    pub fn invalidate_for(&mut self, auth_context: Option<&str>) -> bool {
        if self.auth_context.as_deref() == auth_context {
            return false;
        }
        self.auth_context = auth_context.map(str::to_string);
        self.initialize();
        true
    }

    /// Whether another page may exist.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Whether a load is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Token for the next page.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Identity the cursor belongs to.
    pub fn auth_context(&self) -> Option<&str> {
        self.auth_context.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_pages_until_exhausted() {
        let mut cursor = PaginationCursor::new(10);

        let snap = cursor.snapshot();
        let first = cursor.begin().unwrap();
        assert_eq!(first, PageRequest::first(10));
        assert!(cursor.begin().is_none(), "second load while first in flight");

        assert!(cursor.advance(&snap, Some("p2".into())));
        let snap = cursor.snapshot();
        assert_eq!(cursor.begin().unwrap(), PageRequest::after(10, "p2"));

        cursor.advance(&snap, None);
        assert!(!cursor.has_more());
        assert!(cursor.begin().is_none());
    }

    #[test]
    fn rollback_restores_previous_position() {
        let mut cursor = PaginationCursor::new(5);
        let snap = cursor.snapshot();
        cursor.begin();
        cursor.advance(&snap, Some("p2".into()));

        let snap = cursor.snapshot();
        cursor.begin();
        cursor.rollback(snap);

        assert!(!cursor.is_loading());
        assert_eq!(cursor.token(), Some("p2"));
        assert_eq!(cursor.begin().unwrap(), PageRequest::after(5, "p2"));
    }

    #[test]
    fn initialize_resets() {
        let mut cursor = PaginationCursor::new(5);
        let snap = cursor.snapshot();
        cursor.begin();
        cursor.advance(&snap, None);

        cursor.initialize();
        assert!(cursor.has_more());
        assert_eq!(cursor.begin().unwrap(), PageRequest::first(5));
    }

    #[test]
    fn auth_change_discards_stale_progress() {
        let mut cursor = PaginationCursor::new(5);
        assert!(cursor.invalidate_for(Some("alice")));
        assert!(!cursor.invalidate_for(Some("alice")));

        let snap = cursor.snapshot();
        cursor.begin();
        assert!(cursor.invalidate_for(Some("bob")));

        // The page requested for alice must not move bob's cursor.
        assert!(!cursor.advance(&snap, Some("alice-p2".into())));
        cursor.rollback(snap);
        assert_eq!(cursor.token(), None);
        assert!(!cursor.is_loading());
        assert_eq!(cursor.auth_context(), Some("bob"));
    }
}
