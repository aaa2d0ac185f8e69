//! Bookkeeping for running searches.

use core_library::{EntityRef, ProviderId, SearchQueryId, SearchResult};
use std::collections::VecDeque;

/// The most recent searches, oldest first.
#[derive(Debug)]
pub(crate) struct SearchSessions {
    limit: usize,
    sessions: VecDeque<SearchResult>,
}

impl SearchSessions {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            sessions: VecDeque::new(),
        }
    }

    /// Track a new search. Returns the query id evicted to stay within the
    /// limit, if any.
    pub(crate) fn start(&mut self, result: SearchResult) -> Option<SearchQueryId> {
        self.sessions.push_back(result);
        if self.sessions.len() > self.limit {
            return self.sessions.pop_front().map(|evicted| evicted.query_id);
        }
        None
    }

    pub(crate) fn get(&self, query_id: &SearchQueryId) -> Option<&SearchResult> {
        self.sessions.iter().find(|s| &s.query_id == query_id)
    }

    fn get_mut(&mut self, query_id: &SearchQueryId) -> Option<&mut SearchResult> {
        self.sessions.iter_mut().find(|s| &s.query_id == query_id)
    }

    /// Merge `partial` from `provider` and mark the provider as answered.
    /// Returns the merged snapshot, or `None` for an unknown query.
    pub(crate) fn apply(
        &mut self,
        provider: &ProviderId,
        partial: &SearchResult,
    ) -> Option<SearchResult> {
        let session = self.get_mut(&partial.query_id)?;
        // Ids match, so merge cannot fail.
        session.merge(partial).ok()?;
        session.pending_providers.retain(|p| p != provider);
        Some(session.clone())
    }

    /// Mark `provider` as answered without hits.
    pub(crate) fn abandon(
        &mut self,
        query_id: &SearchQueryId,
        provider: &ProviderId,
    ) -> Option<SearchResult> {
        let session = self.get_mut(query_id)?;
        let before = session.pending_providers.len();
        session.pending_providers.retain(|p| p != provider);
        (session.pending_providers.len() != before).then(|| session.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Hits of `partial` owned by `provider`, and how many were dropped.
pub(crate) fn scoped(provider: &ProviderId, partial: SearchResult) -> (SearchResult, usize) {
    let owned = |refs: Vec<EntityRef>| -> (Vec<EntityRef>, usize) {
        let total = refs.len();
        let kept: Vec<EntityRef> = refs.into_iter().filter(|r| r.is_owned_by(provider)).collect();
        let dropped = total - kept.len();
        (kept, dropped)
    };

    let SearchResult {
        query_id,
        query,
        songs,
        albums,
        artists,
        playlists,
        pending_providers,
    } = partial;
    let (songs, a) = owned(songs);
    let (albums, b) = owned(albums);
    let (artists, c) = owned(artists);
    let (playlists, d) = owned(playlists);

    (
        SearchResult {
            query_id,
            query,
            songs,
            albums,
            artists,
            playlists,
            pending_providers,
        },
        a + b + c + d,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::SearchQuery;

    #[test]
    fn test_sessions_are_bounded() {
        let mut sessions = SearchSessions::new(2);
        let first = SearchResult::new(&SearchQuery::new("a"));
        let first_id = first.query_id;
        assert!(sessions.start(first).is_none());
        assert!(sessions.start(SearchResult::new(&SearchQuery::new("b"))).is_none());
        assert_eq!(
            sessions.start(SearchResult::new(&SearchQuery::new("c"))),
            Some(first_id)
        );
        assert_eq!(sessions.len(), 2);
        assert!(sessions.get(&first_id).is_none());
    }

    #[test]
    fn test_apply_marks_provider_answered() {
        let query = SearchQuery::new("moon");
        let mut started = SearchResult::new(&query);
        started.pending_providers = vec![ProviderId::new("a"), ProviderId::new("b")];

        let mut sessions = SearchSessions::new(4);
        sessions.start(started);

        let partial = SearchResult::new(&query).with_songs([EntityRef::new("a", "1")]);
        let merged = sessions.apply(&ProviderId::new("a"), &partial).unwrap();
        assert_eq!(merged.songs.len(), 1);
        assert!(!merged.is_complete());

        let merged = sessions.abandon(&query.id, &ProviderId::new("b")).unwrap();
        assert!(merged.is_complete());
        assert!(sessions.abandon(&query.id, &ProviderId::new("b")).is_none());
    }

    #[test]
    fn test_scoped_drops_foreign_hits() {
        let query = SearchQuery::new("x");
        let partial = SearchResult::new(&query)
            .with_songs([EntityRef::new("a", "1"), EntityRef::new("b", "2")])
            .with_albums([EntityRef::new("b", "3")]);

        let (kept, dropped) = scoped(&ProviderId::new("a"), partial);
        assert_eq!(kept.songs, vec![EntityRef::new("a", "1")]);
        assert!(kept.albums.is_empty());
        assert_eq!(dropped, 2);
    }
}
