//! Per-page view state and the in-memory page table

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::render::PageImage;

/// Lifecycle of one page inside an orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum PageState {
    Absent,
    Loading,
    Loaded(PageImage),
    Failed(String),
}

impl PageState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, PageState::Loaded(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, PageState::Loading)
    }
}

/// What the UI reads for a page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewState {
    pub page_number: u32,
    pub image_url: Option<PageImage>,
    pub loading: bool,
    pub error: Option<String>,
}

impl PageViewState {
    pub fn from_state(page_number: u32, state: &PageState) -> Self {
        let (image_url, loading, error) = match state {
            PageState::Absent => (None, false, None),
            PageState::Loading => (None, true, None),
            PageState::Loaded(image) => (Some(image.clone()), false, None),
            PageState::Failed(message) => (None, false, Some(message.clone())),
        };
        Self {
            page_number,
            image_url,
            loading,
            error,
        }
    }

    pub fn absent(page_number: u32) -> Self {
        Self::from_state(page_number, &PageState::Absent)
    }
}

/// Identifies one load attempt
pub(crate) type Ticket = u64;

/// Outcome of claiming a page for loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// Caller owns a new load and must complete it with this ticket
    Started(Ticket),
    /// A load from before the last rebind is still running for the same
    /// document; its result will now be applied
    Joined,
    /// A current load is in flight, or the table is bound elsewhere
    Busy,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: Ticket,
    generation: u64,
}

/// Owned page map plus the in-flight set
///
/// Only the orchestrator mutates it, and never across an await. In-flight
/// entries are keyed by document and outlive `rebind`/`reset` until their
/// task completes; the generation decides whether a result still applies.
#[derive(Debug, Default)]
pub(crate) struct PageTable {
    /// Absent pages have no entry
    pages: BTreeMap<u32, PageState>,
    in_flight: HashMap<(String, u32), InFlight>,
    document_id: Option<String>,
    generation: u64,
    next_ticket: Ticket,
}

impl PageTable {
    pub fn state(&self, page_number: u32) -> PageState {
        self.pages
            .get(&page_number)
            .cloned()
            .unwrap_or(PageState::Absent)
    }

    pub fn is_loaded(&self, page_number: u32) -> bool {
        self.pages
            .get(&page_number)
            .is_some_and(PageState::is_loaded)
    }

    /// Whether a load for the bound document's page counts toward the
    /// current generation
    pub fn is_in_flight(&self, page_number: u32) -> bool {
        let Some(document_id) = &self.document_id else {
            return false;
        };
        self.in_flight
            .get(&(document_id.clone(), page_number))
            .is_some_and(|entry| entry.generation == self.generation)
    }

    /// Every running load, stale ones included
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Mark `page_number` of `document_id` loading
    pub fn begin_load(&mut self, document_id: &str, page_number: u32) -> Claim {
        if self.document_id.as_deref() != Some(document_id) {
            return Claim::Busy;
        }

        let key = (document_id.to_owned(), page_number);
        if let Some(entry) = self.in_flight.get_mut(&key) {
            if entry.generation == self.generation {
                return Claim::Busy;
            }
            entry.generation = self.generation;
            self.pages.insert(page_number, PageState::Loading);
            return Claim::Joined;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.in_flight.insert(
            key,
            InFlight {
                ticket,
                generation: self.generation,
            },
        );
        self.pages.insert(page_number, PageState::Loading);
        Claim::Started(ticket)
    }

    /// Apply a load result and release its in-flight entry. Returns false
    /// when the result belongs to an older generation and was discarded.
    pub fn complete(
        &mut self,
        document_id: &str,
        page_number: u32,
        ticket: Ticket,
        outcome: Result<PageImage, String>,
    ) -> bool {
        let key = (document_id.to_owned(), page_number);
        let entry = match self.in_flight.get(&key) {
            Some(entry) if entry.ticket == ticket => *entry,
            _ => return false,
        };
        self.in_flight.remove(&key);

        if entry.generation != self.generation {
            return false;
        }

        let state = match outcome {
            Ok(image) => PageState::Loaded(image),
            Err(message) => PageState::Failed(message),
        };
        self.pages.insert(page_number, state);
        true
    }

    /// Remove every settled page matching `distant`, returning them
    pub fn prune(&mut self, distant: impl Fn(u32) -> bool) -> Vec<u32> {
        let removed: Vec<u32> = self
            .pages
            .keys()
            .copied()
            .filter(|&page| distant(page) && !self.is_in_flight(page))
            .collect();

        for page in &removed {
            self.pages.remove(page);
        }
        removed
    }

    /// Switch to `document_id` (or none) and forget every page; results of
    /// outstanding loads will be discarded
    pub fn rebind(&mut self, document_id: Option<&str>) {
        self.document_id = document_id.map(str::to_owned);
        self.reset();
    }

    /// Forget every page without changing the bound document
    pub fn reset(&mut self) {
        self.pages.clear();
        self.generation += 1;
    }

    pub fn views(&self) -> Vec<PageViewState> {
        self.pages
            .iter()
            .map(|(&page, state)| PageViewState::from_state(page, state))
            .collect()
    }

    pub fn loaded_pages(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|(_, state)| state.is_loaded())
            .map(|(&page, _)| page)
            .collect()
    }
}
