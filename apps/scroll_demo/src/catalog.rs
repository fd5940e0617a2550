//! In-memory paged catalog and a simulated scrolling viewport.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use scroll_core::{PageSource, ViewportProbe};
use serde::Serialize;
use shared::{
    domain::{AnchorId, PageIndex, QueryParams},
    protocol::Page,
};
use tracing::debug;

const WORDS: [&str; 8] = [
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel",
];

pub const ROW_HEIGHT_PX: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogItem {
    pub id: u64,
    pub title: String,
}

pub struct CatalogSource {
    items: Vec<CatalogItem>,
    page_size: usize,
    initial_page: PageIndex,
    latency: Duration,
    fail_at: Option<PageIndex>,
}

impl CatalogSource {
    pub fn new(total_items: usize, page_size: usize, initial_page: PageIndex) -> Self {
        let items = (0..total_items as u64)
            .map(|id| CatalogItem {
                id,
                title: format!("{} {id:03}", WORDS[id as usize % WORDS.len()]),
            })
            .collect();
        Self {
            items,
            page_size: page_size.max(1),
            initial_page,
            latency: Duration::ZERO,
            fail_at: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_failure_at(mut self, page: Option<PageIndex>) -> Self {
        self.fail_at = page;
        self
    }

    /// Items matching `params`: `q` filters titles by substring.
    fn matching<'a>(&'a self, params: &'a QueryParams) -> impl Iterator<Item = &'a CatalogItem> {
        let needle = params.get_str("q").map(str::to_ascii_lowercase);
        self.items.iter().filter(move |item| match &needle {
            Some(needle) => item.title.contains(needle.as_str()),
            None => true,
        })
    }
}

#[async_trait]
impl PageSource<CatalogItem> for CatalogSource {
    async fn fetch_page(&self, page: PageIndex, params: &QueryParams) -> Result<Page<CatalogItem>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail_at == Some(page) {
            return Err(anyhow!("simulated upstream failure at page {page}"));
        }

        let offset = page
            .0
            .checked_sub(self.initial_page.0)
            .ok_or_else(|| anyhow!("page {page} precedes first page {}", self.initial_page))?;
        let start = offset as usize * self.page_size;
        let mut matching = self.matching(params).skip(start);
        let items = matching
            .by_ref()
            .take(self.page_size)
            .cloned()
            .collect::<Vec<_>>();
        let has_more = matching.next().is_some();
        debug!(page = page.0, returned = items.len(), has_more, "catalog page served");
        Ok(Page::new(items, has_more))
    }
}

/// A list of fixed-height rows with the sentinel rendered right after the
/// last item.
pub struct SimulatedViewport {
    rows: usize,
    offset: AtomicUsize,
    rendered: AtomicUsize,
    sentinel: AnchorId,
}

impl SimulatedViewport {
    pub fn new(rows: usize, sentinel: AnchorId) -> Self {
        Self {
            rows: rows.max(1),
            offset: AtomicUsize::new(0),
            rendered: AtomicUsize::new(0),
            sentinel,
        }
    }

    pub fn set_rendered(&self, rendered: usize) {
        self.rendered.store(rendered, Ordering::SeqCst);
        let max_offset = rendered.saturating_sub(self.rows.saturating_sub(1));
        self.offset.fetch_min(max_offset, Ordering::SeqCst);
    }

    pub fn scroll_by(&self, rows: usize) -> usize {
        let max_offset = self
            .rendered
            .load(Ordering::SeqCst)
            .saturating_sub(self.rows.saturating_sub(1));
        let next = (self.offset.load(Ordering::SeqCst) + rows).min(max_offset);
        self.offset.store(next, Ordering::SeqCst);
        next
    }

    pub fn scroll_to_top(&self) {
        self.offset.store(0, Ordering::SeqCst);
    }

    pub fn offset(&self) -> usize {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl ViewportProbe for SimulatedViewport {
    fn intersection_ratio(&self, anchor: AnchorId, root_margin_px: u32) -> f32 {
        if anchor != self.sentinel {
            return 0.0;
        }
        let margin_rows = root_margin_px.div_ceil(ROW_HEIGHT_PX) as usize;
        let sentinel_row = self.rendered.load(Ordering::SeqCst);
        let bottom = self.offset.load(Ordering::SeqCst) + self.rows + margin_rows;
        if sentinel_row < bottom {
            1.0
        } else {
            0.0
        }
    }
}
