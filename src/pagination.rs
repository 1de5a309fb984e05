//! Page-number/page-size browsing over filtered list queries.
//!
//! A [`PageSource`] knows how to count and fetch rows for one filter type;
//! [`paginate`] turns a [`PageRequest`] into a [`Page`]. Counting happens on
//! the filtered set, so `total_data` always reflects the filter.

use async_trait::async_trait;

use crate::storage::RepositoryError;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PaginationError {
    #[error("pageNo must be at least 1")]
    InvalidPageNo,
    #[error("pageSize must be at least 1")]
    InvalidPageSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page_no: u64,
    page_size: u64,
}

impl PageRequest {
    /// Page sizes above [`MAX_PAGE_SIZE`] are capped rather than rejected.
    pub fn new(page_no: u64, page_size: u64) -> Result<PageRequest, PaginationError> {
        if page_no < 1 {
            return Err(PaginationError::InvalidPageNo);
        }

        if page_size < 1 {
            return Err(PaginationError::InvalidPageSize);
        }

        Ok(Self {
            page_no,
            page_size: page_size.min(MAX_PAGE_SIZE),
        })
    }

    pub fn page_no(&self) -> u64 {
        self.page_no
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        (self.page_no - 1).saturating_mul(self.page_size)
    }

    pub fn total_pages(&self, total_data: u64) -> u64 {
        (total_data + self.page_size - 1) / self.page_size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_no: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total_data: u64,
    pub total_page: u64,
    pub page_no: u64,
    pub page_size: u64,
}

#[async_trait]
pub trait PageSource<F>: Send + Sync
where
    F: Sync,
{
    type Item: Send;

    async fn count(&self, filter: &F) -> Result<u64, RepositoryError>;

    async fn fetch(
        &self,
        filter: &F,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Self::Item>, RepositoryError>;
}

/// A page past the last one is empty, never an error.
pub async fn paginate<S, F>(
    source: &S,
    filter: &F,
    request: PageRequest,
) -> Result<Page<S::Item>, RepositoryError>
where
    S: PageSource<F> + ?Sized,
    F: Sync,
{
    let total_data = source.count(filter).await?;
    let data = if request.offset() >= total_data {
        Vec::new()
    } else {
        source
            .fetch(filter, request.offset(), request.page_size())
            .await?
    };

    Ok(Page {
        data,
        total_data,
        total_page: request.total_pages(total_data),
        page_no: request.page_no(),
        page_size: request.page_size(),
    })
}
