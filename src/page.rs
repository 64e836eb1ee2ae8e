//! Paging value objects for plugin listings.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::plugin::{PluginDescriptor, PluginError, PluginResult};

/// Descriptor property to sort by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Id,
    Name,
    Version,
    InstallTime,
    State,
}

impl SortKey {
    /// Compare two descriptors on this key, breaking ties by registration order.
    pub fn compare(&self, a: &PluginDescriptor, b: &PluginDescriptor) -> Ordering {
        let primary = match self {
            SortKey::Id => a.metadata.id.cmp(&b.metadata.id),
            SortKey::Name => a.metadata.name.cmp(&b.metadata.name),
            SortKey::Version => a.metadata.version.cmp(&b.metadata.version),
            SortKey::InstallTime => a.metadata.install_time.cmp(&b.metadata.install_time),
            SortKey::State => a.state.cmp(&b.state),
        };
        primary.then(a.registration_seq.cmp(&b.registration_seq))
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "id" => Ok(SortKey::Id),
            "name" => Ok(SortKey::Name),
            "version" => Ok(SortKey::Version),
            "install_time" | "installtime" => Ok(SortKey::InstallTime),
            "state" => Ok(SortKey::State),
            other => Err(format!("unknown sort key '{}'", other)),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction '{}'", other)),
        }
    }
}

/// A page request: zero-based index, size and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page_index: usize,
    pub page_size: usize,
    #[serde(default)]
    pub sort_key: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

impl PageRequest {
    /// Page `page_index` of `page_size` items, sorted by id ascending.
    pub fn new(page_index: usize, page_size: usize) -> Self {
        Self {
            page_index,
            page_size,
            sort_key: SortKey::Id,
            direction: SortDirection::Asc,
        }
    }

    /// Set the ordering.
    pub fn sorted_by(mut self, sort_key: SortKey, direction: SortDirection) -> Self {
        self.sort_key = sort_key;
        self.direction = direction;
        self
    }

    /// Reject a zero page size.
    pub fn validate(&self) -> PluginResult<()> {
        if self.page_size == 0 {
            return Err(PluginError::InvalidPageRequest(
                "page size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Index of the first item on this page.
    pub fn offset(&self) -> usize {
        self.page_index.saturating_mul(self.page_size)
    }

    /// Sort descriptors in place according to this request.
    pub fn sort(&self, descriptors: &mut [PluginDescriptor]) {
        descriptors.sort_by(|a, b| {
            let ordering = self.sort_key.compare(a, b);
            match self.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page_index: usize,
    pub page_size: usize,
    pub total_elements: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    /// Slice an already ordered list.
    pub fn slice(items: Vec<T>, request: &PageRequest) -> Self {
        let total_elements = items.len();
        let page_size = request.page_size.max(1);
        let total_pages = total_elements.div_ceil(page_size);

        let content = items
            .into_iter()
            .skip(request.offset())
            .take(page_size)
            .collect();

        Self {
            content,
            page_index: request.page_index,
            page_size,
            total_elements,
            total_pages,
        }
    }

    /// Whether no later page exists.
    pub fn is_last(&self) -> bool {
        self.page_index + 1 >= self.total_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_middle_page() {
        let page = Page::slice((0..10).collect::<Vec<_>>(), &PageRequest::new(1, 4));

        assert_eq!(page.content, vec![4, 5, 6, 7]);
        assert_eq!(page.total_elements, 10);
        assert_eq!(page.total_pages, 3);
        assert!(!page.is_last());
    }

    #[test]
    fn test_slice_past_end_is_empty() {
        let page = Page::slice(vec![1, 2, 3], &PageRequest::new(5, 2));

        assert!(page.content.is_empty());
        assert_eq!(page.total_pages, 2);
        assert!(page.is_last());
    }

    #[test]
    fn test_zero_page_size_is_invalid() {
        assert!(matches!(
            PageRequest::new(0, 0).validate(),
            Err(PluginError::InvalidPageRequest(_))
        ));
    }

    #[test]
    fn test_parse_sort_params() {
        assert_eq!("install_time".parse::<SortKey>(), Ok(SortKey::InstallTime));
        assert_eq!("DESC".parse::<SortDirection>(), Ok(SortDirection::Desc));
        assert!("size".parse::<SortKey>().is_err());
    }
}
