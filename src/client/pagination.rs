//! Generic pagination over JSON:API list responses.

use std::collections::HashSet;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A response that may point at a further page of itself.
pub trait Paginated: Sized {
    /// Link to the next page, if any.
    fn next_link(&self) -> Option<&str>;

    /// Append `next` to this response, taking over its next link.
    fn absorb(&mut self, next: Self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLinks {
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,
}

/// The common list shape: `data`, `links.next`, `meta.paging`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub links: PageLinks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

impl<T> Page<T> {
    /// Total item count reported by the server, if any.
    pub fn total(&self) -> Option<u64> {
        self.meta.as_ref()?.paging.as_ref()?.total
    }
}

impl<T> Paginated for Page<T> {
    fn next_link(&self) -> Option<&str> {
        self.links.next.as_deref()
    }

    fn absorb(&mut self, next: Self) {
        self.data.extend(next.data);
        self.links.next = next.links.next;
    }
}

/// Guards against backends that never stop paginating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationLimits {
    /// Pages fetched in total, including the first.
    pub max_pages: usize,
}

impl Default for PaginationLimits {
    fn default() -> Self {
        Self { max_pages: 1000 }
    }
}

/// Follow next links from `first` until none remain.
///
/// `fetch_next` receives each next link and is responsible for validating
/// it. Pages are concatenated in order.
pub async fn paginate_all<P, F, Fut>(first: P, limits: PaginationLimits, fetch_next: F) -> Result<P>
where
    P: Paginated,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<P>>,
{
    paginate_all_with_observer(first, limits, fetch_next, |_, _| {}).await
}

/// [`paginate_all`] reporting `(page_number, next_url)` after each fetch.
/// The first fetched follow-up page is number 2.
pub async fn paginate_all_with_observer<P, F, Fut, O>(
    first: P,
    limits: PaginationLimits,
    mut fetch_next: F,
    mut observer: O,
) -> Result<P>
where
    P: Paginated,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<P>>,
    O: FnMut(usize, &str),
{
    let mut aggregate = first;
    let mut visited = HashSet::new();
    let mut page = 1usize;

    loop {
        let next = match aggregate.next_link().map(str::trim) {
            Some(next) if !next.is_empty() => next.to_string(),
            _ => break,
        };

        if !visited.insert(next.clone()) {
            tracing::warn!(url = %next, page, "Pagination revisited a next link");
            return Err(Error::Pagination(format!(
                "next link {} was already fetched",
                next
            )));
        }
        if page >= limits.max_pages {
            return Err(Error::Pagination(format!(
                "exceeded {} pages",
                limits.max_pages
            )));
        }

        let fetched = fetch_next(next.clone()).await?;
        page += 1;
        aggregate.absorb(fetched);

        tracing::debug!(page, url = %next, "Fetched page");
        observer(page, &next);
    }

    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    fn page(data: &[u32], next: Option<&str>) -> Page<u32> {
        Page {
            data: data.to_vec(),
            links: PageLinks {
                self_link: None,
                next: next.map(String::from),
            },
            meta: None,
        }
    }

    #[tokio::test]
    async fn test_concatenates_in_order() {
        let pages: HashMap<&str, Page<u32>> = HashMap::from([
            ("p2", page(&[3, 4], Some("p3"))),
            ("p3", page(&[5], None)),
        ]);
        let calls = Mutex::new(0);
        let mut observed = Vec::new();

        let all = paginate_all_with_observer(
            page(&[1, 2], Some("p2")),
            PaginationLimits::default(),
            |next| {
                *calls.lock().unwrap() += 1;
                let found = pages.get(next.as_str()).cloned();
                async move { found.ok_or_else(|| Error::Pagination("missing".into())) }
            },
            |n, url| observed.push((n, url.to_string())),
        )
        .await
        .unwrap();

        assert_eq!(all.data, vec![1, 2, 3, 4, 5]);
        assert!(all.links.next.is_none());
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(observed, vec![(2, "p2".to_string()), (3, "p3".to_string())]);
    }

    #[tokio::test]
    async fn test_single_page_never_fetches() {
        let all = paginate_all(page(&[1], None), PaginationLimits::default(), |_| async {
            Err::<Page<u32>, _>(Error::Pagination("should not fetch".into()))
        })
        .await
        .unwrap();
        assert_eq!(all.data, vec![1]);
    }

    #[tokio::test]
    async fn test_self_referential_link() {
        let result = paginate_all(page(&[1], Some("loop")), PaginationLimits::default(), |_| async {
            Ok(page(&[2], Some("loop")))
        })
        .await;
        assert!(matches!(result, Err(Error::Pagination(m)) if m.contains("already fetched")));
    }

    #[tokio::test]
    async fn test_page_limit() {
        let counter = Mutex::new(0u32);
        let result = paginate_all(page(&[0], Some("0")), PaginationLimits { max_pages: 3 }, |_| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            let next = n.to_string();
            async move { Ok(page(&[1], Some(next.as_str()))) }
        })
        .await;
        assert!(matches!(result, Err(Error::Pagination(m)) if m.contains("3 pages")));
        assert_eq!(*counter.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let result = paginate_all(page(&[1], Some("p2")), PaginationLimits::default(), |_| async {
            Err::<Page<u32>, _>(Error::Cancelled)
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_deserialize_page() {
        let json = r#"{
            "data": [{"type": "apps", "id": "1"}],
            "links": {"self": "https://api.appstoreconnect.apple.com/v1/apps", "next": "https://api.appstoreconnect.apple.com/v1/apps?cursor=AQ"},
            "meta": {"paging": {"total": 2, "limit": 1}}
        }"#;
        let page: Page<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert_eq!(page.total(), Some(2));
        assert!(page.next_link().unwrap().ends_with("cursor=AQ"));
    }
}
